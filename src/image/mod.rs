//! Container image references and the runtime boundary.
//!
//! The registry never pulls, runs, or removes images. It only parses
//! declared references, asks the container runtime whether they exist, and
//! pins tags to content digests so a tag cannot silently change the
//! executed content.

mod reference;
mod resolver;
mod runtime;

pub use reference::{ImageRef, ResolvedImageRef};
pub use resolver::ImageResolver;
pub use runtime::{ContainerRuntime, DockerRuntime, connect_docker};
