//! Tool registry core for a workflow engine.
//!
//! toolgate validates declared tool manifests, pins their container images
//! to content digests, and serves immutable [`ToolDescriptor`]s that an
//! orchestrator can hand to a sandbox runner. It sits at a trust boundary:
//! a malformed or spoofed manifest must be rejected before anything
//! downstream schedules a container, so validation is strict, deterministic,
//! and side-effect-free until resolution is explicitly requested.
//!
//! The pipeline behind [`ToolRegistry::resolve`]:
//!
//! ```text
//! source ──▶ Manifest Loader ──▶ Schema Validator ──▶ Image Resolver ──▶ Descriptor
//!            (JSON / YAML)       (strict, collects     (existence check,   (immutable,
//!                                 all violations)       digest pinning)     cached)
//! ```
//!
//! The registry executes nothing itself. The container runtime boundary is
//! consumed read-only (does the image exist, what digest does the tag point
//! at), and the only artifact crossing into execution is the resolved
//! descriptor.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use toolgate::{
//!     FileLoader, ManifestSource, RegistryConfig, ToolRegistry, connect_docker, DockerRuntime,
//! };
//!
//! # async fn example() -> toolgate::Result<()> {
//! let registry = ToolRegistry::new(
//!     Arc::new(FileLoader::new()),
//!     Arc::new(DockerRuntime::new(connect_docker().await?)),
//!     RegistryConfig::default(),
//! );
//!
//! let (tool_id, version) = registry
//!     .register(ManifestSource::Path("tools/ocr.yaml".into()))
//!     .await?;
//! let descriptor = registry.resolve(&tool_id, Some(version.as_str())).await?;
//! println!("run {}", descriptor.resolved_image.pinned());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod image;
pub mod manifest;
pub mod registry;

pub use config::{RegistryConfig, RetryPolicy};
pub use descriptor::{ToolDescriptor, build_descriptor};
pub use error::{RegistryError, Result, SchemaViolation};
pub use image::{
    ContainerRuntime, DockerRuntime, ImageRef, ImageResolver, ResolvedImageRef, connect_docker,
};
pub use manifest::{
    FileLoader, ManifestLoader, ManifestSource, ParameterKind, ParameterSpec, RawManifest,
    ToolManifest, validate,
};
pub use registry::ToolRegistry;
