//! The registry index: the stateful front door of the crate.
//!
//! Maps `(tool_id, version)` pairs to manifest sources and orchestrates the
//! resolution pipeline (load, validate, pin image, build descriptor) with
//! per-key single-flight caching.

mod index;

pub use index::ToolRegistry;
