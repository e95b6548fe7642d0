//! Tool manifests: the declared specification of a tool before validation.
//!
//! A manifest arrives as a serialized document (JSON or YAML), is loaded
//! into a raw structured form, validated strictly against the manifest
//! schema, and only then converted into the typed [`ToolManifest`] the rest
//! of the pipeline consumes.

mod loader;
mod types;
mod validator;

pub use loader::{FileLoader, ManifestLoader, ManifestSource, RawManifest};
pub use types::{ManifestIdentity, ParameterKind, ParameterSpec, ToolManifest};
pub use validator::validate;
