//! Typed manifest structures.

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result, SchemaViolation};
use crate::manifest::loader::RawManifest;

/// The declared specification for one tool, as written by its author.
///
/// Produced from a [`RawManifest`] only after strict validation has passed;
/// downstream code can rely on the invariants the validator enforced
/// (closed parameter kinds, unique parameter names, parseable version and
/// image reference).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolManifest {
    /// Stable unique identifier for the tool.
    pub tool_id: String,
    /// Semantic version string.
    pub version: String,
    /// Declared container image reference (`repository[:tag|@digest]`).
    pub image_ref: String,
    /// Human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-Schema-like document describing accepted input.
    pub input_schema: serde_json::Value,
    /// JSON-Schema-like document describing produced output.
    pub output_schema: serde_json::Value,
    /// Ordered runtime parameters.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl ToolManifest {
    /// Convert a validated raw document into the typed form.
    ///
    /// Callers must run [`crate::manifest::validate`] first; a document that
    /// passed validation always converts cleanly, so a failure here is
    /// reported as an internal inconsistency rather than a user-facing
    /// violation list.
    pub fn from_validated(raw: &RawManifest) -> Result<Self> {
        serde_json::from_value(raw.document.clone()).map_err(|e| {
            RegistryError::InconsistentResolution {
                reason: format!(
                    "validated manifest from {} failed typed conversion: {}",
                    raw.source_id, e
                ),
            }
        })
    }

    /// Parsed semantic version.
    ///
    /// The validator guarantees the field parses, so this only fails on a
    /// manifest that bypassed validation.
    pub fn semver(&self) -> Result<Version> {
        Version::parse(&self.version).map_err(|e| RegistryError::SchemaViolations {
            violations: vec![SchemaViolation::new(
                "version",
                format!("not a semantic version: {}", e),
            )],
        })
    }

    /// Registered identity of this manifest.
    pub fn identity(&self) -> ManifestIdentity {
        ManifestIdentity {
            tool_id: self.tool_id.clone(),
            version: self.version.clone(),
        }
    }
}

/// The `(tool_id, version)` pair that names a manifest in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestIdentity {
    pub tool_id: String,
    pub version: String,
}

impl std::fmt::Display for ManifestIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.tool_id, self.version)
    }
}

/// One named runtime parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterSpec {
    /// Parameter name, unique within the manifest.
    pub name: String,
    /// Value type, from the closed set of supported kinds.
    pub kind: ParameterKind,
    /// Default value when the caller omits the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Whether the caller must supply a value.
    #[serde(default)]
    pub required: bool,
    /// Human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Closed enumeration of parameter value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Integer,
    Boolean,
    Float,
    Enum,
    Object,
}

impl ParameterKind {
    /// All accepted kind tags, as they appear in manifest documents.
    pub const TAGS: [&'static str; 6] =
        ["string", "integer", "boolean", "float", "enum", "object"];
}
