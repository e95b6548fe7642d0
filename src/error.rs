//! Error types for manifest validation and tool resolution.

/// A single structural or constraint failure found while validating a
/// manifest document.
///
/// `path` is a slash-separated field path into the document
/// (e.g. `parameters/2/kind`), so callers can point at the exact defect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Field path into the manifest document.
    pub path: String,
    /// Human-readable reason the field is invalid.
    pub reason: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Errors that can occur while registering or resolving a tool.
///
/// All payloads are owned strings so the enum is `Clone`; a single error
/// value from an in-flight resolution is handed to every caller waiting on
/// the same key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// Manifest source could not be fetched.
    #[error("Source unreadable ({source_id}): {reason}")]
    SourceUnreadable { source_id: String, reason: String },

    /// Manifest source is not well-formed JSON or YAML.
    #[error("Parse error in {source_id}: {reason}")]
    ParseError {
        source_id: String,
        reason: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    /// Manifest document failed schema validation. Carries every violation
    /// found in one pass, not just the first.
    #[error("Manifest failed validation with {} violation(s)", .violations.len())]
    SchemaViolations { violations: Vec<SchemaViolation> },

    /// Declared image reference does not parse under the
    /// `repository[:tag|@digest]` grammar.
    #[error("Invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    /// Container runtime boundary reports the image does not exist.
    #[error("Image not found: {reference}")]
    ImageNotFound { reference: String },

    /// Container runtime boundary could not be contacted. Retryable.
    #[error("Container registry unreachable: {reason}")]
    RegistryUnreachable { reason: String },

    /// `(tool_id, version)` already registered from a different source.
    #[error("Tool {tool_id}@{version} already registered from a different source")]
    DuplicateTool { tool_id: String, version: String },

    /// Two registered sources claim versions with identical semantic-version
    /// precedence, so a version-omitted resolve cannot pick one.
    #[error("Ambiguous version for tool {tool_id}: multiple sources at precedence {version}")]
    AmbiguousVersion { tool_id: String, version: String },

    /// No registration exists for the requested tool id.
    #[error("Tool not registered: {tool_id}")]
    ToolNotFound { tool_id: String },

    /// Builder inputs disagree, or a re-read manifest no longer matches its
    /// registered identity.
    #[error("Inconsistent resolution: {reason}")]
    InconsistentResolution { reason: String },
}

impl RegistryError {
    /// True for errors meaning the tool definition itself is broken; the
    /// caller must fix the manifest, retrying will not help.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            RegistryError::ParseError { .. }
                | RegistryError::SchemaViolations { .. }
                | RegistryError::InvalidImageReference { .. }
                | RegistryError::InconsistentResolution { .. }
        )
    }

    /// True for errors meaning the environment is unavailable or the image
    /// is missing; the definition may be fine and retrying later is sensible.
    pub fn is_availability_error(&self) -> bool {
        matches!(
            self,
            RegistryError::SourceUnreadable { .. }
                | RegistryError::ImageNotFound { .. }
                | RegistryError::RegistryUnreachable { .. }
        )
    }

    /// True for errors the resolver retries internally before surfacing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::RegistryUnreachable { .. })
    }

    /// The violations carried by a validation failure, if any.
    pub fn violations(&self) -> &[SchemaViolation] {
        match self {
            RegistryError::SchemaViolations { violations } => violations,
            _ => &[],
        }
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
