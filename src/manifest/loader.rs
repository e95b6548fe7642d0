//! Loading manifest sources into structured documents.
//!
//! The loader fetches and parses; it does not validate and it does not
//! cache. [`ManifestLoader`] is a trait so the registry can be pointed at a
//! remote manifest store, and so tests can serve manifests from memory while
//! counting calls.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{RegistryError, Result};

/// Location of a manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManifestSource {
    /// A file on the local filesystem.
    Path(PathBuf),
    /// An opaque key into a remote manifest store.
    Key(String),
}

impl ManifestSource {
    /// Stable identifier used in logs and error messages.
    pub fn id(&self) -> String {
        match self {
            ManifestSource::Path(path) => path.display().to_string(),
            ManifestSource::Key(key) => key.clone(),
        }
    }
}

impl std::fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id())
    }
}

impl From<PathBuf> for ManifestSource {
    fn from(path: PathBuf) -> Self {
        ManifestSource::Path(path)
    }
}

/// A parsed-but-unvalidated manifest document.
#[derive(Debug, Clone)]
pub struct RawManifest {
    /// Identifier of the source this document came from.
    pub source_id: String,
    /// The structured document, normalized to JSON form.
    pub document: serde_json::Value,
}

/// Fetches and parses manifest documents.
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    /// Load the document at `source`.
    ///
    /// Fails with [`RegistryError::SourceUnreadable`] when the source cannot
    /// be fetched and [`RegistryError::ParseError`] when it is not
    /// well-formed JSON or YAML.
    async fn load(&self, source: &ManifestSource) -> Result<RawManifest>;
}

/// Loads manifests from the local filesystem.
///
/// Format is chosen by extension (`.json`, `.yaml`, `.yml`); anything else
/// is sniffed from the content. Registry keys are rejected; wire a remote
/// loader for those.
#[derive(Debug, Clone, Default)]
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ManifestLoader for FileLoader {
    async fn load(&self, source: &ManifestSource) -> Result<RawManifest> {
        let path = match source {
            ManifestSource::Path(path) => path,
            ManifestSource::Key(key) => {
                return Err(RegistryError::SourceUnreadable {
                    source_id: key.clone(),
                    reason: "file loader cannot fetch registry keys".to_string(),
                });
            }
        };

        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            RegistryError::SourceUnreadable {
                source_id: source.id(),
                reason: e.to_string(),
            }
        })?;

        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => DocumentFormat::Json,
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => sniff_format(&text),
        };

        let document = parse_document(&text, format, &source.id())?;
        tracing::debug!(source = %source, "Loaded manifest document");

        Ok(RawManifest {
            source_id: source.id(),
            document,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Json,
    Yaml,
}

/// Guess the format from content when the extension is missing or unknown.
fn sniff_format(text: &str) -> DocumentFormat {
    match text.trim_start().chars().next() {
        Some('{') | Some('[') => DocumentFormat::Json,
        _ => DocumentFormat::Yaml,
    }
}

/// Parse serialized text into a JSON document.
fn parse_document(
    text: &str,
    format: DocumentFormat,
    source_id: &str,
) -> Result<serde_json::Value> {
    match format {
        DocumentFormat::Json => {
            serde_json::from_str(text).map_err(|e| RegistryError::ParseError {
                source_id: source_id.to_string(),
                reason: e.to_string(),
                line: Some(e.line()),
                column: Some(e.column()),
            })
        }
        DocumentFormat::Yaml => {
            serde_yaml::from_str(text).map_err(|e| {
                let location = e.location();
                RegistryError::ParseError {
                    source_id: source_id.to_string(),
                    reason: e.to_string(),
                    line: location.as_ref().map(|l| l.line()),
                    column: location.as_ref().map(|l| l.column()),
                }
            })
        }
    }
}
