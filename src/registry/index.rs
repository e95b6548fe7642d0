//! Registry index and resolution pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use semver::Version;
use tokio::sync::RwLock;

use crate::config::RegistryConfig;
use crate::descriptor::{ToolDescriptor, build_descriptor};
use crate::error::{RegistryError, Result, SchemaViolation};
use crate::image::{ContainerRuntime, DockerRuntime, ImageResolver, connect_docker};
use crate::manifest::{
    FileLoader, ManifestLoader, ManifestSource, RawManifest, ToolManifest, validate,
};

/// An in-flight resolution, shareable between concurrent callers of the
/// same key.
type Flight = Shared<BoxFuture<'static, Result<Arc<ToolDescriptor>>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ToolKey {
    tool_id: String,
    version: String,
}

impl std::fmt::Display for ToolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.tool_id, self.version)
    }
}

/// Per-key registry entry.
///
/// State machine: Registered (`cached` and `flight` both empty) →
/// Resolving (`flight` set) → Resolved (`cached` set) → back to Registered
/// on invalidation. Removed entirely on deregistration.
struct Entry {
    source: ManifestSource,
    /// Parsed at registration so version selection never re-parses.
    semver: Version,
    cached: Option<Arc<ToolDescriptor>>,
    flight: Option<Flight>,
}

/// The registry of tool manifests and their resolved descriptors.
///
/// An explicit, constructible instance (no process-wide singleton), so
/// tests and multi-tenant embedders can run isolated registries. Designed
/// for concurrent callers: resolutions for different keys proceed in
/// parallel, while concurrent resolutions of the same key join a single
/// in-flight pipeline.
pub struct ToolRegistry {
    loader: Arc<dyn ManifestLoader>,
    resolver: Arc<ImageResolver>,
    entries: RwLock<HashMap<ToolKey, Entry>>,
}

impl ToolRegistry {
    /// Create a registry over the given manifest loader and container
    /// runtime boundary.
    pub fn new(
        loader: Arc<dyn ManifestLoader>,
        runtime: Arc<dyn ContainerRuntime>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            loader,
            resolver: Arc::new(ImageResolver::new(runtime, &config)),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry reading manifests from the filesystem and querying
    /// the local Docker daemon.
    pub async fn with_docker(config: RegistryConfig) -> Result<Self> {
        let docker = connect_docker().await?;
        Ok(Self::new(
            Arc::new(FileLoader::new()),
            Arc::new(DockerRuntime::new(docker)),
            config,
        ))
    }

    /// Register a manifest source without validating or resolving it.
    ///
    /// The source is read once to extract `(tool_id, version)`, which is
    /// returned. Re-registering the same source for the same key is
    /// idempotent; a different source for an existing key fails with
    /// [`RegistryError::DuplicateTool`].
    pub async fn register(&self, source: ManifestSource) -> Result<(String, String)> {
        let raw = self.loader.load(&source).await?;
        let (key, semver) = extract_identity(&raw)?;

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&key) {
            if existing.source == source {
                return Ok((key.tool_id, key.version));
            }
            return Err(RegistryError::DuplicateTool {
                tool_id: key.tool_id,
                version: key.version,
            });
        }

        tracing::info!(tool = %key, source = %source, "Registered tool");
        entries.insert(
            key.clone(),
            Entry {
                source,
                semver,
                cached: None,
                flight: None,
            },
        );
        Ok((key.tool_id, key.version))
    }

    /// Resolve a tool to its descriptor, running the full pipeline on a
    /// cache miss.
    ///
    /// With `version` omitted, the highest semantic version registered for
    /// `tool_id` is selected; two registrations with equal precedence fail
    /// with [`RegistryError::AmbiguousVersion`] rather than silently picking
    /// one. The resulting descriptor is cached per key; a failed resolution
    /// leaves the entry registered and a later call retries the pipeline.
    pub async fn resolve(
        &self,
        tool_id: &str,
        version: Option<&str>,
    ) -> Result<Arc<ToolDescriptor>> {
        let key = match version {
            Some(version) => ToolKey {
                tool_id: tool_id.to_string(),
                version: version.to_string(),
            },
            None => self.highest_version(tool_id).await?,
        };

        // Fast path and flight installation under one write lock, so two
        // callers can never start two pipelines for the same key.
        let flight = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .get_mut(&key)
                .ok_or_else(|| RegistryError::ToolNotFound {
                    tool_id: key.to_string(),
                })?;

            if let Some(cached) = &entry.cached {
                return Ok(Arc::clone(cached));
            }

            match &entry.flight {
                Some(flight) => flight.clone(),
                None => {
                    let flight = run_pipeline(
                        Arc::clone(&self.loader),
                        Arc::clone(&self.resolver),
                        entry.source.clone(),
                        key.clone(),
                    )
                    .boxed()
                    .shared();
                    entry.flight = Some(flight.clone());
                    flight
                }
            }
        };

        let result = flight.clone().await;

        // Completion bookkeeping: the first waiter back detaches the flight
        // and, on success, caches the descriptor. If the slot was detached
        // by an invalidation in the meantime, the stale result is not
        // cached.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&key)
            && entry.flight.as_ref().is_some_and(|f| f.ptr_eq(&flight))
        {
            entry.flight = None;
            if let Ok(descriptor) = &result {
                entry.cached = Some(Arc::clone(descriptor));
            }
        }

        result
    }

    /// Drop cached descriptors (and detach in-flight resolutions) for a
    /// tool, keeping the registrations themselves.
    pub async fn invalidate(&self, tool_id: &str, version: Option<&str>) {
        let mut entries = self.entries.write().await;
        let mut dropped = 0usize;
        for (key, entry) in entries.iter_mut() {
            if key.tool_id == tool_id
                && version.is_none_or(|v| v == key.version)
                && (entry.cached.is_some() || entry.flight.is_some())
            {
                entry.cached = None;
                entry.flight = None;
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::debug!(tool_id, ?version, dropped, "Invalidated cached descriptors");
        }
    }

    /// Remove a registration entirely. Returns false if it did not exist.
    pub async fn deregister(&self, tool_id: &str, version: &str) -> bool {
        let key = ToolKey {
            tool_id: tool_id.to_string(),
            version: version.to_string(),
        };
        let removed = self.entries.write().await.remove(&key).is_some();
        if removed {
            tracing::info!(tool = %key, "Deregistered tool");
        }
        removed
    }

    /// All registered `(tool_id, version)` pairs, recomputed from the
    /// current index state on every call.
    pub async fn list(&self) -> Vec<(String, String)> {
        let entries = self.entries.read().await;
        let mut pairs: Vec<(&ToolKey, &Version)> = entries
            .iter()
            .map(|(key, entry)| (key, &entry.semver))
            .collect();
        pairs.sort_by(|(a, av), (b, bv)| {
            a.tool_id
                .cmp(&b.tool_id)
                .then_with(|| av.cmp_precedence(bv))
                .then_with(|| a.version.cmp(&b.version))
        });
        pairs
            .into_iter()
            .map(|(key, _)| (key.tool_id.clone(), key.version.clone()))
            .collect()
    }

    /// Number of registered entries.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Highest-precedence key for a tool id.
    async fn highest_version(&self, tool_id: &str) -> Result<ToolKey> {
        let entries = self.entries.read().await;
        let mut best: Option<(&ToolKey, &Version)> = None;
        let mut ambiguous = false;

        for (key, entry) in entries.iter() {
            if key.tool_id != tool_id {
                continue;
            }
            match &best {
                None => best = Some((key, &entry.semver)),
                Some((_, best_version)) => match entry.semver.cmp_precedence(best_version) {
                    std::cmp::Ordering::Greater => {
                        best = Some((key, &entry.semver));
                        ambiguous = false;
                    }
                    std::cmp::Ordering::Equal => ambiguous = true,
                    std::cmp::Ordering::Less => {}
                },
            }
        }

        match best {
            None => Err(RegistryError::ToolNotFound {
                tool_id: tool_id.to_string(),
            }),
            Some((key, version)) if ambiguous => Err(RegistryError::AmbiguousVersion {
                tool_id: key.tool_id.clone(),
                version: version.to_string(),
            }),
            Some((key, _)) => Ok(key.clone()),
        }
    }
}

/// The full resolution pipeline for one key:
/// load → validate → pin image → build descriptor.
async fn run_pipeline(
    loader: Arc<dyn ManifestLoader>,
    resolver: Arc<ImageResolver>,
    source: ManifestSource,
    key: ToolKey,
) -> Result<Arc<ToolDescriptor>> {
    tracing::debug!(tool = %key, source = %source, "Starting resolution pipeline");

    let raw = loader.load(&source).await?;
    validate(&raw.document)?;
    let manifest = ToolManifest::from_validated(&raw)?;

    // The source may have changed since registration; it must still declare
    // the identity it was registered under.
    if manifest.tool_id != key.tool_id || manifest.version != key.version {
        return Err(RegistryError::InconsistentResolution {
            reason: format!(
                "source {} now declares {} but was registered as {}",
                raw.source_id,
                manifest.identity(),
                key
            ),
        });
    }

    let resolved_image = resolver.resolve(&manifest.image_ref).await?;
    let descriptor = build_descriptor(manifest, resolved_image)?;

    tracing::info!(
        tool = %key,
        digest = %descriptor.resolved_image.digest,
        "Resolved tool descriptor"
    );
    Ok(Arc::new(descriptor))
}

/// Pull `(tool_id, version)` out of a raw document at registration time.
///
/// Only the identity fields are checked here; full validation waits for
/// resolution.
fn extract_identity(raw: &RawManifest) -> Result<(ToolKey, Version)> {
    let mut violations = Vec::new();

    let tool_id = match raw.document.get("tool_id") {
        Some(serde_json::Value::String(id)) if !id.trim().is_empty() => Some(id.clone()),
        Some(serde_json::Value::String(_)) => {
            violations.push(SchemaViolation::new("tool_id", "must not be empty"));
            None
        }
        Some(_) => {
            violations.push(SchemaViolation::new("tool_id", "must be a string"));
            None
        }
        None => {
            violations.push(SchemaViolation::new("tool_id", "required field is missing"));
            None
        }
    };

    let version = match raw.document.get("version") {
        Some(serde_json::Value::String(version)) => match Version::parse(version) {
            Ok(parsed) => Some((version.clone(), parsed)),
            Err(e) => {
                violations.push(SchemaViolation::new(
                    "version",
                    format!("not a semantic version: {}", e),
                ));
                None
            }
        },
        Some(_) => {
            violations.push(SchemaViolation::new("version", "must be a string"));
            None
        }
        None => {
            violations.push(SchemaViolation::new("version", "required field is missing"));
            None
        }
    };

    match (tool_id, version) {
        (Some(tool_id), Some((version, parsed))) => {
            Ok((ToolKey { tool_id, version }, parsed))
        }
        _ => Err(RegistryError::SchemaViolations { violations }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_identity() {
        let raw = RawManifest {
            source_id: "mem".to_string(),
            document: serde_json::json!({"tool_id": "x", "version": "1.2.3"}),
        };
        let (key, semver) = extract_identity(&raw).unwrap();
        assert_eq!(key.to_string(), "x@1.2.3");
        assert_eq!(semver, Version::new(1, 2, 3));
    }

    #[test]
    fn test_extract_identity_collects_both_violations() {
        let raw = RawManifest {
            source_id: "mem".to_string(),
            document: serde_json::json!({"version": 7}),
        };
        let err = extract_identity(&raw).unwrap_err();
        let paths: Vec<&str> = err.violations().iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["tool_id", "version"]);
    }
}
