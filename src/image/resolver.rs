//! Digest pinning against the container runtime boundary.
//!
//! Resolution is the one place in the pipeline where network flakiness is
//! expected, so boundary calls get a bounded timeout and a bounded
//! retry-with-backoff. A definitive "image does not exist" answer is never
//! retried; only an unreachable boundary is.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;

use crate::config::{RegistryConfig, RetryPolicy};
use crate::error::{RegistryError, Result};
use crate::image::reference::{ImageRef, ResolvedImageRef};
use crate::image::runtime::ContainerRuntime;

/// Resolves declared image references into digest-pinned ones.
pub struct ImageResolver {
    runtime: Arc<dyn ContainerRuntime>,
    timeout: std::time::Duration,
    retry: RetryPolicy,
}

impl ImageResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &RegistryConfig) -> Self {
        Self {
            runtime,
            timeout: config.runtime_timeout,
            retry: config.retry.clone(),
        }
    }

    /// Resolve a declared reference to a digest-pinned snapshot.
    ///
    /// A declared digest is kept as-is after re-verifying the image exists.
    /// A tag-only reference is pinned to the digest the runtime reports for
    /// that tag right now; the tag is recorded alongside so later drift can
    /// be detected.
    pub async fn resolve(&self, reference: &str) -> Result<ResolvedImageRef> {
        let image = ImageRef::from_str(reference)?;
        tracing::debug!(image = %image, "Resolving image reference");

        let digest = match &image.digest {
            Some(declared) => {
                let exists = self
                    .with_retry(|| self.runtime.image_exists(&image))
                    .await?;
                if !exists {
                    return Err(RegistryError::ImageNotFound {
                        reference: reference.to_string(),
                    });
                }
                declared.clone()
            }
            None => self
                .with_retry(|| self.runtime.resolve_digest(&image))
                .await?
                .ok_or_else(|| RegistryError::ImageNotFound {
                    reference: reference.to_string(),
                })?,
        };

        let resolved = ResolvedImageRef {
            repository: image.repository,
            tag: image.tag,
            digest,
            resolved_at: Utc::now(),
        };
        tracing::debug!(pinned = %resolved, "Pinned image reference");
        Ok(resolved)
    }

    /// Run a boundary call under the configured timeout, retrying
    /// unreachable-boundary failures with exponential backoff.
    async fn with_retry<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(RegistryError::RegistryUnreachable {
                    reason: format!("runtime boundary call timed out after {:?}", self.timeout),
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Runtime boundary unreachable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
