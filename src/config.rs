//! Configuration for the registry and its container-runtime boundary.

use std::time::Duration;

/// Configuration for a registry instance.
///
/// Constructed explicitly by the caller and passed in; there is no hidden
/// process-wide configuration, so tests can run isolated registries side by
/// side.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Timeout for a single call to the container runtime boundary.
    pub runtime_timeout: Duration,
    /// Retry policy applied when the runtime boundary is unreachable.
    pub retry: RetryPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            runtime_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl RegistryConfig {
    /// Set the runtime boundary timeout.
    pub fn with_runtime_timeout(mut self, timeout: Duration) -> Self {
        self.runtime_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Bounded retry with exponential backoff.
///
/// Applies only to unreachable-boundary failures; a definitive "image not
/// found" answer is never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}
