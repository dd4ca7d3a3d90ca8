//! Lock manager configuration
//!
//! Durations are stored in milliseconds so the struct can be read straight
//! from a TOML `[lock]` table.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Manager-wide lock policy
///
/// One unified retry policy applies to every resource: an acquisition fails
/// with whichever of `max_retries` or `acquire_timeout` is hit first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Default time budget for one acquisition
    pub acquire_timeout_ms: u64,
    /// Default cap on cross-process attempts for one acquisition
    pub max_retries: u32,
    /// First backoff delay between attempts
    pub retry_interval_ms: u64,
    /// Backoff ceiling
    pub max_retry_interval_ms: u64,
    /// Age after which an unrenewed lock artifact may be taken over
    pub stale_threshold_ms: u64,
    /// Upper bound on how long `dispose` waits for in-flight acquisitions
    pub dispose_timeout_ms: u64,
}

impl LockConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With default acquisition timeout
    #[inline]
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = millis(timeout);
        self
    }

    /// With default attempt cap
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// With backoff bounds
    #[inline]
    #[must_use]
    pub fn with_retry_interval(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_interval_ms = millis(initial);
        self.max_retry_interval_ms = millis(max).max(self.retry_interval_ms);
        self
    }

    /// With stale threshold
    #[inline]
    #[must_use]
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold_ms = millis(threshold);
        self
    }

    /// With dispose drain timeout
    #[inline]
    #[must_use]
    pub fn with_dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout_ms = millis(timeout);
        self
    }

    /// Default acquisition timeout
    #[inline]
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Stale threshold
    #[inline]
    #[must_use]
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }

    /// Dispose drain timeout
    #[inline]
    #[must_use]
    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.dispose_timeout_ms)
    }

    /// Delay before attempt `attempt + 1` (capped exponential)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.retry_interval_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_retry_interval_ms).max(1))
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 10_000,
            max_retries: 1_000,
            retry_interval_ms: 10,
            max_retry_interval_ms: 100,
            stale_threshold_ms: 30_000,
            dispose_timeout_ms: 5_000,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Per-call acquisition options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Holder identity; defaults to the manager's own instance id
    pub holder: Option<String>,
    /// Allow a holder that already holds the resource to acquire it again
    pub reentrant: bool,
    /// Override of [`LockConfig::acquire_timeout_ms`]
    pub timeout: Option<Duration>,
    /// Override of [`LockConfig::max_retries`]
    pub max_retries: Option<u32>,
}

impl AcquireOptions {
    /// Options with every field at its default
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire on behalf of `holder`
    #[inline]
    #[must_use]
    pub fn holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    /// Allow reentrant acquisition
    #[inline]
    #[must_use]
    pub fn reentrant(mut self) -> Self {
        self.reentrant = true;
        self
    }

    /// Time budget for this call only
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attempt cap for this call only
    #[inline]
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let config = LockConfig::default()
            .with_retry_interval(Duration::from_millis(10), Duration::from_millis(50));

        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(40));
        assert_eq!(config.backoff(4), Duration::from_millis(50));
        assert_eq!(config.backoff(400), Duration::from_millis(50));
    }

    #[test]
    fn acquire_options_builder() {
        let options = AcquireOptions::new()
            .holder("worker-1")
            .reentrant()
            .timeout(Duration::from_millis(100))
            .max_retries(3);

        assert_eq!(options.holder.as_deref(), Some("worker-1"));
        assert!(options.reentrant);
        assert_eq!(options.timeout, Some(Duration::from_millis(100)));
        assert_eq!(options.max_retries, Some(3));
    }

    #[test]
    fn config_reads_partial_toml_style_maps() {
        let config: LockConfig =
            serde_json::from_value(serde_json::json!({ "stale_threshold_ms": 500 })).unwrap();
        assert_eq!(config.stale_threshold(), Duration::from_millis(500));
        assert_eq!(config.max_retries, LockConfig::default().max_retries);
    }
}
