//! Store configuration
//!
//! Loadable from TOML; every section is optional:
//!
//! ```toml
//! [lock]
//! acquire_timeout_ms = 5000
//! stale_threshold_ms = 30000
//!
//! [atomic]
//! rename_retry_timeout_ms = 1000
//!
//! [cache]
//! max_capacity = 500
//! ttl_ms = 30000
//! ```

use crate::error::{StoreError, StoreResult};
use plandoc_lock::LockConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Atomic write tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtomicWriteConfig {
    /// Total time the rename step may be retried on busy errors
    pub rename_retry_timeout_ms: u64,
    /// Delay between rename attempts
    pub rename_retry_interval_ms: u64,
    /// Pretty-print written JSON
    pub pretty: bool,
}

impl AtomicWriteConfig {
    /// With rename retry bounds
    #[inline]
    #[must_use]
    pub fn with_rename_retry(mut self, timeout: Duration, interval: Duration) -> Self {
        self.rename_retry_timeout_ms = millis(timeout);
        self.rename_retry_interval_ms = millis(interval).max(1);
        self
    }

    /// With compact or pretty output
    #[inline]
    #[must_use]
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Rename retry budget
    #[inline]
    #[must_use]
    pub fn rename_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.rename_retry_timeout_ms)
    }

    /// Rename retry interval
    #[inline]
    #[must_use]
    pub fn rename_retry_interval(&self) -> Duration {
        Duration::from_millis(self.rename_retry_interval_ms.max(1))
    }
}

impl Default for AtomicWriteConfig {
    fn default() -> Self {
        Self {
            rename_retry_timeout_ms: 1_000,
            rename_retry_interval_ms: 10,
            pretty: true,
        }
    }
}

/// Repository cache bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached entities per repository
    pub max_capacity: u64,
    /// Time to live for every entry
    pub ttl_ms: u64,
}

impl CacheConfig {
    /// With capacity
    #[inline]
    #[must_use]
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// With time to live
    #[inline]
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = millis(ttl);
        self
    }

    /// Time to live
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1_000,
            ttl_ms: 60_000,
        }
    }
}

/// Top-level store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Lock manager policy
    pub lock: LockConfig,
    /// Atomic write tuning
    pub atomic: AtomicWriteConfig,
    /// Repository cache; `None` disables caching
    pub cache: Option<CacheConfig>,
}

impl StoreConfig {
    /// Create default configuration (no cache)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With lock policy
    #[inline]
    #[must_use]
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// With atomic write tuning
    #[inline]
    #[must_use]
    pub fn with_atomic(mut self, atomic: AtomicWriteConfig) -> Self {
        self.atomic = atomic;
        self
    }

    /// With repository cache
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::storage(path, e))?;
        Self::from_toml_str(&text)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_toml_yields_defaults() {
        assert_eq!(StoreConfig::from_toml_str("").unwrap(), StoreConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = StoreConfig::from_toml_str(
            r"
            [lock]
            acquire_timeout_ms = 250

            [cache]
            max_capacity = 10
            ",
        )
        .unwrap();

        assert_eq!(config.lock.acquire_timeout_ms, 250);
        assert_eq!(config.lock.stale_threshold_ms, LockConfig::default().stale_threshold_ms);
        let cache = config.cache.unwrap();
        assert_eq!(cache.max_capacity, 10);
        assert_eq!(cache.ttl_ms, CacheConfig::default().ttl_ms);
    }

    #[test]
    fn unknown_value_types_are_config_errors() {
        let err = StoreConfig::from_toml_str("[lock]\nmax_retries = \"many\"").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
