//! Cache configuration.
//!
//! Controls the TTL cache and the batching window of every loader.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_TTL_MS: u64 = 30_000;
const DEFAULT_BATCH_DELAY_MS: u64 = 20;
const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Cache configuration from the `[cache]` settings section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Read and populate the TTL cache. Batching stays active when off.
    pub enabled: bool,
    /// Lifetime of a cache entry.
    pub ttl_ms: u64,
    /// Scheduling delay before a pending batch is flushed.
    pub batch_delay_ms: u64,
    /// Pending batch size that triggers an immediate flush.
    pub max_batch_size: usize,
    /// Upper bound on a single bulk fetch.
    pub fetch_timeout_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: DEFAULT_TTL_MS,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            fetch_timeout_ms: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl_ms: settings.ttl_ms.get(),
            batch_delay_ms: settings.batch_delay_ms,
            max_batch_size: settings.max_batch_size.get(),
            fetch_timeout_ms: settings.fetch_timeout_ms.map(|ms| ms.get()),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the batch size threshold as NonZeroUsize, clamping to 1 if zero.
    pub fn max_batch_size_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_batch_size).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.ttl_ms, 30_000);
        assert_eq!(config.batch_delay_ms, 20);
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.fetch_timeout_ms, None);
    }

    #[test]
    fn durations_follow_millis() {
        let config = CacheConfig {
            ttl_ms: 1_500,
            fetch_timeout_ms: Some(250),
            ..Default::default()
        };
        assert_eq!(config.ttl(), Duration::from_millis(1_500));
        assert_eq!(config.batch_delay(), Duration::from_millis(20));
        assert_eq!(config.fetch_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert_eq!(config.max_batch_size_non_zero().get(), 1);
    }

    #[test]
    fn deserializes_partial_section() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"ttl_ms": 5000, "enabled": false}"#).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.ttl_ms, 5_000);
        assert_eq!(config.max_batch_size, 100);
    }
}
