//! Cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds for an [`AttributeCache`](crate::AttributeCache).
///
/// Missing fields fall back to their defaults when deserializing:
///
/// ```rust
/// use ualink_cache::CacheConfig;
///
/// let config: CacheConfig = serde_json::from_str(r#"{ "max_entries": 64 }"#).unwrap();
/// assert_eq!(config.max_entries, 64);
/// assert_eq!(config.expire_after_secs, 120);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries held at once. Default: 1024.
    pub max_entries: usize,
    /// Seconds after a write at which an entry expires. Default: 120.
    pub expire_after_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            expire_after_secs: 120,
        }
    }
}

impl CacheConfig {
    /// Write-based expiry as a `Duration`.
    pub fn expire_after(&self) -> Duration {
        Duration::from_secs(self.expire_after_secs)
    }

    /// Fixes out-of-range values. A cache must hold at least one entry.
    pub fn validated(mut self) -> Self {
        if self.max_entries == 0 {
            tracing::warn!("cache max_entries is 0, using 1");
            self.max_entries = 1;
        }
        self
    }
}
