//! Hit/miss accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// A snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing, or only an expired entry.
    pub misses: u64,
    /// Entries removed to stay within `max_entries`.
    pub evictions: u64,
    /// Entries dropped because they outlived `expire_after`.
    pub expirations: u64,
}

impl CacheStats {
    /// Total lookups.
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups that hit, or 1.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        match self.requests() {
            0 => 1.0,
            n => self.hits as f64 / n as f64,
        }
    }
}

/// Live counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evicted(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn expired(&self, n: u64) {
        self.expirations.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}
