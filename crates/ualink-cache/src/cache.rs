//! The cache itself.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;
use ualink_protocol::{AttributeId, NodeId};
use ualink_timer::{Clock, SystemClock};

use crate::stats::StatsCounters;
use crate::{CacheConfig, CacheStats};

/// Cache key: one attribute of one node.
pub type CacheKey = (NodeId, AttributeId);

// =============================================================================
// Store
// =============================================================================

#[derive(Debug)]
struct Entry<V> {
    value: V,
    written: Instant,
    /// Logical access time; larger is more recent.
    touched: u64,
}

/// The bounded map. Rebuilt from scratch when the bounds change.
#[derive(Debug)]
struct Store<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    /// Every key by its `touched` stamp, least recently used first.
    recency: BTreeMap<u64, CacheKey>,
    max_entries: usize,
    expire_after: Duration,
    next_touch: u64,
}

impl<V> Store<V> {
    fn new(max_entries: usize, expire_after: Duration) -> Self {
        Self {
            entries: HashMap::with_capacity(max_entries.min(1024)),
            recency: BTreeMap::new(),
            max_entries,
            expire_after,
            next_touch: 0,
        }
    }

    fn touch(&mut self) -> u64 {
        self.next_touch += 1;
        self.next_touch
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.written) >= self.expire_after
    }

    fn insert(&mut self, key: CacheKey, value: V, now: Instant) {
        let touched = self.touch();
        self.recency.insert(touched, key.clone());
        let old = self.entries.insert(
            key,
            Entry {
                value,
                written: now,
                touched,
            },
        );
        if let Some(old) = old {
            self.recency.remove(&old.touched);
        }
    }

    /// Marks `key` as just used. Returns its value.
    fn touch_key(&mut self, key: &CacheKey) -> Option<&V> {
        let touched = self.touch();
        let entry = self.entries.get_mut(key)?;
        let old = std::mem::replace(&mut entry.touched, touched);
        self.recency.remove(&old);
        self.recency.insert(touched, key.clone());
        self.entries.get(key).map(|e| &e.value)
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.touched);
        Some(entry)
    }

    /// Keeps only the entries `keep` accepts. Returns how many were dropped.
    fn retain(&mut self, mut keep: impl FnMut(&CacheKey, &Entry<V>) -> bool) -> u64 {
        let before = self.entries.len();
        let recency = &mut self.recency;
        self.entries.retain(|key, entry| {
            let kept = keep(key, entry);
            if !kept {
                recency.remove(&entry.touched);
            }
            kept
        });
        (before - self.entries.len()) as u64
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// Drops every expired entry. Returns how many were dropped.
    fn purge_expired(&mut self, now: Instant) -> u64 {
        let expire_after = self.expire_after;
        self.retain(|_, e| now.saturating_duration_since(e.written) < expire_after)
    }

    /// Drops least recently used entries until one more fits.
    fn evict_for_insert(&mut self) -> u64 {
        let mut evicted = 0;
        while self.entries.len() >= self.max_entries {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            evicted += 1;
        }
        evicted
    }

    /// Empties the store, returning live entries least recently used first.
    fn drain_by_recency(&mut self) -> Vec<(CacheKey, V)> {
        let recency = std::mem::take(&mut self.recency);
        let drained = recency
            .into_values()
            .filter_map(|key| self.entries.remove(&key).map(|e| (key, e.value)))
            .collect();
        self.entries.clear();
        drained
    }
}

// =============================================================================
// AttributeCache
// =============================================================================

/// A bounded, write-expiring map from `(NodeId, AttributeId)` to `V`.
///
/// # Thread Safety
///
/// `Send + Sync`; every operation takes one short `parking_lot::Mutex`
/// critical section. Reads update recency, so there is no read-only path
/// and no point in an `RwLock`.
///
/// # Reconfiguration
///
/// [`set_max_entries`](Self::set_max_entries) and
/// [`set_expire_after`](Self::set_expire_after) build a new store with the
/// new bounds and re-insert every live entry, least recently used first.
/// Re-insertion counts as a write, so expiry restarts for every entry kept.
/// Shrinking below the current size evicts the least recently used.
pub struct AttributeCache<V> {
    store: Mutex<Store<V>>,
    clock: Arc<dyn Clock>,
    stats: StatsCounters,
}

impl<V: Clone> AttributeCache<V> {
    /// Creates a cache with the given bounds, reading time from `clock`.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let config = config.validated();
        debug!(
            max_entries = config.max_entries,
            expire_after_secs = config.expire_after_secs,
            "attribute cache created"
        );
        Self {
            store: Mutex::new(Store::new(config.max_entries, config.expire_after())),
            clock,
            stats: StatsCounters::default(),
        }
    }

    /// 1024 entries, two-minute expiry, system clock.
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default(), Arc::new(SystemClock))
    }

    /// Returns the cached value, if present and not expired.
    ///
    /// Always `None` for [`AttributeId::Value`].
    pub fn get(&self, node: &NodeId, attribute: AttributeId) -> Option<V> {
        if attribute == AttributeId::Value {
            self.stats.miss();
            return None;
        }

        let now = self.clock.now();
        let mut store = self.store.lock();
        let key = (node.clone(), attribute);

        let expired = match store.entries.get(&key) {
            None => {
                self.stats.miss();
                return None;
            }
            Some(entry) => store.is_expired(entry, now),
        };
        if expired {
            store.remove(&key);
            self.stats.expired(1);
            self.stats.miss();
            return None;
        }

        let value = store.touch_key(&key)?.clone();
        self.stats.hit();
        Some(value)
    }

    /// Stores a value, replacing any previous one for the same key.
    ///
    /// A no-op for [`AttributeId::Value`].
    pub fn put(&self, node: &NodeId, attribute: AttributeId, value: V) {
        if attribute == AttributeId::Value {
            return;
        }
        let now = self.clock.now();
        let mut store = self.store.lock();
        self.insert(&mut store, (node.clone(), attribute), value, now);
    }

    fn insert(&self, store: &mut Store<V>, key: CacheKey, value: V, now: Instant) {
        if !store.entries.contains_key(&key) && store.entries.len() >= store.max_entries {
            // Expired entries go first; evict live ones only if still full.
            let expired = store.purge_expired(now);
            if expired > 0 {
                self.stats.expired(expired);
            }
            let evicted = store.evict_for_insert();
            if evicted > 0 {
                self.stats.evicted(evicted);
                debug!(evicted, max_entries = store.max_entries, "attribute cache full, evicted");
            }
        }
        store.insert(key, value, now);
    }

    /// Removes every cached attribute of `node`.
    pub fn invalidate(&self, node: &NodeId) {
        self.store.lock().retain(|(n, _), _| n != node);
    }

    /// Removes one cached attribute of `node`, leaving its others alone.
    pub fn invalidate_attribute(&self, node: &NodeId, attribute: AttributeId) {
        self.store.lock().remove(&(node.clone(), attribute));
    }

    /// Empties the cache.
    pub fn invalidate_all(&self) {
        self.store.lock().clear();
    }

    /// Number of entries currently held, including any expired ones not
    /// yet dropped.
    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current size bound.
    pub fn max_entries(&self) -> usize {
        self.store.lock().max_entries
    }

    /// Current write-based expiry.
    pub fn expire_after(&self) -> Duration {
        self.store.lock().expire_after
    }

    /// Changes the size bound, keeping existing entries.
    pub fn set_max_entries(&self, max_entries: usize) {
        let mut store = self.store.lock();
        let expire_after = store.expire_after;
        self.rebuild(&mut store, max_entries.max(1), expire_after);
    }

    /// Changes the write-based expiry, keeping existing entries.
    pub fn set_expire_after(&self, expire_after: Duration) {
        let mut store = self.store.lock();
        let max_entries = store.max_entries;
        self.rebuild(&mut store, max_entries, expire_after);
    }

    /// Applies both bounds from a config at once.
    pub fn reconfigure(&self, config: CacheConfig) {
        let config = config.validated();
        let mut store = self.store.lock();
        self.rebuild(&mut store, config.max_entries, config.expire_after());
    }

    fn rebuild(&self, store: &mut Store<V>, max_entries: usize, expire_after: Duration) {
        let now = self.clock.now();
        let expired = store.purge_expired(now);
        if expired > 0 {
            self.stats.expired(expired);
        }

        let live = store.drain_by_recency();
        let kept = live.len();

        let mut fresh = Store::new(max_entries, expire_after);
        for (key, value) in live {
            self.insert(&mut fresh, key, value, now);
        }
        *store = fresh;

        debug!(
            max_entries,
            expire_after_secs = expire_after.as_secs(),
            kept,
            "attribute cache reconfigured"
        );
    }

    /// Snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

impl<V> std::fmt::Debug for AttributeCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.lock();
        f.debug_struct("AttributeCache")
            .field("len", &store.entries.len())
            .field("max_entries", &store.max_entries)
            .field("expire_after", &store.expire_after)
            .finish()
    }
}
