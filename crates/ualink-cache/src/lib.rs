//! Node attribute cache for ualink.
//!
//! Attributes other than `Value` rarely change (a node's data type, display
//! name or access level), so the client remembers what it last read and
//! skips the round trip next time. The cache is bounded two ways:
//!
//! - **Size**: at most `max_entries` entries; inserting beyond that evicts
//!   the least recently used one.
//! - **Age**: an entry expires `expire_after` after it was written,
//!   regardless of how often it is read.
//!
//! `Value` is never cached. Live values are what subscriptions are for;
//! a cached value would just be a stale one.
//!
//! ```rust
//! use ualink_cache::AttributeCache;
//! use ualink_protocol::{AttributeId, NodeId};
//!
//! let cache: AttributeCache<String> = AttributeCache::with_defaults();
//! let node = NodeId::string(2, "Pump1");
//!
//! cache.put(&node, AttributeId::DisplayName, "Pump 1".to_string());
//! assert_eq!(cache.get(&node, AttributeId::DisplayName).as_deref(), Some("Pump 1"));
//!
//! cache.put(&node, AttributeId::Value, "42".to_string());
//! assert_eq!(cache.get(&node, AttributeId::Value), None);
//! ```

mod cache;
mod config;
mod stats;

pub use cache::{AttributeCache, CacheKey};
pub use config::CacheConfig;
pub use stats::CacheStats;
