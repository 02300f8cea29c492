//! Process-local TTL cache keyed by `(segment, primary key)`.
//!
//! Entries expire lazily on read; there is no size-based eviction. Every
//! segment carries an invalidation epoch so a fetch that raced with an
//! invalidation cannot write pre-invalidation data back.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::domain::PrimaryKey;

use super::config::CacheConfig;

type CachedValue = Arc<dyn Any + Send + Sync>;

struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct SegmentSlot {
    epoch: u64,
    entries: HashMap<PrimaryKey, CacheEntry>,
}

/// Snapshot of a segment's invalidation state, taken before a fetch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEpoch {
    global: u64,
    segment: u64,
}

pub struct TtlCache {
    ttl: Duration,
    segments: DashMap<String, SegmentSlot>,
    generation: AtomicU64,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            segments: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return a clone of the cached value, evicting it if it has expired.
    ///
    /// A stored value of a different type than `V` reads as absent.
    pub fn get<V>(&self, segment: &str, key: &PrimaryKey) -> Option<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        let mut slot = self.segments.get_mut(segment)?;
        let now = Instant::now();
        if slot.entries.get(key)?.is_expired(now) {
            slot.entries.remove(key);
            trace!(segment, key = %key, "Evicted expired cache entry");
            return None;
        }
        slot.entries
            .get(key)
            .and_then(|entry| entry.value.downcast_ref::<V>())
            .cloned()
    }

    pub fn set<V>(&self, segment: &str, key: PrimaryKey, value: V)
    where
        V: Send + Sync + 'static,
    {
        let expires_at = Instant::now() + self.ttl;
        let mut slot = self.segments.entry(segment.to_string()).or_default();
        slot.entries.insert(
            key,
            CacheEntry {
                value: Arc::new(value),
                expires_at,
            },
        );
    }

    /// Store `value` only if the segment was not invalidated since `epoch`.
    ///
    /// Returns whether the value was stored.
    pub fn set_if_current<V>(
        &self,
        segment: &str,
        key: PrimaryKey,
        value: V,
        epoch: CacheEpoch,
    ) -> bool
    where
        V: Send + Sync + 'static,
    {
        let expires_at = Instant::now() + self.ttl;
        let mut slot = self.segments.entry(segment.to_string()).or_default();
        // Checked under the shard lock so a concurrent delete/clear orders strictly
        // before or after this write.
        if slot.epoch != epoch.segment || self.generation.load(Ordering::Acquire) != epoch.global
        {
            debug!(segment, key = %key, "Skipped stale cache write after invalidation");
            return false;
        }
        slot.entries.insert(
            key,
            CacheEntry {
                value: Arc::new(value),
                expires_at,
            },
        );
        true
    }

    pub fn epoch(&self, segment: &str) -> CacheEpoch {
        let global = self.generation.load(Ordering::Acquire);
        let segment = self
            .segments
            .get(segment)
            .map(|slot| slot.epoch)
            .unwrap_or(0);
        CacheEpoch { global, segment }
    }

    /// Remove one entry. Returns whether an entry was present.
    pub fn delete(&self, segment: &str, key: &PrimaryKey) -> bool {
        let mut slot = self.segments.entry(segment.to_string()).or_default();
        slot.epoch = slot.epoch.wrapping_add(1);
        slot.entries.remove(key).is_some()
    }

    /// Clear one segment, or every segment when `segment` is `None`.
    pub fn clear(&self, segment: Option<&str>) {
        match segment {
            Some(segment) => {
                let mut slot = self.segments.entry(segment.to_string()).or_default();
                slot.epoch = slot.epoch.wrapping_add(1);
                slot.entries.clear();
            }
            None => {
                self.generation.fetch_add(1, Ordering::AcqRel);
                for mut slot in self.segments.iter_mut() {
                    slot.entries.clear();
                }
            }
        }
    }

    /// Drop every expired entry. Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for mut slot in self.segments.iter_mut() {
            let before = slot.entries.len();
            slot.entries.retain(|_, entry| !entry.is_expired(now));
            removed += before - slot.entries.len();
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|slot| slot.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn segment_len(&self, segment: &str) -> usize {
        self.segments
            .get(segment)
            .map(|slot| slot.entries.len())
            .unwrap_or(0)
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> TtlCache {
        TtlCache::new(Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn set_then_get_returns_value() {
        let cache = cache();
        cache.set("Post", PrimaryKey::Int(1), "hello".to_string());

        assert_eq!(
            cache.get::<String>("Post", &PrimaryKey::Int(1)),
            Some("hello".to_string())
        );
        assert_eq!(cache.get::<String>("Post", &PrimaryKey::Int(2)), None);
        assert_eq!(cache.get::<String>("Page", &PrimaryKey::Int(1)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_type_reads_as_absent() {
        let cache = cache();
        cache.set("Post", PrimaryKey::Int(1), 7_u32);
        assert_eq!(cache.get::<String>("Post", &PrimaryKey::Int(1)), None);
        assert_eq!(cache.get::<u32>("Post", &PrimaryKey::Int(1)), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_none_marker_is_cached() {
        let cache = cache();
        cache.set::<Option<String>>("Post", PrimaryKey::Int(9), None);
        assert_eq!(
            cache.get::<Option<String>>("Post", &PrimaryKey::Int(9)),
            Some(None)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_evicted_on_read() {
        let cache = cache();
        cache.set("Post", PrimaryKey::Int(1), 1_i64);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get::<i64>("Post", &PrimaryKey::Int(1)), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get::<i64>("Post", &PrimaryKey::Int(1)), None);
        assert_eq!(cache.segment_len("Post"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn set_refreshes_expiry() {
        let cache = cache();
        cache.set("Post", PrimaryKey::Int(1), 1_i64);
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.set("Post", PrimaryKey::Int(1), 2_i64);
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(cache.get::<i64>("Post", &PrimaryKey::Int(1)), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_and_clear_segment() {
        let cache = cache();
        cache.set("Post", PrimaryKey::Int(1), 1_i64);
        cache.set("Post", PrimaryKey::Int(2), 2_i64);
        cache.set("Page", PrimaryKey::Int(1), 3_i64);

        assert!(cache.delete("Post", &PrimaryKey::Int(1)));
        assert!(!cache.delete("Post", &PrimaryKey::Int(1)));
        assert_eq!(cache.get::<i64>("Post", &PrimaryKey::Int(2)), Some(2));

        cache.clear(Some("Post"));
        assert_eq!(cache.segment_len("Post"), 0);
        assert_eq!(cache.get::<i64>("Page", &PrimaryKey::Int(1)), Some(3));

        cache.clear(None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_current_rejects_after_invalidation() {
        let cache = cache();
        let epoch = cache.epoch("Post");
        assert!(cache.set_if_current("Post", PrimaryKey::Int(1), 1_i64, epoch));

        let stale = cache.epoch("Post");
        cache.delete("Post", &PrimaryKey::Int(2));
        assert!(!cache.set_if_current("Post", PrimaryKey::Int(2), 2_i64, stale));
        assert_eq!(cache.get::<i64>("Post", &PrimaryKey::Int(2)), None);

        let stale = cache.epoch("Page");
        cache.clear(None);
        assert!(!cache.set_if_current("Page", PrimaryKey::Int(1), 1_i64, stale));

        let fresh = cache.epoch("Page");
        assert!(cache.set_if_current("Page", PrimaryKey::Int(1), 1_i64, fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidating_other_segment_keeps_epoch() {
        let cache = cache();
        let epoch = cache.epoch("Post");
        cache.clear(Some("Page"));
        assert!(cache.set_if_current("Post", PrimaryKey::Int(1), 1_i64, epoch));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_sweeps_all_segments() {
        let cache = cache();
        cache.set("Post", PrimaryKey::Int(1), 1_i64);
        cache.set("Page", PrimaryKey::Int(1), 1_i64);
        tokio::time::advance(Duration::from_secs(31)).await;
        cache.set("Page", PrimaryKey::Int(2), 2_i64);

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
    }
}
