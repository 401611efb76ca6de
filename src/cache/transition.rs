//! In-process memo of "next transition" lookups.
//!
//! Entries are keyed by time bucket, workspace and language. A cached `None`
//! ("no upcoming transition") is a real answer and is distinct from an absent
//! entry, hence the separate [`TransitionCache::has`] and
//! [`TransitionCache::get`].
//!
//! There is no expiry. [`TransitionCache::clear`] is the only eviction path,
//! so the map grows for the lifetime of the process when `now` keeps moving.

use std::collections::HashMap;
use std::sync::RwLock;

use metrics::counter;
use serde::Serialize;

use crate::domain::UnixTimestamp;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::transition";
const METRIC_HIT: &str = "tidemark_transition_cache_hit_total";
const METRIC_MISS: &str = "tidemark_transition_cache_miss_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransitionKey {
    pub bucket: i64,
    pub workspace_id: i32,
    pub language_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionCacheStats {
    pub entry_count: usize,
    /// Serialized size of all keys and values. Advisory only.
    pub approximate_memory_bytes: usize,
}

pub struct TransitionCache {
    config: CacheConfig,
    entries: RwLock<HashMap<TransitionKey, Option<UnixTimestamp>>>,
}

impl TransitionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(&self, now: UnixTimestamp, workspace_id: i32, language_id: i32) -> TransitionKey {
        TransitionKey {
            bucket: self.config.bucket_of(now),
            workspace_id,
            language_id,
        }
    }

    pub fn has(&self, now: UnixTimestamp, workspace_id: i32, language_id: i32) -> bool {
        let key = self.key(now, workspace_id, language_id);
        rw_read(&self.entries, SOURCE, "has").contains_key(&key)
    }

    /// Outer `None` means "not cached"; `Some(None)` means "cached: no transition".
    pub fn get(
        &self,
        now: UnixTimestamp,
        workspace_id: i32,
        language_id: i32,
    ) -> Option<Option<UnixTimestamp>> {
        let key = self.key(now, workspace_id, language_id);
        let value = rw_read(&self.entries, SOURCE, "get").get(&key).copied();
        match value {
            Some(_) => counter!(METRIC_HIT).increment(1),
            None => counter!(METRIC_MISS).increment(1),
        }
        value
    }

    pub fn set(
        &self,
        now: UnixTimestamp,
        workspace_id: i32,
        language_id: i32,
        value: Option<UnixTimestamp>,
    ) {
        let key = self.key(now, workspace_id, language_id);
        rw_write(&self.entries, SOURCE, "set").insert(key, value);
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> TransitionCacheStats {
        let entries = rw_read(&self.entries, SOURCE, "stats");
        let approximate_memory_bytes = entries
            .iter()
            .map(|entry| serde_json::to_vec(&entry).map_or(0, |bytes| bytes.len()))
            .sum();
        TransitionCacheStats {
            entry_count: entries.len(),
            approximate_memory_bytes,
        }
    }
}

impl Default for TransitionCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    const NOW: UnixTimestamp = 1_700_000_000;

    #[test]
    fn cached_none_is_present() {
        let cache = TransitionCache::default();
        assert!(!cache.has(NOW, 0, 0));
        assert_eq!(cache.get(NOW, 0, 0), None);

        cache.set(NOW, 0, 0, None);

        assert!(cache.has(NOW, 0, 0));
        assert_eq!(cache.get(NOW, 0, 0), Some(None));
    }

    #[test]
    fn each_dimension_separates_entries() {
        let cache = TransitionCache::default();
        cache.set(NOW, 1, 0, Some(NOW + 10));

        assert_eq!(cache.get(NOW, 1, 0), Some(Some(NOW + 10)));
        assert!(!cache.has(NOW + 1, 1, 0));
        assert!(!cache.has(NOW, 2, 0));
        assert!(!cache.has(NOW, 1, 1));

        cache.set(NOW + 1, 1, 0, Some(NOW + 20));
        cache.set(NOW, 2, 0, None);
        cache.set(NOW, 1, 1, Some(NOW + 30));

        assert_eq!(cache.len(), 4);
        assert_eq!(cache.get(NOW, 1, 0), Some(Some(NOW + 10)));
        assert_eq!(cache.get(NOW + 1, 1, 0), Some(Some(NOW + 20)));
        assert_eq!(cache.get(NOW, 2, 0), Some(None));
        assert_eq!(cache.get(NOW, 1, 1), Some(Some(NOW + 30)));
    }

    #[test]
    fn buckets_share_entries_within_window() {
        let cache = TransitionCache::new(CacheConfig {
            bucket_seconds: NonZeroU64::new(60).expect("non-zero"),
        });
        cache.set(NOW, 0, 0, Some(NOW + 500));

        let bucket_start = NOW - NOW.rem_euclid(60);
        assert!(cache.has(bucket_start + 59, 0, 0));
        assert!(!cache.has(bucket_start + 60, 0, 0));
    }

    #[test]
    fn clear_empties_cache() {
        let cache = TransitionCache::default();
        cache.set(NOW, 0, 0, Some(NOW + 1));
        cache.set(NOW, 0, 1, None);
        assert_eq!(cache.len(), 2);

        cache.clear();

        assert!(cache.is_empty());
        assert!(!cache.has(NOW, 0, 0));
    }

    #[test]
    fn stats_track_entries() {
        let cache = TransitionCache::default();
        assert_eq!(
            cache.stats(),
            TransitionCacheStats {
                entry_count: 0,
                approximate_memory_bytes: 0,
            }
        );

        cache.set(NOW, 0, 0, Some(NOW + 1));
        cache.set(NOW, 1, 0, None);

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 2);
        assert!(stats.approximate_memory_bytes > 0);
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let cache = TransitionCache::default();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = cache
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        cache.set(NOW, 0, 0, None);
        assert!(cache.has(NOW, 0, 0));
    }
}
