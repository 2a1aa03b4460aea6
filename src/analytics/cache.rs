use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Upper bound on cached views. Keys embed caller-chosen filters, so the
/// oldest entry is evicted once this is reached.
const MAX_ENTRIES: usize = 1024;

struct CachedEntry {
    generation: u64,
    stored_at: Instant,
    value: Arc<dyn Any + Send + Sync>,
}

/// Query-result cache for analytics views.
///
/// Entries are tagged with the write generation current when their
/// computation *started*. Any write bumps the generation, so results computed
/// before (or concurrently with) a write are never served afterwards. The TTL
/// bounds staleness for writes this process cannot observe, such as another
/// instance sharing the same database file.
///
/// Stale entries are dropped eagerly: `invalidate` empties the map and every
/// `insert` sweeps expired entries, so the map holds at most `MAX_ENTRIES`.
pub struct AnalyticsCache {
    ttl: Duration,
    generation: AtomicU64,
    entries: Mutex<HashMap<String, CachedEntry>>,
}

impl AnalyticsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            generation: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Current write generation. Capture this before computing a value.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Mark every cached entry stale. Called after each successful write.
    pub fn invalidate(&self) {
        let mut entries = self.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    /// Fetch a fresh entry of type `T`, if one exists.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let current = self.generation();
        let mut entries = self.lock();

        let fresh = entries
            .get(key)
            .is_some_and(|e| e.generation == current && e.stored_at.elapsed() < self.ttl);
        if !fresh {
            entries.remove(key);
            return None;
        }

        entries
            .get(key)
            .and_then(|e| Arc::clone(&e.value).downcast::<T>().ok())
    }

    /// Store a value computed at `generation`. Values from a superseded
    /// generation are dropped instead of cached.
    pub fn insert<T>(&self, key: impl Into<String>, generation: u64, value: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        if self.ttl.is_zero() {
            return;
        }
        let key = key.into();
        let mut entries = self.lock();
        // Checked under the lock so a concurrent `invalidate` cannot clear
        // the map between the check and the insert.
        let current = self.generation();
        if generation != current {
            return;
        }

        entries.retain(|_, e| e.generation == current && e.stored_at.elapsed() < self.ttl);
        if entries.len() >= MAX_ENTRIES && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CachedEntry {
                generation,
                stored_at: Instant::now(),
                value,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_insert() {
        let cache = AnalyticsCache::new(Duration::from_secs(60));
        let generation = cache.generation();
        cache.insert("k", generation, Arc::new(42u64));

        assert_eq!(cache.get::<u64>("k").as_deref(), Some(&42));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_discards_entries() {
        let cache = AnalyticsCache::new(Duration::from_secs(60));
        cache.insert("k", cache.generation(), Arc::new("v".to_string()));

        cache.invalidate();
        assert!(cache.get::<String>("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_value_computed_before_write_is_not_cached() {
        let cache = AnalyticsCache::new(Duration::from_secs(60));
        let started_at = cache.generation();
        // A write lands while the value is being computed.
        cache.invalidate();
        cache.insert("k", started_at, Arc::new(1u32));

        assert!(cache.get::<u32>("k").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = AnalyticsCache::new(Duration::from_millis(20));
        cache.insert("k", cache.generation(), Arc::new(1u32));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get::<u32>("k").is_none());
    }

    #[test]
    fn test_zero_ttl_disables_caching() {
        let cache = AnalyticsCache::new(Duration::ZERO);
        cache.insert("k", cache.generation(), Arc::new(1u32));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_releases_all_entries() {
        let cache = AnalyticsCache::new(Duration::from_secs(60));
        for i in 0..500 {
            cache.insert(format!("summary:{i}"), cache.generation(), Arc::new(i));
        }
        assert_eq!(cache.len(), 500);

        for _ in 0..100 {
            cache.invalidate();
        }
        assert!(cache.is_empty());

        cache.insert("other", cache.generation(), Arc::new(0u32));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_keys_are_capped() {
        let cache = AnalyticsCache::new(Duration::from_secs(60));
        for i in 0..(MAX_ENTRIES * 10) {
            cache.insert(format!("buckets:from={i}"), cache.generation(), Arc::new(i));
        }
        assert_eq!(cache.len(), MAX_ENTRIES);
        // The newest key survives eviction.
        let last = MAX_ENTRIES * 10 - 1;
        assert_eq!(
            cache.get::<usize>(&format!("buckets:from={last}")).as_deref(),
            Some(&last)
        );
    }

    #[test]
    fn test_insert_sweeps_expired_entries() {
        let cache = AnalyticsCache::new(Duration::from_millis(20));
        for i in 0..10u32 {
            cache.insert(format!("k{i}"), cache.generation(), Arc::new(i));
        }
        std::thread::sleep(Duration::from_millis(40));
        cache.insert("fresh", cache.generation(), Arc::new(0u32));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_type_mismatch_is_a_miss() {
        let cache = AnalyticsCache::new(Duration::from_secs(60));
        cache.insert("k", cache.generation(), Arc::new(1u32));
        assert!(cache.get::<String>("k").is_none());
    }
}
