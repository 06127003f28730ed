// Short-lived in-process result cache checked before the shared cache

use moka::sync::Cache as MokaCache;
use std::time::Duration;

/// Small TTL-bounded map of computed results keyed by query hash.
///
/// Sits in front of the shared [`Cache`](super::Cache) so repeated identical
/// queries skip value decoding entirely.
pub struct LocalCache<V> {
    entries: MokaCache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> LocalCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let entries = MokaCache::builder()
            .max_capacity(capacity.max(1) as u64)
            .time_to_live(ttl)
            .build();
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: String, value: V) {
        self.entries.insert(key, value);
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Entry count after pending evictions have been applied
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> std::fmt::Debug for LocalCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_expiry() {
        let cache = LocalCache::new(Duration::from_millis(40), 8);
        cache.insert("q".to_string(), vec![1, 2, 3]);
        assert_eq!(cache.get("q"), Some(vec![1, 2, 3]));

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("q"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = LocalCache::new(Duration::from_secs(60), 2);
        for (i, key) in ["a", "b", "c", "d"].into_iter().enumerate() {
            cache.insert(key.to_string(), i);
        }
        assert!(cache.len() <= 2);
    }

    #[test]
    fn test_clear_hides_entries_immediately() {
        let cache = LocalCache::new(Duration::from_secs(60), 8);
        cache.insert("a".to_string(), 1);
        cache.clear();
        assert_eq!(cache.get("a"), None);
    }
}
