// Strict-LRU entry store backing the main cache and each category cache

use lru::LruCache;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::debug;

use super::snapshot::StoredValue;

/// A cached value with its bookkeeping.
///
/// Visible only while `now - created_at < ttl` (or when there is no ttl).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: StoredValue,
    /// Creation time, milliseconds since the Unix epoch
    pub created_at: i64,
    pub access_count: u64,
    /// Serialized size of the uncompressed value
    pub size_bytes: usize,
    pub ttl: Option<Duration>,
    pub tags: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
}

impl CacheEntry {
    pub fn new(key: String, value: StoredValue, size_bytes: usize, created_at: i64) -> Self {
        Self {
            key,
            value,
            created_at,
            access_count: 0,
            size_bytes,
            ttl: None,
            tags: BTreeSet::new(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self.ttl {
            Some(ttl) => now_ms.saturating_sub(self.created_at) >= ttl.as_millis() as i64,
            None => false,
        }
    }
}

/// `LruCache` plus byte accounting and TTL-aware reads
pub(crate) struct LruStore {
    entries: LruCache<String, CacheEntry>,
    bytes: usize,
}

impl LruStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            bytes: 0,
        }
    }

    /// Insert or replace an entry as most recently used.
    /// Returns the keys evicted to stay within capacity.
    pub fn insert(&mut self, entry: CacheEntry) -> Vec<String> {
        self.remove(&entry.key);

        self.bytes += entry.size_bytes;
        match self.entries.push(entry.key.clone(), entry) {
            Some((oldest, old)) => {
                self.bytes = self.bytes.saturating_sub(old.size_bytes);
                debug!("Evicted LRU cache entry: {}", oldest);
                vec![oldest]
            }
            None => Vec::new(),
        }
    }

    /// Look up a live entry, counting the access and refreshing its recency.
    /// Expired entries are dropped on the spot.
    pub fn get(&mut self, key: &str, now_ms: i64) -> Option<&CacheEntry> {
        if self.entries.peek(key)?.is_expired(now_ms) {
            debug!("Cache entry expired: {}", key);
            self.remove(key);
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.access_count += 1;
        Some(&*entry)
    }

    /// Whether a live entry exists, without touching recency or counters
    pub fn contains(&self, key: &str, now_ms: i64) -> bool {
        self.entries
            .peek(key)
            .map(|e| !e.is_expired(now_ms))
            .unwrap_or(false)
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.bytes = self.bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Remove every entry matching the predicate, returning how many went
    pub fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| predicate(e))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn purge_expired(&mut self, now_ms: i64) -> usize {
        self.remove_where(|e| e.is_expired(now_ms))
    }

    /// Mark an entry as most recently used without counting an access
    pub fn promote(&mut self, key: &str) -> bool {
        if !self.entries.contains(key) {
            return false;
        }
        self.entries.promote(key);
        true
    }

    pub fn peek_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.entries.peek_mut(key)
    }

    /// Entries ordered from least to most recently used
    pub fn entries_lru_order(&self) -> Vec<&CacheEntry> {
        self.entries.iter().rev().map(|(_, e)| e).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }
}
