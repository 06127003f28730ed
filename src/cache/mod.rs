// Tag- and dependency-aware in-memory cache shared by the engines

pub mod local;
pub mod snapshot;
pub mod store;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};

pub use local::LocalCache;
pub use snapshot::{CacheSnapshot, CounterSnapshot, EntrySnapshot, StoredValue, SNAPSHOT_VERSION};
pub use store::CacheEntry;
use store::LruStore;

/// Sub-cache a value belongs to.
///
/// Each category has its own capacity and TTL default, so bulk invalidation
/// of one kind of result cannot evict another kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheCategory {
    Pattern,
    Search,
    Symbol,
    Analysis,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 4] = [
        CacheCategory::Pattern,
        CacheCategory::Search,
        CacheCategory::Symbol,
        CacheCategory::Analysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Pattern => "pattern",
            CacheCategory::Search => "search",
            CacheCategory::Symbol => "symbol",
            CacheCategory::Analysis => "analysis",
        }
    }

    fn index(self) -> usize {
        match self {
            CacheCategory::Pattern => 0,
            CacheCategory::Search => 1,
            CacheCategory::Symbol => 2,
            CacheCategory::Analysis => 3,
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifetime of a stored entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Expiry {
    /// The category's TTL, or the cache-wide default for the main cache
    #[default]
    Default,
    After(Duration),
    Never,
}

/// Options for [`Cache::put`]
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub expiry: Expiry,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    pub category: Option<CacheCategory>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.expiry = Expiry::After(ttl);
        self
    }

    pub fn no_expiry(mut self) -> Self {
        self.expiry = Expiry::Never;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn category(mut self, category: CacheCategory) -> Self {
        self.category = Some(category);
        self
    }
}

/// Usage statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Live entries across the main and category caches
    pub size: usize,
    pub memory_bytes: usize,
    pub hit_rate: f64,
    /// Rolling average over the most recent timed operations, in milliseconds
    pub average_access_time_ms: f64,
    pub category_sizes: BTreeMap<CacheCategory, usize>,
}

/// Outcome of [`Cache::optimize`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeReport {
    pub expired_removed: usize,
    pub promoted: usize,
    pub compressed: usize,
}

/// Fraction of most-accessed entries promoted by `optimize`
const PROMOTE_FRACTION: f64 = 0.1;

/// The shared cache.
///
/// A main LRU store plus one LRU store per [`CacheCategory`], each behind
/// its own lock. Values are held as JSON and optionally gzip-compressed.
pub struct Cache {
    config: CacheConfig,
    main: Mutex<LruStore>,
    categories: [Mutex<LruStore>; 4],
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    access_times: Mutex<VecDeque<Duration>>,
    events: EventBus,
}

/// Stable cache key: `namespace:` followed by the blake3 hash of the
/// serialized inputs. `None` if the inputs cannot be serialized.
pub fn cache_key<T: Serialize + ?Sized>(namespace: &str, inputs: &T) -> Option<String> {
    match serde_json::to_vec(inputs) {
        Ok(bytes) => Some(format!("{}:{}", namespace, blake3::hash(&bytes).to_hex())),
        Err(e) => {
            warn!("Failed to build {} cache key: {}", namespace, e);
            None
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        let categories = CacheCategory::ALL.map(|c| Mutex::new(LruStore::new(config.category_capacity(c))));
        Self {
            main: Mutex::new(LruStore::new(config.max_entries)),
            categories,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            access_times: Mutex::new(VecDeque::new()),
            events: EventBus::new(),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Subscribe to eviction notifications
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn store(&self, category: Option<CacheCategory>) -> &Mutex<LruStore> {
        match category {
            Some(c) => &self.categories[c.index()],
            None => &self.main,
        }
    }

    fn all_stores(&self) -> impl Iterator<Item = (Option<CacheCategory>, &Mutex<LruStore>)> + '_ {
        std::iter::once((None, &self.main)).chain(
            CacheCategory::ALL
                .into_iter()
                .map(move |c| (Some(c), &self.categories[c.index()])),
        )
    }

    fn resolve_ttl(&self, expiry: Expiry, category: Option<CacheCategory>) -> Option<Duration> {
        match expiry {
            Expiry::After(ttl) => Some(ttl),
            Expiry::Never => None,
            Expiry::Default => Some(match category {
                Some(c) => Duration::from_secs(self.config.category(c).ttl_secs),
                None => self.config.default_ttl(),
            }),
        }
    }

    fn record_access(&self, started: Instant) {
        if !self.config.stats_enabled {
            return;
        }
        let mut times = self.access_times.lock();
        times.push_back(started.elapsed());
        while times.len() > self.config.access_time_window {
            times.pop_front();
        }
    }

    /// Compress when enabled and over the threshold; fall back to plain on failure
    fn encode(&self, key: &str, value: Value, raw: &[u8]) -> StoredValue {
        if self.config.compression_enabled && raw.len() > self.config.compression_threshold_bytes {
            match snapshot::compress(raw) {
                Ok(bytes) => return StoredValue::Compressed(bytes),
                Err(e) => warn!("Failed to compress cache entry {}: {}", key, e),
            }
        }
        StoredValue::Plain(value)
    }

    fn insert_entry(&self, category: Option<CacheCategory>, entry: CacheEntry) {
        let evicted = self.store(category).lock().insert(entry);
        if !evicted.is_empty() {
            self.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            for key in evicted {
                self.events.publish(EngineEvent::CacheEvicted { category, key });
            }
        }
    }

    /// Store a value. Returns `false` if the value could not be serialized.
    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: PutOptions) -> bool {
        let started = Instant::now();

        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize cache value for {}: {}", key, e);
                return false;
            }
        };
        let raw = match serde_json::to_vec(&json) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize cache value for {}: {}", key, e);
                return false;
            }
        };

        let mut entry = CacheEntry::new(key.to_string(), self.encode(key, json, &raw), raw.len(), now_ms());
        entry.ttl = self.resolve_ttl(options.expiry, options.category);
        entry.tags = options.tags.into_iter().collect();
        entry.dependencies = options.dependencies.into_iter().collect();

        debug!("Cache put: {} ({} bytes, category {:?})", key, raw.len(), options.category);
        self.insert_entry(options.category, entry);
        self.record_access(started);
        true
    }

    /// Raw JSON lookup: category cache first, then the main cache
    pub fn get_value(&self, key: &str, category: Option<CacheCategory>) -> Option<Value> {
        let started = Instant::now();
        let now = now_ms();

        let mut lookups = Vec::with_capacity(2);
        if category.is_some() {
            lookups.push(category);
        }
        lookups.push(None);

        let mut found = None;
        for target in lookups {
            let mut store = self.store(target).lock();
            let Some(entry) = store.get(key, now) else {
                continue;
            };
            match entry.value.to_value() {
                Ok(value) => {
                    found = Some(value);
                    break;
                }
                Err(e) => {
                    warn!("Dropping undecodable cache entry {}: {}", key, e);
                    store.remove(key);
                }
            }
        }

        match found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit: {}", key);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss: {}", key);
            }
        }
        self.record_access(started);
        found
    }

    /// Typed lookup. A value that no longer deserializes into `T` is a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str, category: Option<CacheCategory>) -> Option<T> {
        let value = self.get_value(key, category)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("Cached value for {} has an unexpected shape: {}", key, e);
                self.hits.fetch_sub(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Whether a live entry exists; does not affect statistics or recency
    pub fn has(&self, key: &str, category: Option<CacheCategory>) -> bool {
        let now = now_ms();
        if let Some(c) = category {
            if self.store(Some(c)).lock().contains(key, now) {
                return true;
            }
        }
        self.main.lock().contains(key, now)
    }

    /// Remove a key from the given category cache and the main cache
    pub fn delete(&self, key: &str, category: Option<CacheCategory>) -> bool {
        let mut removed = false;
        if let Some(c) = category {
            removed |= self.store(Some(c)).lock().remove(key).is_some();
        }
        removed |= self.main.lock().remove(key).is_some();
        removed
    }

    /// Remove every entry, in every sub-cache, carrying `tag`
    pub fn clear_by_tag(&self, tag: &str) -> usize {
        let removed: usize = self
            .all_stores()
            .map(|(_, store)| store.lock().remove_where(|e| e.tags.contains(tag)))
            .sum();
        debug!("Cleared {} cache entries tagged '{}'", removed, tag);
        removed
    }

    /// Remove every entry, in every sub-cache, derived from `dependency`
    pub fn clear_by_dependency(&self, dependency: &str) -> usize {
        let removed: usize = self
            .all_stores()
            .map(|(_, store)| store.lock().remove_where(|e| e.dependencies.contains(dependency)))
            .sum();
        debug!("Cleared {} cache entries depending on '{}'", removed, dependency);
        removed
    }

    /// Empty one category cache
    pub fn clear_category(&self, category: CacheCategory) {
        self.store(Some(category)).lock().clear();
    }

    /// Empty every sub-cache. Counters are kept.
    pub fn clear(&self) {
        for (_, store) in self.all_stores() {
            store.lock().clear();
        }
    }

    /// Drop expired entries everywhere, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        self.all_stores()
            .map(|(_, store)| store.lock().purge_expired(now))
            .sum()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        let mut size = 0;
        let mut memory_bytes = 0;
        let mut category_sizes = BTreeMap::new();
        for (category, store) in self.all_stores() {
            let store = store.lock();
            size += store.len();
            memory_bytes += store.bytes();
            if let Some(c) = category {
                category_sizes.insert(c, store.len());
            }
        }

        let average_access_time_ms = {
            let times = self.access_times.lock();
            if times.is_empty() {
                0.0
            } else {
                times.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>() / times.len() as f64
            }
        };

        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            size,
            memory_bytes,
            hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
            average_access_time_ms,
            category_sizes,
        }
    }

    /// Drop expired entries, promote the most-accessed fraction of each
    /// sub-cache to most-recently-used, and compress large plain values.
    pub fn optimize(&self) -> OptimizeReport {
        let now = now_ms();
        let mut report = OptimizeReport::default();

        for (_, store) in self.all_stores() {
            let mut store = store.lock();
            report.expired_removed += store.purge_expired(now);

            let mut by_access: Vec<(u64, String)> = store
                .entries_lru_order()
                .into_iter()
                .filter(|e| e.access_count > 0)
                .map(|e| (e.access_count, e.key.clone()))
                .collect();
            let promote = ((store.len() as f64 * PROMOTE_FRACTION).ceil() as usize).min(by_access.len());
            by_access.sort_by(|a, b| b.0.cmp(&a.0));
            // Promote the hottest last so it ends up most recent
            for (_, key) in by_access.into_iter().take(promote).rev() {
                if store.promote(&key) {
                    report.promoted += 1;
                }
            }

            if self.config.compression_enabled {
                let candidates: Vec<String> = store
                    .entries_lru_order()
                    .into_iter()
                    .filter(|e| !e.value.is_compressed() && e.size_bytes > self.config.compression_threshold_bytes)
                    .map(|e| e.key.clone())
                    .collect();
                for key in candidates {
                    let Some(entry) = store.peek_mut(&key) else {
                        continue;
                    };
                    let StoredValue::Plain(value) = &entry.value else {
                        continue;
                    };
                    let packed = serde_json::to_vec(value)
                        .map_err(std::io::Error::from)
                        .and_then(|raw| snapshot::compress(&raw));
                    match packed {
                        Ok(bytes) => {
                            entry.value = StoredValue::Compressed(bytes);
                            report.compressed += 1;
                        }
                        Err(e) => warn!("Failed to compress cache entry {}: {}", key, e),
                    }
                }
            }
        }

        info!(
            "Cache optimized: {} expired, {} promoted, {} compressed",
            report.expired_removed, report.promoted, report.compressed
        );
        report
    }

    /// Dump every sub-cache and the counters
    pub fn export(&self) -> CacheSnapshot {
        let now = now_ms();
        let mut main = Vec::new();
        let mut categories = BTreeMap::new();

        for (category, store) in self.all_stores() {
            let store = store.lock();
            let entries: Vec<EntrySnapshot> = store
                .entries_lru_order()
                .into_iter()
                .filter(|e| !e.is_expired(now))
                .filter_map(|e| match e.value.to_value() {
                    Ok(value) => Some(EntrySnapshot {
                        key: e.key.clone(),
                        value,
                        created_at: e.created_at,
                        access_count: e.access_count,
                        ttl_ms: e.ttl.map(|t| t.as_millis() as u64),
                        tags: e.tags.iter().cloned().collect(),
                        dependencies: e.dependencies.iter().cloned().collect(),
                    }),
                    Err(err) => {
                        warn!("Skipping undecodable cache entry {} in export: {}", e.key, err);
                        None
                    }
                })
                .collect();
            match category {
                Some(c) => {
                    categories.insert(c, entries);
                }
                None => main = entries,
            }
        }

        let snapshot = CacheSnapshot {
            version: SNAPSHOT_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            counters: CounterSnapshot {
                hits: self.hits.load(Ordering::Relaxed),
                misses: self.misses.load(Ordering::Relaxed),
                evictions: self.evictions.load(Ordering::Relaxed),
            },
            main,
            categories,
        };
        info!("Exported cache snapshot with {} entries", snapshot.entry_count());
        snapshot
    }

    /// Replace the whole cache with a snapshot, counters included.
    /// Entries that expired since the export are skipped.
    pub fn import(&self, snapshot: CacheSnapshot) -> Result<usize> {
        snapshot.check_version()?;

        self.clear();
        let now = now_ms();
        let mut imported = 0;

        let sections = std::iter::once((None, snapshot.main)).chain(
            snapshot
                .categories
                .into_iter()
                .map(|(c, entries)| (Some(c), entries)),
        );
        for (category, entries) in sections {
            for item in entries {
                let raw = match serde_json::to_vec(&item.value) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("Skipping cache entry {} in import: {}", item.key, e);
                        continue;
                    }
                };
                let mut entry = CacheEntry::new(
                    item.key.clone(),
                    self.encode(&item.key, item.value, &raw),
                    raw.len(),
                    item.created_at,
                );
                entry.access_count = item.access_count;
                entry.ttl = item.ttl_ms.map(Duration::from_millis);
                entry.tags = item.tags.into_iter().collect();
                entry.dependencies = item.dependencies.into_iter().collect();
                if entry.is_expired(now) {
                    continue;
                }
                self.store(category).lock().insert(entry);
                imported += 1;
            }
        }

        self.hits.store(snapshot.counters.hits, Ordering::Relaxed);
        self.misses.store(snapshot.counters.misses, Ordering::Relaxed);
        self.evictions.store(snapshot.counters.evictions, Ordering::Relaxed);
        self.access_times.lock().clear();

        info!("Imported cache snapshot with {} entries", imported);
        Ok(imported)
    }

    /// Periodically purge expired entries on the tokio runtime.
    /// The task ends once the cache has been dropped.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let period = self.config.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("Cache dropped, stopping cleanup task");
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!("Cleanup removed {} expired cache entries", removed);
                }
            }
        })
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
