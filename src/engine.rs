// Engine facade: one shared cache injected into both engines

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{Cache, CacheSnapshot};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::EngineEvent;
use crate::index::IndexSnapshot;
use crate::pattern::{Pattern, PatternMatcher};
use crate::query::SearchEngine;

/// Everything needed to restore an [`Engine`]: cache contents, registered
/// patterns and the symbol index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub exported_at: String,
    pub cache: CacheSnapshot,
    pub patterns: Vec<Pattern>,
    pub index: IndexSnapshot,
}

/// Owns the cache, the pattern matcher and the search engine.
///
/// Construction is explicit: the cache is built once from the config and
/// handed to both engines, so they share stores, statistics and the event
/// bus.
pub struct Engine {
    config: Config,
    cache: Arc<Cache>,
    patterns: PatternMatcher,
    search: SearchEngine,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(Cache::new(config.cache.clone()));
        let patterns = PatternMatcher::new(Arc::clone(&cache), config.patterns.clone());
        let search = SearchEngine::new(Arc::clone(&cache), config.search.clone());
        info!(
            "Engine ready: cache capacity {}, {} patterns registered",
            config.cache.max_entries,
            patterns.len()
        );
        Ok(Self {
            config,
            cache,
            patterns,
            search,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn patterns(&self) -> &PatternMatcher {
        &self.patterns
    }

    pub fn search(&self) -> &SearchEngine {
        &self.search
    }

    /// Events from the cache and both engines, on one channel
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.cache.events().subscribe()
    }

    /// Start the periodic expired-entry sweep. Must be called on a tokio runtime.
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        self.cache.spawn_cleanup()
    }

    pub fn export_snapshot(&self) -> EngineSnapshot {
        let snapshot = EngineSnapshot {
            exported_at: chrono::Utc::now().to_rfc3339(),
            cache: self.cache.export(),
            patterns: self.patterns.export_patterns(),
            index: self.search.export_index(),
        };
        info!(
            "Exported engine snapshot: {} cache entries, {} patterns, {} symbols",
            snapshot.cache.entry_count(),
            snapshot.patterns.len(),
            snapshot.index.symbols.len()
        );
        snapshot
    }

    /// Restore patterns, then the index, then the cache.
    ///
    /// The snapshot is checked before anything changes, so a rejected
    /// snapshot leaves the engine as it was. The cache goes last: registering
    /// patterns and rebuilding the index invalidate cached results, which
    /// would otherwise drop imported entries.
    pub fn import_snapshot(&self, snapshot: EngineSnapshot) -> Result<()> {
        snapshot.cache.check_version()?;
        self.patterns.check_patterns(&snapshot.patterns)?;

        let patterns = self.patterns.restore_patterns(snapshot.patterns)?;
        let stats = self.search.import_index(snapshot.index);
        let entries = self.cache.import(snapshot.cache)?;
        info!(
            "Imported engine snapshot from {}: {} patterns, {} symbols, {} cache entries",
            snapshot.exported_at, patterns, stats.total_symbols, entries
        );
        Ok(())
    }

    /// Write the engine snapshot as JSON
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string(&self.export_snapshot())?;
        std::fs::write(path.as_ref(), json)?;
        info!("Saved engine snapshot to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let snapshot: EngineSnapshot = serde_json::from_str(&content)
            .map_err(|e| Error::Snapshot(format!("{}: {}", path.as_ref().display(), e)))?;
        self.import_snapshot(snapshot)
    }

    /// Replace the symbol index with the contents of a JSON index file
    /// (`{"symbols": [...], "relationships": [...]}`)
    pub fn load_index_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let snapshot: IndexSnapshot = serde_json::from_str(&content)?;
        let stats = self.search.import_index(snapshot);
        info!(
            "Loaded {} symbols from {}",
            stats.total_symbols,
            path.as_ref().display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheCategory, PutOptions};
    use crate::index::{Relationship, RelationshipKind, Symbol, SymbolKind};
    use crate::pattern::PatternQuery;
    use crate::query::SearchQuery;
    use tempfile::tempdir;

    fn engine() -> Engine {
        Engine::new(Config::default()).unwrap()
    }

    fn populate(engine: &Engine) {
        engine.search().update_index(
            vec![
                Symbol::new("a", "loadConfig", SymbolKind::Function, "src/config.ts", "typescript"),
                Symbol::new("b", "Config", SymbolKind::Class, "src/config.ts", "typescript"),
            ],
            vec![Relationship::new("a", "b", RelationshipKind::Uses)],
        );
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = Config::default();
        config.cache.max_entries = 0;
        assert!(matches!(Engine::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_engines_share_one_cache() {
        let engine = engine();
        populate(&engine);
        engine.search().search_symbols(&SearchQuery::exact("loadConfig")).unwrap();
        engine
            .patterns()
            .find_matches(&Default::default(), Some("def f(a, b, c, d, e):\n    pass\n"), Some("python"))
            .unwrap();

        let sizes = engine.cache().stats().category_sizes;
        assert_eq!(sizes[&CacheCategory::Search], 1);
        assert_eq!(sizes[&CacheCategory::Pattern], 1);
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");

        let source = engine();
        populate(&source);
        source.cache().put("note", &"kept", PutOptions::new().tags(["manual"]));
        source.save_snapshot(&path).unwrap();

        let target = engine();
        target.load_snapshot(&path).unwrap();
        assert_eq!(target.search().stats(), source.search().stats());
        assert_eq!(target.patterns().len(), source.patterns().len());
        assert_eq!(target.cache().get::<String>("note", None).as_deref(), Some("kept"));
        assert_eq!(target.search().find_references("a").unwrap().len(), 1);
    }

    #[test]
    fn test_load_snapshot_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(engine().load_snapshot(&path), Err(Error::Snapshot(_))));
    }

    #[test]
    fn test_load_index_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(
            &path,
            r#"{"symbols": [{"id": "s1", "name": "main", "kind": "function",
                "location": {"file": "src/main.rs", "line": 1, "column": 0, "end_line": 3, "end_column": 1},
                "language": "rust"}]}"#,
        )
        .unwrap();

        let engine = engine();
        engine.load_index_file(&path).unwrap();
        assert_eq!(engine.search().get_symbol("s1").unwrap().name, "main");
    }

    #[test]
    fn test_rejected_snapshot_leaves_engine_untouched() {
        let source = engine();
        populate(&source);
        let mut snapshot = source.export_snapshot();
        snapshot.cache.version = 99;

        let target = engine();
        target
            .search()
            .update_index(vec![Symbol::new("z", "main", SymbolKind::Function, "main.rs", "rust")], vec![]);
        let patterns_before = target.patterns().len();

        assert!(matches!(target.import_snapshot(snapshot), Err(Error::Snapshot(_))));
        assert_eq!(target.search().stats().total_symbols, 1);
        assert!(target.search().get_symbol("z").is_some());
        assert_eq!(target.patterns().len(), patterns_before);
    }

    #[test]
    fn test_invalid_pattern_in_snapshot_changes_nothing() {
        let source = engine();
        populate(&source);
        let mut snapshot = source.export_snapshot();
        snapshot.patterns[0].definition.query = String::new();

        let target = engine();
        assert!(target.import_snapshot(snapshot).is_err());
        assert_eq!(target.search().stats().total_symbols, 0);
    }

    #[test]
    fn test_restored_results_are_served_from_cache() {
        let code = "def f(a, b, c, d, e):\n    pass\n";
        let search = SearchQuery::exact("loadConfig");
        let patterns = PatternQuery::new();

        let source = engine();
        populate(&source);
        let searched = source.search().search_symbols(&search).unwrap();
        let matched = source.patterns().find_matches(&patterns, Some(code), Some("python")).unwrap();
        assert_eq!(matched.len(), 1);

        let target = engine();
        target.import_snapshot(source.export_snapshot()).unwrap();
        let before = target.cache().stats();

        assert_eq!(target.search().search_symbols(&search).unwrap(), searched);
        assert_eq!(
            target.patterns().find_matches(&patterns, Some(code), Some("python")).unwrap(),
            matched
        );

        let after = target.cache().stats();
        assert_eq!(after.hits, before.hits + 2);
        assert_eq!(after.misses, before.misses);
    }

    #[test]
    fn test_restore_matches_source_registry() {
        let source = engine();
        assert!(source.patterns().unregister_pattern("long-parameter-list"));

        let target = engine();
        target.import_snapshot(source.export_snapshot()).unwrap();
        assert!(target.patterns().get_pattern("long-parameter-list").is_none());
        assert_eq!(target.patterns().len(), source.patterns().len());
    }
}
