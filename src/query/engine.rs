// Search engine: symbol queries over the index, cached through the shared cache

use parking_lot::RwLock;
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::similarity::{normalize_identifier, similarity};
use super::{
    HighlightRange, MatchInfo, MatchType, PatternSearchType, SearchOptions, SearchQuery, SearchResult, SearchScope,
    SearchType,
};
use crate::cache::{cache_key, Cache, CacheCategory, LocalCache, PutOptions};
use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::index::symbol_index::tokenize;
use crate::index::{IndexSnapshot, IndexStats, Relationship, Symbol, SymbolIndex, SymbolKind};
use crate::pattern::compiler::compile_query;
use crate::pattern::executor::{execute, ScannedCode};

/// Tag carried by every cached search result list
pub const SEARCH_TAG: &str = "search";

const EXACT_SCORE: f64 = 100.0;
const CASE_INSENSITIVE_SCORE: f64 = 80.0;
const SUBSTRING_SCORE: f64 = 60.0;
const SIGNATURE_BONUS: f64 = 30.0;
const DOCUMENTATION_BONUS: f64 = 20.0;
const CALLABLE_BONUS: f64 = 10.0;
/// Fuzzy-only candidates score `similarity * FUZZY_WEIGHT`, below substring
const FUZZY_WEIGHT: f64 = 50.0;
const REGEX_SCORE: f64 = 50.0;
const TOKEN_SCORE: f64 = 40.0;

const NAME_WEIGHT: f64 = 0.4;
const SIGNATURE_WEIGHT: f64 = 0.3;
const MODULE_BONUS: f64 = 0.2;
const NAMESPACE_BONUS: f64 = 0.1;

/// Why a symbol became a candidate
#[derive(Debug, Clone)]
enum Hit {
    Name,
    Fuzzy(f64),
    Regex(Vec<HighlightRange>),
    Token,
}

struct IndexState {
    index: Arc<SymbolIndex>,
    generation: u64,
    /// Content digest of `index`, part of every search cache key
    fingerprint: String,
}

/// Answers symbol queries against the current index.
///
/// The index is replaced wholesale by `update_index`; queries take a
/// snapshot (`Arc`) of the index under a read lock and never observe a
/// partially built one.
pub struct SearchEngine {
    state: RwLock<IndexState>,
    cache: Arc<Cache>,
    local: LocalCache<Vec<SearchResult>>,
    config: SearchConfig,
    events: EventBus,
}

impl SearchEngine {
    pub fn new(cache: Arc<Cache>, config: SearchConfig) -> Self {
        Self {
            state: RwLock::new(IndexState {
                fingerprint: SymbolIndex::new().fingerprint(),
                index: Arc::new(SymbolIndex::new()),
                generation: 0,
            }),
            local: LocalCache::new(
                Duration::from_secs(config.local_cache_ttl_secs),
                config.local_cache_capacity,
            ),
            events: cache.events().clone(),
            cache,
            config,
        }
    }

    fn snapshot(&self) -> (Arc<SymbolIndex>, String) {
        let state = self.state.read();
        (Arc::clone(&state.index), state.fingerprint.clone())
    }

    /// Replace the index with one built from `symbols` and `relationships`.
    ///
    /// The new index is built before the lock is taken; readers see either
    /// the old index or the new one. Cached search results are dropped.
    pub fn update_index(&self, symbols: Vec<Symbol>, relationships: Vec<Relationship>) -> IndexStats {
        let index = SymbolIndex::build(symbols, relationships);
        let stats = index.stats();
        let fingerprint = index.fingerprint();

        let generation = {
            let mut state = self.state.write();
            state.generation += 1;
            state.index = Arc::new(index);
            state.fingerprint = fingerprint;
            state.generation
        };

        self.local.clear();
        let dropped = self.cache.clear_by_tag(SEARCH_TAG);
        info!(
            "Index updated (generation {}): {} symbols, {} relationships, {} files; dropped {} cached searches",
            generation, stats.total_symbols, stats.total_relationships, stats.total_files, dropped
        );
        self.events.publish(EngineEvent::IndexUpdated {
            generation,
            symbols: stats.total_symbols,
            relationships: stats.total_relationships,
        });
        stats
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn get_symbol(&self, id: &str) -> Option<Symbol> {
        self.snapshot().0.get(id).cloned()
    }

    pub fn stats(&self) -> IndexStats {
        self.snapshot().0.stats()
    }

    pub fn languages(&self) -> Vec<String> {
        self.snapshot().0.languages()
    }

    /// Search symbols: local cache, then the shared cache, then compute
    pub fn search_symbols(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        query.validate()?;
        let (index, fingerprint) = self.snapshot();
        let key = cache_key("search", &(query, &fingerprint));

        if let Some(key) = &key {
            if let Some(hit) = self.local.get(key) {
                debug!("Search '{}' served from local cache", query.text);
                return Ok(hit);
            }
            if let Some(hit) = self.cache.get::<Vec<SearchResult>>(key, Some(CacheCategory::Search)) {
                debug!("Search '{}' served from shared cache", query.text);
                self.local.insert(key.clone(), hit.clone());
                return Ok(hit);
            }
        }

        let results = self.compute(&index, query);

        if let Some(key) = key {
            let mut tags: BTreeSet<String> = BTreeSet::new();
            tags.insert(SEARCH_TAG.to_string());
            tags.extend(query.filters.languages.iter().cloned());
            for result in &results {
                tags.insert(result.symbol.language.clone());
                tags.insert(format!("file:{}", result.symbol.location.file));
            }
            let dependencies: Vec<String> = results.iter().map(|r| r.symbol.id.clone()).collect();
            let options = PutOptions::new()
                .ttl(Duration::from_secs(self.config.cache_ttl_secs))
                .tags(tags)
                .dependencies(dependencies)
                .category(CacheCategory::Search);
            self.cache.put(&key, &results, options);
            self.local.insert(key, results.clone());
        }
        Ok(results)
    }

    fn compute(&self, index: &SymbolIndex, query: &SearchQuery) -> Vec<SearchResult> {
        let text = query.text.trim();
        let candidates = self.candidates(index, query, text);
        let file_glob = query
            .filters
            .file_pattern
            .as_deref()
            .and_then(|p| glob::Pattern::new(p).ok());

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .filter_map(|(id, hit)| index.get(&id).map(|symbol| (symbol, hit)))
            .filter(|(symbol, _)| passes_filters(symbol, query, file_glob.as_ref()))
            .map(|(symbol, hit)| {
                let match_info = score(symbol, text, &query.options, &hit);
                self.result(index, symbol, match_info, &query.options)
            })
            .collect();

        sort_results(&mut results);
        results.truncate(query.options.max_results.unwrap_or(self.config.max_results));
        debug!(
            "Search '{}' ({}) computed {} results",
            text,
            query.search_type.as_str(),
            results.len()
        );
        results
    }

    fn candidates(&self, index: &SymbolIndex, query: &SearchQuery, text: &str) -> HashMap<String, Hit> {
        let case_sensitive = query.options.case_sensitive;
        let mut hits: HashMap<String, Hit> = HashMap::new();

        match query.search_type {
            SearchType::Exact => {
                if let Some(ids) = index.ids_by_name(text) {
                    for id in ids {
                        let exact = index.get(id).is_some_and(|s| s.name == text);
                        if exact || !case_sensitive {
                            hits.insert(id.clone(), Hit::Name);
                        }
                    }
                }
            }
            SearchType::Fuzzy => self.fuzzy_candidates(index, text, case_sensitive, &mut hits),
            SearchType::Regex => {
                let regex = match RegexBuilder::new(text).case_insensitive(!case_sensitive).build() {
                    Ok(regex) => regex,
                    Err(e) => {
                        warn!("Invalid search regex '{}': {}", text, e);
                        return hits;
                    }
                };
                for symbol in index.symbols() {
                    if let Some(m) = regex.find(&symbol.name) {
                        let highlight = char_range(&symbol.name, m.start(), m.end());
                        hits.insert(symbol.id.clone(), Hit::Regex(vec![highlight]));
                    }
                }
            }
            SearchType::Semantic => {
                self.fuzzy_candidates(index, text, case_sensitive, &mut hits);
                for token in tokenize(text) {
                    if let Some(ids) = index.ids_by_token(&token) {
                        for id in ids {
                            hits.entry(id.clone()).or_insert(Hit::Token);
                        }
                    }
                }
            }
        }

        if query.options.cross_language {
            let normalized = normalize_identifier(text);
            for (_, ids) in index.names() {
                for id in ids {
                    let same = index
                        .get(id)
                        .is_some_and(|s| normalize_identifier(&s.name) == normalized);
                    if same {
                        hits.entry(id.clone()).or_insert(Hit::Name);
                    }
                }
            }
        }
        hits
    }

    /// Names similar enough to `text`, plus names containing it
    fn fuzzy_candidates(&self, index: &SymbolIndex, text: &str, case_sensitive: bool, hits: &mut HashMap<String, Hit>) {
        if case_sensitive {
            for symbol in index.symbols() {
                let sim = similarity(&symbol.name, text);
                if sim > self.config.fuzzy_threshold || symbol.name.contains(text) {
                    hits.insert(symbol.id.clone(), Hit::Fuzzy(sim));
                }
            }
            return;
        }
        let needle = text.to_lowercase();
        for (name, ids) in index.names() {
            let sim = similarity(name, &needle);
            if sim > self.config.fuzzy_threshold || name.contains(needle.as_str()) {
                for id in ids {
                    hits.insert(id.clone(), Hit::Fuzzy(sim));
                }
            }
        }
    }

    fn result(&self, index: &SymbolIndex, symbol: &Symbol, match_info: MatchInfo, options: &SearchOptions) -> SearchResult {
        let references = if options.include_references {
            references_from(index, &symbol.id)
        } else {
            Vec::new()
        };
        let definition = if options.include_definitions {
            symbol.parent_id.as_deref().and_then(|p| index.get(p)).cloned()
        } else {
            None
        };
        SearchResult {
            symbol: symbol.clone(),
            match_info,
            references,
            definition,
        }
    }

    /// Targets of the symbol's outgoing edges. Only forward edges are followed.
    pub fn find_references(&self, symbol_id: &str) -> Result<Vec<SearchResult>> {
        let (index, _) = self.snapshot();
        if !index.contains(symbol_id) {
            return Err(Error::SymbolNotFound(symbol_id.to_string()));
        }
        Ok(references_from(&index, symbol_id))
    }

    /// Sources of edges pointing at the symbol (callers, implementors, ...)
    pub fn find_incoming(&self, symbol_id: &str) -> Result<Vec<SearchResult>> {
        let (index, _) = self.snapshot();
        if !index.contains(symbol_id) {
            return Err(Error::SymbolNotFound(symbol_id.to_string()));
        }
        Ok(index
            .incoming(symbol_id)
            .iter()
            .filter_map(|rel| {
                index
                    .get(&rel.from_id)
                    .map(|source| relationship_result(source, rel))
            })
            .collect())
    }

    /// Project-wide exact search, keeping only exact (case-sensitive) name matches
    pub fn find_definitions(&self, name: &str, options: Option<SearchOptions>) -> Result<Vec<SearchResult>> {
        let mut query = SearchQuery::exact(name).scope(SearchScope::Project);
        if let Some(options) = options {
            query.options = options;
        }
        Ok(self
            .search_symbols(&query)?
            .into_iter()
            .filter(|r| r.symbol.name == name)
            .collect())
    }

    /// Symbols of the same kind whose blended similarity reaches `threshold`
    /// (the configured default when `None`)
    pub fn find_similar(&self, symbol_id: &str, threshold: Option<f64>) -> Result<Vec<SearchResult>> {
        let (index, _) = self.snapshot();
        let target = index
            .get(symbol_id)
            .ok_or_else(|| Error::SymbolNotFound(symbol_id.to_string()))?;
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);

        let mut results: Vec<SearchResult> = index
            .ids_by_kind(target.kind)
            .into_iter()
            .flatten()
            .filter(|id| id.as_str() != symbol_id)
            .filter_map(|id| index.get(id))
            .filter_map(|candidate| {
                let score = blended_similarity(target, candidate);
                (score >= threshold).then(|| SearchResult {
                    symbol: candidate.clone(),
                    match_info: MatchInfo {
                        score,
                        match_type: MatchType::Similar,
                        highlights: Vec::new(),
                        relationship: None,
                    },
                    references: Vec::new(),
                    definition: None,
                })
            })
            .collect();

        sort_results(&mut results);
        debug!("{} symbols similar to {} (threshold {})", results.len(), symbol_id, threshold);
        Ok(results)
    }

    /// Run the query once per language: the query's languages, or every
    /// indexed language when it names none
    pub fn search_cross_language(&self, query: &SearchQuery) -> Result<BTreeMap<String, Vec<SearchResult>>> {
        query.validate()?;
        let languages = if query.filters.languages.is_empty() {
            self.languages()
        } else {
            query.filters.languages.clone()
        };

        let mut by_language = BTreeMap::new();
        for language in languages {
            let mut single = query.clone();
            single.filters.languages = vec![language.clone()];
            by_language.insert(language, self.search_symbols(&single)?);
        }
        Ok(by_language)
    }

    /// Regex and semantic flavours delegate to `search_symbols`. The AST
    /// flavour compiles `pattern` in the pattern query language and runs it
    /// over each symbol's signature (or its name when it has none).
    pub fn search_by_pattern(&self, pattern: &str, kind: PatternSearchType) -> Result<Vec<SearchResult>> {
        match kind {
            PatternSearchType::Regex => self.search_symbols(&SearchQuery::regex(pattern)),
            PatternSearchType::Semantic => self.search_symbols(&SearchQuery::semantic(pattern)),
            PatternSearchType::Ast => {
                let expr = match compile_query(pattern) {
                    Ok(expr) => expr,
                    Err(e) => {
                        warn!("Invalid structural search pattern '{}': {}", pattern, e);
                        return Ok(Vec::new());
                    }
                };
                let (index, _) = self.snapshot();
                let mut results: Vec<SearchResult> = index
                    .symbols()
                    .filter(|symbol| {
                        let text = symbol.signature.as_deref().unwrap_or(&symbol.name);
                        let unit = ScannedCode::new(text, Some(&symbol.language));
                        !execute(&expr, &unit).is_empty()
                    })
                    .map(|symbol| SearchResult {
                        symbol: symbol.clone(),
                        match_info: MatchInfo {
                            score: EXACT_SCORE,
                            match_type: MatchType::Pattern,
                            highlights: Vec::new(),
                            relationship: None,
                        },
                        references: Vec::new(),
                        definition: None,
                    })
                    .collect();
                sort_results(&mut results);
                results.truncate(self.config.max_results);
                Ok(results)
            }
        }
    }

    /// Symbols and relationships of the current index, in a stable order
    pub fn export_index(&self) -> IndexSnapshot {
        let (index, _) = self.snapshot();
        let mut symbols: Vec<Symbol> = index.symbols().cloned().collect();
        symbols.sort_by(|a, b| a.id.cmp(&b.id));
        let mut relationships: Vec<Relationship> = index.relationships().cloned().collect();
        relationships.sort_by(|a, b| a.from_id.cmp(&b.from_id));
        IndexSnapshot { symbols, relationships }
    }

    pub fn import_index(&self, snapshot: IndexSnapshot) -> IndexStats {
        self.update_index(snapshot.symbols, snapshot.relationships)
    }
}

fn references_from(index: &SymbolIndex, symbol_id: &str) -> Vec<SearchResult> {
    index
        .outgoing(symbol_id)
        .iter()
        .filter_map(|rel| match index.get(&rel.to_id) {
            Some(target) => Some(relationship_result(target, rel)),
            None => {
                debug!("Skipping edge {} -> {}: target not indexed", rel.from_id, rel.to_id);
                None
            }
        })
        .collect()
}

fn relationship_result(symbol: &Symbol, rel: &Relationship) -> SearchResult {
    SearchResult {
        symbol: symbol.clone(),
        match_info: MatchInfo {
            score: EXACT_SCORE,
            match_type: MatchType::Reference,
            highlights: Vec::new(),
            relationship: Some(rel.kind),
        },
        references: Vec::new(),
        definition: None,
    }
}

fn passes_filters(symbol: &Symbol, query: &SearchQuery, file_glob: Option<&glob::Pattern>) -> bool {
    let filters = &query.filters;
    if !filters.languages.is_empty()
        && !filters.languages.iter().any(|l| l.eq_ignore_ascii_case(&symbol.language))
    {
        return false;
    }
    if !filters.kinds.is_empty() && !filters.kinds.contains(&symbol.kind) {
        return false;
    }
    if let Some(glob) = file_glob {
        if !glob.matches(&symbol.location.file) {
            return false;
        }
    }
    match &filters.scope {
        SearchScope::Project => true,
        SearchScope::File { path } => &symbol.location.file == path,
        SearchScope::Module { name } => {
            symbol.module.as_deref() == Some(name.as_str()) || symbol.namespace.as_deref() == Some(name.as_str())
        }
    }
}

fn contains(haystack: &str, needle: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        haystack.contains(needle)
    } else {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// Tiered name score plus signature, documentation and kind bonuses
fn score(symbol: &Symbol, text: &str, options: &SearchOptions, hit: &Hit) -> MatchInfo {
    let name = &symbol.name;
    let whole = vec![HighlightRange { start: 0, end: name.chars().count() }];
    let lowered_name = name.to_lowercase();
    let lowered_text = text.to_lowercase();

    let case_insensitive_equal = !options.case_sensitive && lowered_name == lowered_text;
    let cross_language_equal =
        options.cross_language && normalize_identifier(name) == normalize_identifier(text);

    let (mut score, match_type, highlights) = if name == text {
        (EXACT_SCORE, MatchType::Exact, whole)
    } else if case_insensitive_equal || cross_language_equal {
        (CASE_INSENSITIVE_SCORE, MatchType::CaseInsensitive, whole)
    } else if let Some(range) = substring_range(name, text, options.case_sensitive) {
        (SUBSTRING_SCORE, MatchType::Substring, vec![range])
    } else {
        match hit {
            Hit::Fuzzy(sim) => (sim * FUZZY_WEIGHT, MatchType::Fuzzy, Vec::new()),
            Hit::Regex(highlights) => (REGEX_SCORE, MatchType::Regex, highlights.clone()),
            Hit::Token => (TOKEN_SCORE, MatchType::Semantic, Vec::new()),
            Hit::Name => (CASE_INSENSITIVE_SCORE, MatchType::CaseInsensitive, whole),
        }
    };

    if symbol
        .signature
        .as_deref()
        .is_some_and(|s| contains(s, text, options.case_sensitive))
    {
        score += SIGNATURE_BONUS;
    }
    if symbol
        .documentation
        .as_deref()
        .is_some_and(|d| contains(d, text, options.case_sensitive))
    {
        score += DOCUMENTATION_BONUS;
    }
    if matches!(symbol.kind, SymbolKind::Function | SymbolKind::Method) {
        score += CALLABLE_BONUS;
    }

    MatchInfo {
        score,
        match_type,
        highlights,
        relationship: None,
    }
}

fn substring_range(name: &str, text: &str, case_sensitive: bool) -> Option<HighlightRange> {
    if text.is_empty() {
        return None;
    }
    if case_sensitive {
        let start = name.find(text)?;
        return Some(char_range(name, start, start + text.len()));
    }
    let lowered = name.to_lowercase();
    let needle = text.to_lowercase();
    let start = lowered.find(&needle)?;
    Some(char_range(&lowered, start, start + needle.len()))
}

/// Convert a byte range of `s` to a char range
fn char_range(s: &str, start: usize, end: usize) -> HighlightRange {
    let start_chars = s.get(..start).map(|p| p.chars().count()).unwrap_or(0);
    let len_chars = s.get(start..end).map(|p| p.chars().count()).unwrap_or(0);
    HighlightRange {
        start: start_chars,
        end: start_chars + len_chars,
    }
}

fn blended_similarity(target: &Symbol, candidate: &Symbol) -> f64 {
    let mut score = NAME_WEIGHT * similarity(&target.name.to_lowercase(), &candidate.name.to_lowercase());
    if let (Some(a), Some(b)) = (&target.signature, &candidate.signature) {
        score += SIGNATURE_WEIGHT * similarity(a, b);
    }
    if target.module.is_some() && target.module == candidate.module {
        score += MODULE_BONUS;
    }
    if target.namespace.is_some() && target.namespace == candidate.namespace {
        score += NAMESPACE_BONUS;
    }
    score.min(1.0)
}

/// Score descending, then name and id for a deterministic order
fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.match_info
            .score
            .partial_cmp(&a.match_info.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.symbol.name.cmp(&b.symbol.name))
            .then_with(|| a.symbol.id.cmp(&b.symbol.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::index::{Location, RelationshipKind};

    fn engine() -> (Arc<Cache>, SearchEngine) {
        let cache = Arc::new(Cache::new(CacheConfig::default()));
        let engine = SearchEngine::new(Arc::clone(&cache), SearchConfig::default());
        (cache, engine)
    }

    fn symbols() -> Vec<Symbol> {
        vec![
            Symbol::new("ts1", "parseFile", SymbolKind::Function, "src/parser.ts", "typescript")
                .with_signature("parseFile(path: string): Ast")
                .with_documentation("Parse a source file into an AST")
                .with_module("parser"),
            Symbol::new("py1", "parse_file", SymbolKind::Function, "tools/parser.py", "python")
                .with_signature("parse_file(path)")
                .with_module("parser"),
            Symbol::new("ts2", "Ast", SymbolKind::Class, "src/ast.ts", "typescript"),
            Symbol::new("ts3", "readFile", SymbolKind::Function, "src/io.ts", "typescript")
                .with_signature("readFile(path: string): string"),
            Symbol::new("ts4", "visit", SymbolKind::Method, "src/ast.ts", "typescript")
                .with_parent("ts2")
                .with_location(Location::span("src/ast.ts", 10, 2, 14, 3)),
        ]
    }

    fn relationships() -> Vec<Relationship> {
        vec![
            Relationship::new("ts1", "ts3", RelationshipKind::Calls),
            Relationship::new("ts1", "ts2", RelationshipKind::Uses),
            Relationship::new("ts1", "missing", RelationshipKind::Calls),
            Relationship::new("py1", "ts1", RelationshipKind::References),
        ]
    }

    fn indexed() -> (Arc<Cache>, SearchEngine) {
        let (cache, engine) = engine();
        engine.update_index(symbols(), relationships());
        (cache, engine)
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.symbol.id.as_str()).collect()
    }

    #[test]
    fn test_exact_search_is_name_based() {
        let (_, engine) = indexed();
        let results = engine.search_symbols(&SearchQuery::exact("parseFile")).unwrap();
        assert_eq!(ids(&results), vec!["ts1"]);
        let info = &results[0].match_info;
        assert_eq!(info.match_type, MatchType::Exact);
        // 100 exact + 30 signature + 10 function
        assert_eq!(info.score, 140.0);
        assert_eq!(info.highlights, vec![HighlightRange { start: 0, end: 9 }]);
    }

    #[test]
    fn test_exact_search_case_sensitivity() {
        let (_, engine) = indexed();
        let loose = engine.search_symbols(&SearchQuery::exact("PARSEFILE")).unwrap();
        assert_eq!(ids(&loose), vec!["ts1"]);
        assert_eq!(loose[0].match_info.match_type, MatchType::CaseInsensitive);

        let strict = engine
            .search_symbols(&SearchQuery::exact("PARSEFILE").case_sensitive(true))
            .unwrap();
        assert!(strict.is_empty());
    }

    #[test]
    fn test_fuzzy_search_ranks_closest_first() {
        let (_, engine) = indexed();
        let results = engine.search_symbols(&SearchQuery::fuzzy("parsefile")).unwrap();
        assert_eq!(ids(&results), vec!["ts1", "py1"]);
        assert!(results[0].match_info.score >= results[1].match_info.score);
        assert_eq!(results[1].match_info.match_type, MatchType::Fuzzy);
    }

    #[test]
    fn test_cross_language_normalization() {
        let (_, engine) = indexed();
        let results = engine
            .search_symbols(&SearchQuery::exact("parse_file").cross_language(true))
            .unwrap();
        assert_eq!(ids(&results), vec!["py1", "ts1"]);
        assert_eq!(results[1].match_info.match_type, MatchType::CaseInsensitive);
    }

    #[test]
    fn test_regex_search_and_invalid_regex() {
        let (_, engine) = indexed();
        let results = engine.search_symbols(&SearchQuery::regex("^(read|parse)")).unwrap();
        assert_eq!(results.len(), 3);
        let read = results.iter().find(|r| r.symbol.id == "ts3").unwrap();
        assert_eq!(read.match_info.highlights, vec![HighlightRange { start: 0, end: 4 }]);

        assert!(engine.search_symbols(&SearchQuery::regex("(unclosed")).unwrap().is_empty());
    }

    #[test]
    fn test_semantic_search_uses_full_text_tokens() {
        let (_, engine) = indexed();
        let results = engine.search_symbols(&SearchQuery::semantic("source")).unwrap();
        assert_eq!(ids(&results), vec!["ts1"]);
        assert_eq!(results[0].match_info.match_type, MatchType::Semantic);
    }

    #[test]
    fn test_filters() {
        let (_, engine) = indexed();
        let query = SearchQuery::regex(".").languages(["python"]);
        assert_eq!(ids(&engine.search_symbols(&query).unwrap()), vec!["py1"]);

        let query = SearchQuery::regex(".").kinds([SymbolKind::Class, SymbolKind::Method]);
        // the method outranks the class through the callable bonus
        assert_eq!(ids(&engine.search_symbols(&query).unwrap()), vec!["ts4", "ts2"]);

        let query = SearchQuery::regex(".").file_pattern("src/*.ts").max_results(2);
        assert_eq!(engine.search_symbols(&query).unwrap().len(), 2);

        let query = SearchQuery::regex(".").scope(SearchScope::File { path: "src/ast.ts".into() });
        assert_eq!(engine.search_symbols(&query).unwrap().len(), 2);

        let query = SearchQuery::regex(".").scope(SearchScope::Module { name: "parser".into() });
        assert_eq!(engine.search_symbols(&query).unwrap().len(), 2);
    }

    #[test]
    fn test_validation_errors_surface() {
        let (_, engine) = indexed();
        assert!(matches!(
            engine.search_symbols(&SearchQuery::exact("")),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_references_are_forward_only() {
        let (_, engine) = indexed();
        let refs = engine.find_references("ts1").unwrap();
        assert_eq!(ids(&refs), vec!["ts3", "ts2"]);
        assert_eq!(refs[0].match_info.relationship, Some(RelationshipKind::Calls));
        assert_eq!(refs[0].match_info.match_type, MatchType::Reference);

        let incoming = engine.find_incoming("ts1").unwrap();
        assert_eq!(ids(&incoming), vec!["py1"]);

        assert!(engine.find_references("ts3").unwrap().is_empty());
        assert!(matches!(engine.find_references("nope"), Err(Error::SymbolNotFound(_))));
    }

    #[test]
    fn test_include_references_and_definitions() {
        let (_, engine) = indexed();
        let query = SearchQuery::exact("parseFile").include_references(true);
        let results = engine.search_symbols(&query).unwrap();
        assert_eq!(ids(&results[0].references), vec!["ts3", "ts2"]);

        let query = SearchQuery::exact("visit").include_definitions(true);
        let results = engine.search_symbols(&query).unwrap();
        assert_eq!(results[0].definition.as_ref().map(|s| s.id.as_str()), Some("ts2"));
    }

    #[test]
    fn test_find_definitions_requires_exact_name() {
        let (_, engine) = indexed();
        assert_eq!(ids(&engine.find_definitions("parseFile", None).unwrap()), vec!["ts1"]);
        assert!(engine.find_definitions("parsefile", None).unwrap().is_empty());
    }

    #[test]
    fn test_find_similar_same_kind_only() {
        let (_, engine) = indexed();
        let similar = engine.find_similar("ts1", Some(0.5)).unwrap();
        assert_eq!(ids(&similar), vec!["py1"]);
        assert!(similar[0].match_info.score <= 1.0);
        assert!(similar.iter().all(|r| r.symbol.kind == SymbolKind::Function));
        assert_eq!(engine.find_similar("ts1", Some(0.3)).unwrap().len(), 2);
        assert!(engine.find_similar("ts1", Some(0.99)).unwrap().is_empty());
        assert!(matches!(engine.find_similar("nope", None), Err(Error::SymbolNotFound(_))));
    }

    #[test]
    fn test_search_cross_language_groups_by_language() {
        let (_, engine) = indexed();
        let grouped = engine.search_cross_language(&SearchQuery::fuzzy("parsefile")).unwrap();
        assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["python", "typescript"]);
        assert_eq!(ids(&grouped["python"]), vec!["py1"]);
        assert_eq!(ids(&grouped["typescript"]), vec!["ts1"]);
    }

    #[test]
    fn test_search_by_pattern() {
        let (_, engine) = indexed();
        let regex = engine.search_by_pattern("File$", PatternSearchType::Regex).unwrap();
        assert_eq!(regex.len(), 3);

        let ast = engine
            .search_by_pattern("(text /: string\\)/)", PatternSearchType::Ast)
            .unwrap();
        assert_eq!(ids(&ast), vec!["ts1", "ts3"]);
        assert!(ast.iter().all(|r| r.match_info.match_type == MatchType::Pattern));

        assert!(engine.search_by_pattern("(widget)", PatternSearchType::Ast).unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let (_, engine) = indexed();
        let query = SearchQuery::fuzzy("parsefile");
        let first = engine.search_symbols(&query).unwrap();
        engine.update_index(symbols(), relationships());
        let second = engine.search_symbols(&query).unwrap();
        let scored = |rs: &[SearchResult]| -> Vec<(String, f64)> {
            rs.iter().map(|r| (r.symbol.id.clone(), r.match_info.score)).collect()
        };
        assert_eq!(scored(&first), scored(&second));
        assert_eq!(engine.generation(), 2);
    }

    #[test]
    fn test_update_index_drops_cached_results() {
        let (cache, engine) = indexed();
        let query = SearchQuery::exact("parseFile");
        engine.search_symbols(&query).unwrap();
        assert_eq!(cache.stats().category_sizes[&CacheCategory::Search], 1);

        engine.update_index(vec![Symbol::new("x", "other", SymbolKind::Function, "a.rs", "rust")], vec![]);
        assert_eq!(cache.stats().category_sizes[&CacheCategory::Search], 0);
        assert!(engine.search_symbols(&query).unwrap().is_empty());
    }

    #[test]
    fn test_cached_results_depend_on_symbols() {
        let (cache, engine) = indexed();
        engine.search_symbols(&SearchQuery::exact("parseFile")).unwrap();
        assert_eq!(cache.clear_by_dependency("ts1"), 1);
        assert_eq!(cache.clear_by_tag("file:src/parser.ts"), 0);
    }

    #[test]
    fn test_index_updated_event() {
        let (_, engine) = engine();
        let mut events = engine.cache.events().subscribe();
        engine.update_index(symbols(), relationships());
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::IndexUpdated { generation: 1, symbols: 5, relationships: 4 }
        );
    }

    #[test]
    fn test_export_import_index() {
        let (_, source) = indexed();
        let snapshot = source.export_index();
        assert_eq!(snapshot.symbols.len(), 5);
        assert_eq!(snapshot.relationships.len(), 4);

        let (_, target) = engine();
        let stats = target.import_index(snapshot.clone());
        assert_eq!(stats, source.stats());
        assert_eq!(target.export_index(), snapshot);
        assert_eq!(target.languages(), vec!["python", "typescript"]);
        assert_eq!(target.get_symbol("ts4").unwrap().parent_id.as_deref(), Some("ts2"));
    }
}
