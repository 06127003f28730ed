// Pattern registry, execution and result caching

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::compiler::{compile_pattern, CompiledPattern};
use super::executor::{execute, ScannedCode};
use super::{
    catalog, learn, score_confidence, ExampleOptions, MatchContext, MatchLocation, MatchOptions,
    MatchPresentation, Pattern, PatternExample, PatternFilter, PatternMatch, PatternQuery, ValidationReport,
};
use crate::cache::{cache_key, Cache, CacheCategory, LocalCache, PutOptions};
use crate::config::PatternConfig;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};

/// Tag carried by every cached match list
pub const PATTERN_TAG: &str = "patterns";

const MAX_MATCHED_TEXT: usize = 500;
const MAX_SNIPPET: usize = 300;

/// Registers patterns, compiles them once and runs them over code units.
///
/// Match lists are cached in a short-lived local cache and in the shared
/// [`Cache`] under [`CacheCategory::Pattern`]. Cache keys carry a digest of
/// the registered patterns, so equal registries share cached results across
/// processes. Any registry change drops the `patterns` tag.
pub struct PatternMatcher {
    patterns: RwLock<BTreeMap<String, Pattern>>,
    compiled: RwLock<HashMap<String, Arc<CompiledPattern>>>,
    fingerprint: RwLock<String>,
    cache: Arc<Cache>,
    local: LocalCache<Vec<PatternMatch>>,
    config: PatternConfig,
    events: EventBus,
}

impl PatternMatcher {
    pub fn new(cache: Arc<Cache>, config: PatternConfig) -> Self {
        let matcher = Self {
            patterns: RwLock::new(BTreeMap::new()),
            compiled: RwLock::new(HashMap::new()),
            fingerprint: RwLock::new(registry_fingerprint(&BTreeMap::new())),
            local: LocalCache::new(
                Duration::from_secs(config.local_cache_ttl_secs),
                config.local_cache_capacity,
            ),
            events: cache.events().clone(),
            cache,
            config,
        };

        if matcher.config.load_builtin {
            for pattern in catalog::builtin_patterns() {
                let id = pattern.id.clone();
                if let Err(e) = matcher.register_pattern(pattern) {
                    warn!("Failed to register built-in pattern '{}': {}", id, e);
                }
            }
        }
        matcher
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Store a pattern and compile it.
    ///
    /// A pattern that fails validation is rejected. One that validates but
    /// fails to compile is kept registered but inert; the returned flag says
    /// whether it compiled.
    pub fn register_pattern(&self, pattern: Pattern) -> Result<bool> {
        let report = validate(&pattern);
        if !report.valid {
            return Err(Error::invalid_pattern(pattern.id, report.errors));
        }

        let compiled = match compile_pattern(&pattern) {
            Ok(compiled) => Some(Arc::new(compiled)),
            Err(e) => {
                warn!("Pattern '{}' failed to compile and stays inert: {}", pattern.id, e);
                None
            }
        };
        let is_compiled = compiled.is_some();
        let id = pattern.id.clone();

        {
            let mut patterns = self.patterns.write();
            let mut compiled_map = self.compiled.write();
            match compiled {
                Some(compiled) => compiled_map.insert(id.clone(), compiled),
                None => compiled_map.remove(&id),
            };
            patterns.insert(id.clone(), pattern);
        }
        self.invalidate();

        info!("Registered pattern '{}' (compiled: {})", id, is_compiled);
        self.events.publish(EngineEvent::PatternRegistered { id, compiled: is_compiled });
        Ok(is_compiled)
    }

    /// Remove a pattern and its compiled form. Returns false if unknown.
    pub fn unregister_pattern(&self, id: &str) -> bool {
        let removed = {
            let mut patterns = self.patterns.write();
            self.compiled.write().remove(id);
            patterns.remove(id).is_some()
        };
        if removed {
            self.invalidate();
            info!("Unregistered pattern '{}'", id);
            self.events.publish(EngineEvent::PatternUnregistered { id: id.to_string() });
        }
        removed
    }

    fn invalidate(&self) {
        let fingerprint = registry_fingerprint(&self.patterns.read());
        *self.fingerprint.write() = fingerprint;
        self.local.clear();
        let dropped = self.cache.clear_by_tag(PATTERN_TAG);
        if dropped > 0 {
            debug!("Dropped {} cached match lists after a registry change", dropped);
        }
    }

    pub fn is_compiled(&self, id: &str) -> bool {
        self.compiled.read().contains_key(id)
    }

    pub fn get_pattern(&self, id: &str) -> Option<Pattern> {
        self.patterns.read().get(id).cloned()
    }

    /// Registered patterns passing `filter`, ordered by id
    pub fn get_patterns(&self, filter: &PatternFilter) -> Vec<Pattern> {
        self.patterns
            .read()
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }

    /// Run every pattern selected by `query` over `code`.
    ///
    /// Matches below the confidence threshold are dropped; the rest are
    /// ordered by descending confidence and capped. Without code there is
    /// nothing to scan and the result is empty.
    pub fn find_matches(
        &self,
        query: &PatternQuery,
        code: Option<&str>,
        language: Option<&str>,
    ) -> Result<Vec<PatternMatch>> {
        query.validate()?;
        let Some(code) = code else {
            debug!("find_matches called without code, nothing to scan");
            return Ok(Vec::new());
        };

        let fingerprint = self.fingerprint.read().clone();
        let key = cache_key("patterns", &(query, code, language, &fingerprint));

        if let Some(key) = &key {
            if let Some(hit) = self.local.get(key) {
                debug!("Pattern matches served from local cache ({} matches)", hit.len());
                return Ok(hit);
            }
            if let Some(hit) = self.cache.get::<Vec<PatternMatch>>(key, Some(CacheCategory::Pattern)) {
                debug!("Pattern matches served from shared cache ({} matches)", hit.len());
                self.local.insert(key.clone(), hit.clone());
                return Ok(hit);
            }
        }

        let (matches, categories) = self.compute(query, code, language);

        if let Some(key) = key {
            let mut tags: Vec<String> = vec![PATTERN_TAG.to_string()];
            tags.extend(language.map(str::to_string));
            tags.extend(query.languages.iter().cloned());
            tags.extend(categories);

            let mut options = PutOptions::new()
                .ttl(Duration::from_secs(self.config.cache_ttl_secs))
                .tags(tags)
                .category(CacheCategory::Pattern);
            if let Some(path) = &query.file_path {
                options = options.dependencies([path.clone()]);
            }
            self.cache.put(&key, &matches, options);
            self.local.insert(key, matches.clone());
        }
        Ok(matches)
    }

    /// Run a single registered pattern over `code`
    pub fn find_pattern_matches(
        &self,
        pattern_id: &str,
        code: &str,
        options: &MatchOptions,
    ) -> Result<Vec<PatternMatch>> {
        if !self.patterns.read().contains_key(pattern_id) {
            return Err(Error::PatternNotFound(pattern_id.to_string()));
        }
        let query = PatternQuery {
            pattern_ids: vec![pattern_id.to_string()],
            min_confidence: options.min_confidence,
            max_results: options.max_results,
            file_path: options.file_path.clone(),
            ..PatternQuery::default()
        };
        self.find_matches(&query, Some(code), options.language.as_deref())
    }

    /// Patterns selected by the query, paired with their compiled form.
    /// Inert patterns are skipped.
    fn select(&self, query: &PatternQuery, language: Option<&str>) -> Vec<(Pattern, Arc<CompiledPattern>)> {
        let patterns = self.patterns.read();
        let compiled = self.compiled.read();
        patterns
            .values()
            .filter(|p| selects(query, language, p))
            .filter_map(|p| match compiled.get(&p.id) {
                Some(c) => Some((p.clone(), Arc::clone(c))),
                None => {
                    debug!("Skipping inert pattern '{}'", p.id);
                    None
                }
            })
            .collect()
    }

    fn compute(
        &self,
        query: &PatternQuery,
        code: &str,
        language: Option<&str>,
    ) -> (Vec<PatternMatch>, BTreeSet<String>) {
        let selected = self.select(query, language);
        let unit = ScannedCode::new(code, language);
        let threshold = query.min_confidence.unwrap_or(self.config.confidence_threshold);

        let mut matches = Vec::new();
        let mut categories = BTreeSet::new();
        for (pattern, compiled) in &selected {
            let before = matches.len();
            matches.extend(
                evaluate(pattern, compiled, &unit, query)
                    .into_iter()
                    .filter(|m| m.confidence >= threshold),
            );
            if matches.len() > before {
                categories.insert(pattern.metadata.category.clone());
            }
        }

        matches.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.location.start_line.cmp(&b.location.start_line))
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        matches.truncate(query.max_results.unwrap_or(self.config.max_results));

        debug!(
            "Ran {} patterns over {} bytes: {} matches",
            selected.len(),
            code.len(),
            matches.len()
        );
        (matches, categories)
    }

    /// Check required fields and query shape without executing anything
    pub fn validate_pattern(&self, pattern: &Pattern) -> ValidationReport {
        validate(pattern)
    }

    /// Derive a pattern from labelled snippets, register it and return it
    pub fn create_pattern_from_examples(
        &self,
        name: &str,
        examples: &[PatternExample],
        options: &ExampleOptions,
    ) -> Result<Pattern> {
        let pattern = learn::derive_pattern(name, examples, options)?;
        let report = validate(&pattern);
        if !report.valid {
            return Err(Error::invalid_pattern(pattern.id, report.errors));
        }
        self.register_pattern(pattern.clone())?;
        Ok(pattern)
    }

    /// Every registered pattern, ordered by id
    pub fn export_patterns(&self) -> Vec<Pattern> {
        self.patterns.read().values().cloned().collect()
    }

    /// Fails on the first pattern that does not validate
    pub fn check_patterns(&self, patterns: &[Pattern]) -> Result<()> {
        for pattern in patterns {
            let report = validate(pattern);
            if !report.valid {
                return Err(Error::invalid_pattern(pattern.id.clone(), report.errors));
            }
        }
        Ok(())
    }

    /// Register a batch of patterns. Nothing is registered unless every
    /// pattern validates.
    pub fn import_patterns(&self, patterns: Vec<Pattern>) -> Result<usize> {
        self.check_patterns(&patterns)?;
        let count = patterns.len();
        for pattern in patterns {
            self.register_pattern(pattern)?;
        }
        info!("Imported {} patterns", count);
        Ok(count)
    }

    /// Make the registry exactly `patterns`: unknown ids are unregistered,
    /// the rest registered. Nothing changes unless every pattern validates.
    pub fn restore_patterns(&self, patterns: Vec<Pattern>) -> Result<usize> {
        self.check_patterns(&patterns)?;
        let keep: BTreeSet<&str> = patterns.iter().map(|p| p.id.as_str()).collect();
        let stale: Vec<String> = self
            .patterns
            .read()
            .keys()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            self.unregister_pattern(&id);
        }
        self.import_patterns(patterns)
    }
}

/// blake3 digest over every registered pattern, in id order
fn registry_fingerprint(patterns: &BTreeMap<String, Pattern>) -> String {
    let mut hasher = blake3::Hasher::new();
    for pattern in patterns.values() {
        if let Ok(bytes) = serde_json::to_vec(pattern) {
            hasher.update(&bytes);
        }
    }
    hasher.finalize().to_hex().to_string()
}

fn selects(query: &PatternQuery, language: Option<&str>, pattern: &Pattern) -> bool {
    if !query.pattern_ids.is_empty() && !query.pattern_ids.contains(&pattern.id) {
        return false;
    }
    if query.exclude.contains(&pattern.id) {
        return false;
    }
    if let Some(language) = language {
        if !pattern.applies_to(language) {
            return false;
        }
    }
    if !query.languages.is_empty() && !query.languages.iter().any(|l| pattern.applies_to(l)) {
        return false;
    }
    if !query.categories.is_empty() && !query.categories.contains(&pattern.metadata.category) {
        return false;
    }
    if !query.severities.is_empty() && !query.severities.contains(&pattern.metadata.severity) {
        return false;
    }
    true
}

fn evaluate(
    pattern: &Pattern,
    compiled: &CompiledPattern,
    unit: &ScannedCode<'_>,
    query: &PatternQuery,
) -> Vec<PatternMatch> {
    execute(&compiled.root, unit)
        .into_iter()
        .map(|raw| {
            let satisfied = compiled.constraints_hold(&raw.captures);
            let (start_line, start_column) = unit.lines().position(raw.span.start);
            let (end_line, end_column) = unit.lines().position(raw.span.end);
            let text = unit.code().get(raw.span.start..raw.span.end).unwrap_or("");

            PatternMatch {
                id: match_id(&pattern.id, query.file_path.as_deref(), raw.span.start, raw.span.end),
                pattern_id: pattern.id.clone(),
                location: MatchLocation {
                    file_id: query.file_id.clone(),
                    file_path: query.file_path.clone(),
                    start_line,
                    start_column,
                    end_line,
                    end_column,
                },
                context: MatchContext {
                    language: unit.language().map(str::to_string),
                    symbol: unit.enclosing_symbol(raw.span.start).map(str::to_string),
                    snippet: snippet(unit, start_line),
                },
                captures: raw.captures,
                confidence: score_confidence(pattern.kind, satisfied),
                constraints_satisfied: satisfied,
                metadata: MatchPresentation {
                    matched_text: truncate(text, MAX_MATCHED_TEXT),
                    suggestions: pattern.metadata.suggestions.clone(),
                    explanation: explain(pattern, satisfied),
                },
            }
        })
        .collect()
}

fn match_id(pattern_id: &str, file: Option<&str>, start: usize, end: usize) -> String {
    let hash = blake3::hash(format!("{}:{}:{}:{}", pattern_id, file.unwrap_or(""), start, end).as_bytes());
    hash.to_hex()[..16].to_string()
}

/// The match line with one line of context on each side
fn snippet(unit: &ScannedCode<'_>, line: u32) -> String {
    let first = line.saturating_sub(1).max(1);
    let lines: Vec<&str> = (first..=line + 1).filter_map(|l| unit.lines().line(l)).collect();
    truncate(&lines.join("\n"), MAX_SNIPPET)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn explain(pattern: &Pattern, satisfied: bool) -> String {
    let mut explanation = format!("Matches {} pattern '{}'", pattern.kind, pattern.name);
    if !pattern.description.is_empty() {
        explanation.push_str(": ");
        explanation.push_str(&pattern.description);
    }
    if !satisfied {
        explanation.push_str(" (constraints not satisfied)");
    }
    explanation
}

fn validate(pattern: &Pattern) -> ValidationReport {
    let mut errors = Vec::new();
    if pattern.id.trim().is_empty() {
        errors.push("id is required".to_string());
    }
    if pattern.name.trim().is_empty() {
        errors.push("name is required".to_string());
    }
    if pattern.languages.is_empty() {
        errors.push("at least one language is required (use \"*\" for any)".to_string());
    }

    let query = pattern.definition.query.trim();
    if query.is_empty() {
        errors.push("query is required".to_string());
    } else {
        if !query.starts_with('(') {
            errors.push("query must start with '('".to_string());
        }
        if let Err(e) = check_balance(query) {
            errors.push(e);
        }
    }

    for variable in &pattern.definition.variables {
        if !query.contains(&format!("@{}", variable)) {
            errors.push(format!("variable '{}' is not bound in the query", variable));
        }
    }
    for (name, constraint) in &pattern.definition.constraints {
        let capture = constraint.capture();
        if capture.is_empty() || !query.contains(&format!("@{}", capture)) {
            errors.push(format!("constraint '{}' references unbound capture '{}'", name, capture));
        }
        if let super::Constraint::Matches { pattern, .. } | super::Constraint::NotMatches { pattern, .. } = constraint {
            if pattern.is_empty() {
                errors.push(format!("constraint '{}' has an empty regex", name));
            }
        }
    }

    ValidationReport { valid: errors.is_empty(), errors }
}

/// Parentheses outside `/regex/` literals must balance
fn check_balance(query: &str) -> std::result::Result<(), String> {
    let mut depth = 0i64;
    let mut in_regex = false;
    let mut escaped = false;
    for c in query.chars() {
        if in_regex {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '/' {
                in_regex = false;
            }
            continue;
        }
        match c {
            '/' => in_regex = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced ')' in query".to_string());
                }
            }
            _ => {}
        }
    }
    if in_regex {
        Err("unterminated regex literal in query".to_string())
    } else if depth != 0 {
        Err("unbalanced '(' in query".to_string())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::pattern::{Constraint, PatternDefinition, PatternKind, PatternMetadata, Severity};

    fn matcher() -> PatternMatcher {
        PatternMatcher::new(Arc::new(Cache::new(CacheConfig::default())), PatternConfig::default())
    }

    fn custom(id: &str, query: &str) -> Pattern {
        Pattern {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            kind: PatternKind::Structural,
            languages: vec!["*".to_string()],
            definition: PatternDefinition {
                query: query.to_string(),
                constraints: BTreeMap::new(),
                variables: Vec::new(),
            },
            metadata: PatternMetadata::default(),
        }
    }

    const PY_FUNCTIONS: &str = "\
def configure(host, port, user, password, timeout, retries):
    pass

def add(a, b):
    return a + b
";

    #[test]
    fn test_builtins_registered_and_compiled() {
        let matcher = matcher();
        assert_eq!(matcher.len(), 5);
        for pattern in matcher.export_patterns() {
            assert!(matcher.is_compiled(&pattern.id), "{} is inert", pattern.id);
        }
    }

    #[test]
    fn test_long_parameter_list_matches_only_wide_function() {
        let matcher = matcher();
        let query = PatternQuery::new().patterns(["long-parameter-list"]);
        let matches = matcher.find_matches(&query, Some(PY_FUNCTIONS), Some("python")).unwrap();
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.captures["name"], "configure");
        assert!(m.constraints_satisfied);
        assert_eq!(m.location.start_line, 1);
        assert_eq!(m.context.symbol.as_deref(), Some("configure"));
        assert!(m.confidence >= 0.7);
    }

    #[test]
    fn test_sql_concatenation_flagged() {
        let code = r#"function load(db, id) {
  return db.query("SELECT * FROM users WHERE id = " + id);
}
function safe(db, id) {
  return db.query("SELECT * FROM users WHERE id = ?", [id]);
}
"#;
        let matcher = matcher();
        let query = PatternQuery::new().categories(["security"]);
        let matches = matcher.find_matches(&query, Some(code), Some("javascript")).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pattern_id, "sql-injection-concatenation");
        assert_eq!(matches[0].location.start_line, 2);
        assert_eq!(matches[0].context.symbol.as_deref(), Some("load"));
    }

    #[test]
    fn test_deep_loop_nesting() {
        let code = "for (const a of xs) {\n  for (const b of ys) {\n    for (const c of zs) {\n      total += a * b * c;\n    }\n  }\n}\n";
        let matcher = matcher();
        let query = PatternQuery::new().patterns(["deep-loop-nesting"]);
        let matches = matcher.find_matches(&query, Some(code), Some("typescript")).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].captures["depth"], "3");
        assert_eq!(matches[0].location.end_line, 7);
    }

    #[test]
    fn test_singleton_class() {
        let code = "\
class Config:
    _instance = None

    @classmethod
    def get_instance(cls):
        if cls._instance is None:
            cls._instance = Config()
        return cls._instance
";
        let matcher = matcher();
        let query = PatternQuery::new().patterns(["singleton-class"]);
        let matches = matcher.find_matches(&query, Some(code), Some("python")).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].captures["name"], "Config");
    }

    #[test]
    fn test_satisfied_constraints_rank_above_unsatisfied() {
        let matcher = matcher();
        let query = PatternQuery::new().patterns(["long-parameter-list"]).min_confidence(0.0);
        let matches = matcher.find_matches(&query, Some(PY_FUNCTIONS), Some("python")).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches[0].constraints_satisfied);
        assert!(!matches[1].constraints_satisfied);
        assert!(matches[0].confidence > matches[1].confidence);
    }

    #[test]
    fn test_no_code_means_no_matches() {
        let matcher = matcher();
        assert!(matcher.find_matches(&PatternQuery::new(), None, None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_query_is_rejected() {
        let matcher = matcher();
        let err = matcher
            .find_matches(&PatternQuery::new().min_confidence(2.0), Some("x"), None)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_uncompilable_pattern_stays_registered_but_inert() {
        let matcher = matcher();
        let compiled = matcher.register_pattern(custom("broken", "(widget name: @n)")).unwrap();
        assert!(!compiled);
        assert!(matcher.get_pattern("broken").is_some());
        assert!(!matcher.is_compiled("broken"));
        let query = PatternQuery::new().patterns(["broken"]);
        assert!(matcher.find_matches(&query, Some(PY_FUNCTIONS), None).unwrap().is_empty());

        // re-registering a fixed definition brings it back
        assert!(matcher.register_pattern(custom("broken", "(function name: @n)")).unwrap());
        assert_eq!(matcher.find_matches(&query, Some(PY_FUNCTIONS), None).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let matcher = matcher();
        let mut pattern = custom("", "function name: @n)");
        pattern.definition.variables = vec!["missing".to_string()];
        let err = matcher.register_pattern(pattern).unwrap_err();
        match err {
            Error::InvalidPattern { errors, .. } => {
                assert!(errors.iter().any(|e| e.contains("id is required")));
                assert!(errors.iter().any(|e| e.contains("must start with '('")));
                assert!(errors.iter().any(|e| e.contains("unbalanced ')'")));
                assert!(errors.iter().any(|e| e.contains("'missing'")));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_validate_ignores_parens_inside_regex() {
        let matcher = matcher();
        let mut pattern = custom("calls", r"(call callee: /^(a|b\/c)$/ args: @args)");
        pattern.definition.constraints.insert(
            "no_args".into(),
            Constraint::MaxItems { capture: "args".into(), max: 0 },
        );
        let report = matcher.validate_pattern(&pattern);
        assert!(report.valid, "{:?}", report.errors);

        pattern.definition.constraints.insert(
            "ghost".into(),
            Constraint::MinItems { capture: "nope".into(), min: 1 },
        );
        assert!(!matcher.validate_pattern(&pattern).valid);
    }

    #[test]
    fn test_unregister_publishes_event() {
        let matcher = matcher();
        let mut events = matcher.subscribe();
        assert!(matcher.unregister_pattern("singleton-class"));
        assert!(!matcher.unregister_pattern("singleton-class"));
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::PatternUnregistered { id: "singleton-class".into() }
        );
        assert!(events.try_recv().is_err());
        assert_eq!(matcher.len(), 4);
    }

    #[test]
    fn test_results_are_cached_and_invalidated_on_registration() {
        let cache = Arc::new(Cache::new(CacheConfig::default()));
        let matcher = PatternMatcher::new(Arc::clone(&cache), PatternConfig::default());
        let query = PatternQuery::new().patterns(["long-parameter-list"]).file("src/config.py");

        let first = matcher.find_matches(&query, Some(PY_FUNCTIONS), Some("python")).unwrap();
        assert_eq!(cache.stats().category_sizes[&CacheCategory::Pattern], 1);
        let second = matcher.find_matches(&query, Some(PY_FUNCTIONS), Some("python")).unwrap();
        assert_eq!(first, second);

        matcher.register_pattern(custom("fresh", "(class)")).unwrap();
        assert_eq!(cache.stats().category_sizes[&CacheCategory::Pattern], 0);

        matcher.find_matches(&query, Some(PY_FUNCTIONS), Some("python")).unwrap();
        assert_eq!(cache.clear_by_dependency("src/config.py"), 1);
    }

    #[test]
    fn test_find_pattern_matches() {
        let matcher = matcher();
        let matches = matcher
            .find_pattern_matches("long-parameter-list", PY_FUNCTIONS, &MatchOptions::default())
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches!(
            matcher.find_pattern_matches("nope", PY_FUNCTIONS, &MatchOptions::default()),
            Err(Error::PatternNotFound(_))
        ));
    }

    #[test]
    fn test_get_patterns_filters() {
        let matcher = matcher();
        let mut python_only = custom("py-only", "(function)");
        python_only.languages = vec!["python".to_string()];
        python_only.metadata.category = "style".to_string();
        matcher.register_pattern(python_only).unwrap();

        let rust = PatternFilter { language: Some("rust".into()), ..PatternFilter::default() };
        let ids: Vec<String> = matcher.get_patterns(&rust).into_iter().map(|p| p.id).collect();
        assert!(!ids.contains(&"py-only".to_string()));
        assert!(ids.contains(&"long-parameter-list".to_string()));

        let style = PatternFilter { category: Some("style".into()), ..PatternFilter::default() };
        assert_eq!(matcher.get_patterns(&style).len(), 1);

        let anti = PatternFilter { kind: Some(PatternKind::AntiPattern), ..PatternFilter::default() };
        assert_eq!(matcher.get_patterns(&anti).len(), 3);
    }

    #[test]
    fn test_severity_and_exclusion_filters() {
        let matcher = matcher();
        let query = PatternQuery {
            severities: vec![Severity::Critical],
            ..PatternQuery::default()
        };
        let matches = matcher.find_matches(&query, Some(PY_FUNCTIONS), Some("python")).unwrap();
        assert!(matches.is_empty());

        let query = PatternQuery::new().exclude(["long-parameter-list"]);
        let matches = matcher.find_matches(&query, Some(PY_FUNCTIONS), Some("python")).unwrap();
        assert!(matches.iter().all(|m| m.pattern_id != "long-parameter-list"));
    }

    #[test]
    fn test_create_pattern_from_examples_registers() {
        let matcher = matcher();
        let pattern = matcher
            .create_pattern_from_examples(
                "Retry Limit",
                &[PatternExample::positive("RETRY_LIMIT = 3")],
                &ExampleOptions::default(),
            )
            .unwrap();
        assert_eq!(pattern.id, "retry-limit");
        assert!(matcher.is_compiled("retry-limit"));
        let matches = matcher
            .find_pattern_matches("retry-limit", "x = 1\nRETRY_LIMIT = 9\n", &MatchOptions::default())
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].location.start_line, 2);

        assert!(matches!(
            matcher.create_pattern_from_examples("none", &[], &ExampleOptions::default()),
            Err(Error::NoPositiveExamples)
        ));
    }

    #[test]
    fn test_export_import_roundtrip() {
        let source = matcher();
        source.register_pattern(custom("extra", "(class name: @n)")).unwrap();
        let exported = source.export_patterns();

        let config = PatternConfig { load_builtin: false, ..PatternConfig::default() };
        let target = PatternMatcher::new(Arc::new(Cache::new(CacheConfig::default())), config);
        assert!(target.is_empty());
        assert_eq!(target.import_patterns(exported.clone()).unwrap(), 6);
        assert_eq!(target.export_patterns(), exported);

        let mut bad = custom("bad", "");
        bad.name.clear();
        assert!(target.import_patterns(vec![custom("ok", "(class)"), bad]).is_err());
        assert!(target.get_pattern("ok").is_none());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
