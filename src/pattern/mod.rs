// Pattern definitions, queries and matches

pub mod catalog;
pub mod compiler;
pub mod executor;
pub mod learn;
pub mod matcher;
pub mod scan;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

pub use compiler::{CompileError, CompiledPattern, QueryExpr, QueryNode};
pub use matcher::PatternMatcher;

/// Language wildcard accepted in `Pattern::languages`
pub const ANY_LANGUAGE: &str = "*";

/// What kind of evidence a pattern relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    Structural,
    Behavioral,
    Semantic,
    AntiPattern,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Structural => "structural",
            PatternKind::Behavioral => "behavioral",
            PatternKind::Semantic => "semantic",
            PatternKind::AntiPattern => "anti-pattern",
        }
    }

    /// Literal matches are trusted more than inferred ones
    pub fn confidence_factor(&self) -> f64 {
        match self {
            PatternKind::Structural => 0.95,
            PatternKind::AntiPattern => 0.90,
            PatternKind::Behavioral => 0.85,
            PatternKind::Semantic => 0.75,
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A check over a match's captures.
///
/// Item counts split the capture on top-level commas and ignore receiver
/// parameters such as `self` and `this`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    MinItems { capture: String, min: usize },
    MaxItems { capture: String, max: usize },
    Matches { capture: String, pattern: String },
    NotMatches { capture: String, pattern: String },
}

impl Constraint {
    pub fn capture(&self) -> &str {
        match self {
            Constraint::MinItems { capture, .. }
            | Constraint::MaxItems { capture, .. }
            | Constraint::Matches { capture, .. }
            | Constraint::NotMatches { capture, .. } => capture,
        }
    }
}

/// The portable query: an S-expression string plus named constraints and
/// the capture variables it binds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub query: String,
    #[serde(default)]
    pub constraints: BTreeMap<String, Constraint>,
    #[serde(default)]
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternMetadata {
    pub category: String,
    pub severity: Severity,
    pub tags: Vec<String>,
    pub examples: Vec<String>,
    pub suggestions: Vec<String>,
}

impl Default for PatternMetadata {
    fn default() -> Self {
        Self {
            category: "general".to_string(),
            severity: Severity::Info,
            tags: Vec::new(),
            examples: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

/// A reusable, language-scoped rule for finding a code shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: PatternKind,
    pub languages: Vec<String>,
    pub definition: PatternDefinition,
    #[serde(default)]
    pub metadata: PatternMetadata,
}

impl Pattern {
    /// Whether the pattern applies to `language` (`*` applies to all)
    pub fn applies_to(&self, language: &str) -> bool {
        self.languages
            .iter()
            .any(|l| l == ANY_LANGUAGE || l.eq_ignore_ascii_case(language))
    }
}

/// Selects which registered patterns `find_matches` runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternQuery {
    pub pattern_ids: Vec<String>,
    pub languages: Vec<String>,
    pub categories: Vec<String>,
    pub severities: Vec<Severity>,
    pub exclude: Vec<String>,
    /// Overrides the configured confidence threshold
    pub min_confidence: Option<f64>,
    /// Overrides the configured result cap
    pub max_results: Option<usize>,
    /// Reported in match locations and used as a cache dependency
    pub file_path: Option<String>,
    pub file_id: Option<String>,
}

impl PatternQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patterns<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pattern_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(min) = self.min_confidence {
            if !(0.0..=1.0).contains(&min) {
                return Err(Error::InvalidQuery(format!("min_confidence must be in [0, 1], got {}", min)));
            }
        }
        if self.max_results == Some(0) {
            return Err(Error::InvalidQuery("max_results must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Options for the single-pattern convenience wrapper
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    pub language: Option<String>,
    pub file_path: Option<String>,
    pub min_confidence: Option<f64>,
    pub max_results: Option<usize>,
}

/// Filter for `get_patterns`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternFilter {
    pub kind: Option<PatternKind>,
    pub language: Option<String>,
    pub category: Option<String>,
}

impl PatternFilter {
    pub fn matches(&self, pattern: &Pattern) -> bool {
        if let Some(kind) = self.kind {
            if pattern.kind != kind {
                return false;
            }
        }
        if let Some(language) = &self.language {
            if !pattern.applies_to(language) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &pattern.metadata.category != category {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchLocation {
    pub file_id: Option<String>,
    pub file_path: Option<String>,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchContext {
    pub language: Option<String>,
    /// Innermost function or class enclosing the match
    pub symbol: Option<String>,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPresentation {
    pub matched_text: String,
    pub suggestions: Vec<String>,
    pub explanation: String,
}

/// One occurrence of a pattern in a code unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub id: String,
    pub pattern_id: String,
    pub location: MatchLocation,
    pub context: MatchContext,
    pub captures: BTreeMap<String, String>,
    pub confidence: f64,
    pub constraints_satisfied: bool,
    pub metadata: MatchPresentation,
}

/// Base 0.8, scaled by the kind factor, then by 1.1 when every declared
/// constraint held (0.8 otherwise), capped at 1.0
pub fn score_confidence(kind: PatternKind, constraints_satisfied: bool) -> f64 {
    let constraint_factor = if constraints_satisfied { 1.1 } else { 0.8 };
    (0.8 * kind.confidence_factor() * constraint_factor).min(1.0)
}

/// Result of `validate_pattern`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// A labelled snippet for `create_pattern_from_examples`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternExample {
    pub code: String,
    pub positive: bool,
    #[serde(default)]
    pub language: Option<String>,
}

impl PatternExample {
    pub fn positive(code: impl Into<String>) -> Self {
        Self { code: code.into(), positive: true, language: None }
    }

    pub fn negative(code: impl Into<String>) -> Self {
        Self { code: code.into(), positive: false, language: None }
    }

    pub fn in_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExampleOptions {
    pub kind: PatternKind,
    pub languages: Vec<String>,
    pub category: Option<String>,
    pub severity: Severity,
    pub description: Option<String>,
}

impl Default for ExampleOptions {
    fn default() -> Self {
        Self {
            kind: PatternKind::Structural,
            languages: Vec::new(),
            category: None,
            severity: Severity::Info,
            description: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_confidence_values() {
        assert!((score_confidence(PatternKind::Structural, true) - 0.836).abs() < 1e-9);
        assert!((score_confidence(PatternKind::Structural, false) - 0.608).abs() < 1e-9);
        assert!((score_confidence(PatternKind::AntiPattern, true) - 0.792).abs() < 1e-9);
        assert!(score_confidence(PatternKind::Semantic, true) < score_confidence(PatternKind::Structural, false) + 0.1);
    }

    #[test]
    fn test_satisfied_constraints_rank_higher() {
        for kind in [
            PatternKind::Structural,
            PatternKind::Behavioral,
            PatternKind::Semantic,
            PatternKind::AntiPattern,
        ] {
            assert!(score_confidence(kind, true) > score_confidence(kind, false));
        }
    }

    #[test]
    fn test_kind_serde_uses_kebab_case() {
        assert_eq!(serde_json::to_string(&PatternKind::AntiPattern).unwrap(), "\"anti-pattern\"");
        let kind: PatternKind = serde_json::from_str("\"behavioral\"").unwrap();
        assert_eq!(kind, PatternKind::Behavioral);
    }

    #[test]
    fn test_applies_to_wildcard() {
        let mut pattern = catalog::builtin_patterns().remove(0);
        pattern.languages = vec!["*".to_string()];
        assert!(pattern.applies_to("cobol"));
        pattern.languages = vec!["python".to_string()];
        assert!(pattern.applies_to("Python"));
        assert!(!pattern.applies_to("rust"));
    }

    #[test]
    fn test_pattern_query_validation() {
        assert!(PatternQuery::new().validate().is_ok());
        assert!(PatternQuery::new().min_confidence(1.5).validate().is_err());
        let query = PatternQuery { max_results: Some(0), ..PatternQuery::default() };
        assert!(query.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_confidence_in_unit_interval(idx in 0usize..4, satisfied in any::<bool>()) {
            let kind = [
                PatternKind::Structural,
                PatternKind::Behavioral,
                PatternKind::Semantic,
                PatternKind::AntiPattern,
            ][idx];
            let c = score_confidence(kind, satisfied);
            prop_assert!((0.0..=1.0).contains(&c));
        }
    }
}
