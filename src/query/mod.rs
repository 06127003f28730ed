// Symbol search: query and result types

pub mod engine;
pub mod similarity;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::{RelationshipKind, Symbol, SymbolKind};

pub use engine::SearchEngine;

/// How the query text is matched against symbol names
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Exact,
    Fuzzy,
    Semantic,
    Regex,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Exact => "exact",
            SearchType::Fuzzy => "fuzzy",
            SearchType::Semantic => "semantic",
            SearchType::Regex => "regex",
        }
    }
}

/// Where a search is confined to
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchScope {
    #[default]
    Project,
    File { path: String },
    Module { name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub languages: Vec<String>,
    pub kinds: Vec<SymbolKind>,
    /// Glob matched against the symbol's file path
    pub file_pattern: Option<String>,
    pub scope: SearchScope,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Result cap; the engine default applies when unset
    pub max_results: Option<usize>,
    /// Attach each result's outgoing references
    pub include_references: bool,
    /// Attach each result's enclosing (parent) symbol
    pub include_definitions: bool,
    /// Also match identifiers across naming conventions (`parse_file` ~ `parseFile`)
    pub cross_language: bool,
    pub case_sensitive: bool,
}

/// A symbol search request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    #[serde(default, rename = "type")]
    pub search_type: SearchType,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub options: SearchOptions,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, search_type: SearchType) -> Self {
        Self {
            text: text.into(),
            search_type,
            ..Self::default()
        }
    }

    pub fn exact(text: impl Into<String>) -> Self {
        Self::new(text, SearchType::Exact)
    }

    pub fn fuzzy(text: impl Into<String>) -> Self {
        Self::new(text, SearchType::Fuzzy)
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::new(pattern, SearchType::Regex)
    }

    pub fn semantic(text: impl Into<String>) -> Self {
        Self::new(text, SearchType::Semantic)
    }

    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = SymbolKind>) -> Self {
        self.filters.kinds = kinds.into_iter().collect();
        self
    }

    pub fn file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.filters.file_pattern = Some(pattern.into());
        self
    }

    pub fn scope(mut self, scope: SearchScope) -> Self {
        self.filters.scope = scope;
        self
    }

    pub fn max_results(mut self, max: usize) -> Self {
        self.options.max_results = Some(max);
        self
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.options.case_sensitive = yes;
        self
    }

    pub fn cross_language(mut self, yes: bool) -> Self {
        self.options.cross_language = yes;
        self
    }

    pub fn include_references(mut self, yes: bool) -> Self {
        self.options.include_references = yes;
        self
    }

    pub fn include_definitions(mut self, yes: bool) -> Self {
        self.options.include_definitions = yes;
        self
    }

    /// Reject malformed queries before any work is done
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidQuery("query text must not be empty".into()));
        }
        if self.options.max_results == Some(0) {
            return Err(Error::InvalidQuery("max_results must be greater than 0".into()));
        }
        if let Some(pattern) = &self.filters.file_pattern {
            glob::Pattern::new(pattern)
                .map_err(|e| Error::InvalidQuery(format!("invalid file pattern '{}': {}", pattern, e)))?;
        }
        Ok(())
    }
}

/// Kind of match that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    CaseInsensitive,
    Substring,
    Fuzzy,
    Regex,
    Semantic,
    Reference,
    Similar,
    /// Produced by a structural pattern over the symbol's signature
    Pattern,
}

/// Character range (in chars) inside the symbol name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub score: f64,
    pub match_type: MatchType,
    #[serde(default)]
    pub highlights: Vec<HighlightRange>,
    /// Edge kind, for results produced by relationship traversal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<RelationshipKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub symbol: Symbol,
    #[serde(rename = "match")]
    pub match_info: MatchInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Symbol>,
}

/// Flavor of `search_by_pattern`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSearchType {
    Regex,
    Ast,
    Semantic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_validation() {
        assert!(SearchQuery::exact("parse").validate().is_ok());
        assert!(SearchQuery::exact("  ").validate().is_err());
        assert!(SearchQuery::exact("x").max_results(0).validate().is_err());
        assert!(SearchQuery::exact("x").file_pattern("src/[").validate().is_err());
        assert!(SearchQuery::exact("x").file_pattern("src/**/*.ts").validate().is_ok());
    }

    #[test]
    fn test_query_deserializes_from_wire_shape() {
        let query: SearchQuery = serde_json::from_str(
            r#"{"text": "parsefile", "type": "fuzzy", "filters": {"languages": ["python"]}}"#,
        )
        .unwrap();
        assert_eq!(query.search_type, SearchType::Fuzzy);
        assert_eq!(query.filters.languages, vec!["python"]);
        assert_eq!(query.filters.scope, SearchScope::Project);
        assert!(!query.options.case_sensitive);
    }
}
