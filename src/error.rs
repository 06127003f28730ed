// Error types for the semgraph engines

use thiserror::Error;

/// Result type alias for semgraph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the cache, pattern matcher and search engine.
///
/// Transient compute failures (bad regex, cache serialization) never show up
/// here; they are logged and degrade to an empty result or a cache miss.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid pattern '{id}': {}", errors.join("; "))]
    InvalidPattern { id: String, errors: Vec<String> },

    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Cannot derive a pattern without at least one positive example")]
    NoPositiveExamples,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build an `InvalidPattern` error.
    pub fn invalid_pattern(id: impl Into<String>, errors: Vec<String>) -> Self {
        Self::InvalidPattern {
            id: id.into(),
            errors,
        }
    }

    /// Whether the error was caused by the caller's input rather than the engine.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPattern { .. }
                | Self::PatternNotFound(_)
                | Self::InvalidQuery(_)
                | Self::SymbolNotFound(_)
                | Self::NoPositiveExamples
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_pattern("p1", vec!["missing name".into(), "empty query".into()]);
        assert_eq!(err.to_string(), "Invalid pattern 'p1': missing name; empty query");

        let err = Error::PatternNotFound("nope".to_string());
        assert_eq!(err.to_string(), "Pattern not found: nope");

        insta::assert_snapshot!(
            Error::InvalidQuery("text must not be empty".to_string()).to_string(),
            @"Invalid query: text must not be empty"
        );
    }

    #[test]
    fn test_is_validation() {
        assert!(Error::InvalidQuery("x".into()).is_validation());
        assert!(Error::SymbolNotFound("s".into()).is_validation());
        assert!(Error::NoPositiveExamples.is_validation());
        assert!(!Error::Config("bad".into()).is_validation());
        assert!(!Error::Snapshot("bad".into()).is_validation());
    }
}
