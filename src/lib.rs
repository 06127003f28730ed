//! Semantic code-intelligence core: a tag- and dependency-aware cache, a
//! pattern matcher over source text and a symbol search engine.
//!
//! [`Engine`] wires the three together around one shared [`Cache`].

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod index;
pub mod pattern;
pub mod query;

pub use cache::{Cache, CacheCategory, CacheStats, PutOptions};
pub use config::Config;
pub use engine::{Engine, EngineSnapshot};
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus};
pub use index::{IndexSnapshot, Location, Relationship, RelationshipKind, Symbol, SymbolIndex, SymbolKind};
pub use pattern::{Pattern, PatternKind, PatternMatch, PatternMatcher, PatternQuery, Severity};
pub use query::{SearchEngine, SearchQuery, SearchResult, SearchType};
