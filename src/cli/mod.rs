// CLI command implementations

pub mod patterns;
pub mod query;
pub mod stats;

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use std::path::Path;

use semgraph::SearchType;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SearchMode {
    Exact,
    Fuzzy,
    Regex,
    Semantic,
}

impl From<SearchMode> for SearchType {
    fn from(mode: SearchMode) -> Self {
        match mode {
            SearchMode::Exact => SearchType::Exact,
            SearchMode::Fuzzy => SearchType::Fuzzy,
            SearchMode::Regex => SearchType::Regex,
            SearchMode::Semantic => SearchType::Semantic,
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Best-effort language name from a file extension
pub fn language_for_path(path: &Path) -> Option<&'static str> {
    let language = match path.extension()?.to_str()? {
        "py" | "pyi" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "rb" => "ruby",
        "php" => "php",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "swift" => "swift",
        "scala" => "scala",
        _ => return None,
    };
    Some(language)
}
