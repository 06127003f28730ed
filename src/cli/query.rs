use anyhow::{bail, Result};

use semgraph::query::SearchResult;
use semgraph::{Engine, SearchQuery, SymbolKind};

use super::{print_json, OutputFormat, SearchMode};

#[allow(clippy::too_many_arguments)]
pub fn build_query(
    text: String,
    mode: SearchMode,
    languages: Vec<String>,
    kinds: &[String],
    file: Option<String>,
    max: Option<usize>,
    case_sensitive: bool,
    cross_language: bool,
    refs: bool,
) -> Result<SearchQuery> {
    let mut parsed = Vec::with_capacity(kinds.len());
    for kind in kinds {
        match SymbolKind::parse(kind) {
            Some(kind) => parsed.push(kind),
            None => bail!("Unknown symbol kind: {}", kind),
        }
    }

    let mut query = SearchQuery::new(text, mode.into())
        .languages(languages)
        .kinds(parsed)
        .case_sensitive(case_sensitive)
        .cross_language(cross_language)
        .include_references(refs);
    if let Some(file) = file {
        query = query.file_pattern(file);
    }
    if let Some(max) = max {
        query = query.max_results(max);
    }
    Ok(query)
}

pub fn search(engine: &Engine, query: &SearchQuery, format: OutputFormat) -> Result<()> {
    let results = engine.search().search_symbols(query)?;
    match format {
        OutputFormat::Json => print_json(&results),
        OutputFormat::Text => {
            print_results(&format!("matching '{}'", query.text), &results);
            Ok(())
        }
    }
}

pub fn search_by_language(engine: &Engine, query: &SearchQuery, format: OutputFormat) -> Result<()> {
    let grouped = engine.search().search_cross_language(query)?;
    match format {
        OutputFormat::Json => print_json(&grouped),
        OutputFormat::Text => {
            for (language, results) in &grouped {
                println!("\n[{}]", language);
                print_results(&format!("matching '{}'", query.text), results);
            }
            Ok(())
        }
    }
}

pub fn similar(engine: &Engine, symbol: &str, threshold: Option<f64>, format: OutputFormat) -> Result<()> {
    let results = engine.search().find_similar(symbol, threshold)?;
    match format {
        OutputFormat::Json => print_json(&results),
        OutputFormat::Text => {
            print_results(&format!("similar to {}", symbol), &results);
            Ok(())
        }
    }
}

pub fn references(engine: &Engine, symbol: &str, format: OutputFormat) -> Result<()> {
    let results = engine.search().find_references(symbol)?;
    match format {
        OutputFormat::Json => print_json(&results),
        OutputFormat::Text => {
            print_results(&format!("referenced by {}", symbol), &results);
            Ok(())
        }
    }
}

pub fn callers(engine: &Engine, symbol: &str, format: OutputFormat) -> Result<()> {
    let results = engine.search().find_incoming(symbol)?;
    match format {
        OutputFormat::Json => print_json(&results),
        OutputFormat::Text => {
            print_results(&format!("pointing at {}", symbol), &results);
            Ok(())
        }
    }
}

fn print_results(what: &str, results: &[SearchResult]) {
    if results.is_empty() {
        println!("No symbols {}", what);
        return;
    }

    println!("Found {} symbols {}:", results.len(), what);
    for result in results {
        let symbol = &result.symbol;
        let how = match result.match_info.relationship {
            Some(kind) => kind.to_string(),
            None => format!("{:?} {:.2}", result.match_info.match_type, result.match_info.score),
        };
        println!(
            "  {}:{} - {} ({}, {}) [{}]",
            symbol.location.file,
            symbol.location.line,
            symbol.name,
            symbol.kind.as_str(),
            symbol.language,
            how
        );
        for reference in &result.references {
            println!("      -> {} ({})", reference.symbol.name, reference.symbol.id);
        }
    }
}
