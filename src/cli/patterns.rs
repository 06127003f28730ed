use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

use semgraph::pattern::{ExampleOptions, PatternExample, PatternFilter};
use semgraph::{Engine, Pattern, PatternKind, PatternQuery};

use super::{language_for_path, print_json, OutputFormat};

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

pub fn parse_kind(kind: &str) -> Result<PatternKind> {
    serde_json::from_value(serde_json::Value::String(kind.to_string()))
        .with_context(|| format!("Unknown pattern kind: {}", kind))
}

/// Register every pattern in a JSON array file
pub async fn register_file(engine: &Engine, path: &Path) -> Result<usize> {
    let patterns: Vec<Pattern> = read_json(path).await?;
    let count = engine.patterns().import_patterns(patterns)?;
    Ok(count)
}

pub async fn match_file(
    engine: &Engine,
    file: &Path,
    language: Option<String>,
    pattern_ids: Vec<String>,
    categories: Vec<String>,
    min_confidence: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    let code = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let language = language.or_else(|| language_for_path(file).map(str::to_string));

    let mut query = PatternQuery::new()
        .patterns(pattern_ids)
        .categories(categories)
        .file(file.display().to_string());
    if let Some(min) = min_confidence {
        query = query.min_confidence(min);
    }

    let matches = engine
        .patterns()
        .find_matches(&query, Some(&code), language.as_deref())?;

    if let OutputFormat::Json = format {
        return print_json(&matches);
    }

    if matches.is_empty() {
        println!("✅ No pattern matches in {}", file.display());
        return Ok(());
    }

    println!("⚠️  {} pattern matches in {}:", matches.len(), file.display());
    for m in &matches {
        let severity = engine
            .patterns()
            .get_pattern(&m.pattern_id)
            .map(|p| p.metadata.severity.to_string())
            .unwrap_or_default();
        println!(
            "  📍 {}:{} {} [{}] confidence {:.2}",
            m.location.start_line, m.location.start_column, m.pattern_id, severity, m.confidence
        );
        if let Some(symbol) = &m.context.symbol {
            println!("      in {}", symbol);
        }
        println!("      {}", m.metadata.explanation);
        for suggestion in &m.metadata.suggestions {
            println!("      💡 {}", suggestion);
        }
    }
    Ok(())
}

pub fn list(
    engine: &Engine,
    kind: Option<String>,
    language: Option<String>,
    category: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let filter = PatternFilter {
        kind: kind.as_deref().map(parse_kind).transpose()?,
        language,
        category,
    };
    let patterns = engine.patterns().get_patterns(&filter);

    match format {
        OutputFormat::Json => print_json(&patterns),
        OutputFormat::Text => {
            println!("{} patterns:", patterns.len());
            for pattern in &patterns {
                let compiled = if engine.patterns().is_compiled(&pattern.id) { "" } else { " (inert)" };
                println!(
                    "  {} - {} [{}, {}, {}]{}",
                    pattern.id,
                    pattern.name,
                    pattern.kind,
                    pattern.metadata.category,
                    pattern.metadata.severity,
                    compiled
                );
            }
            Ok(())
        }
    }
}

/// Validate every pattern in a file; fails if any is invalid
pub async fn validate_file(engine: &Engine, path: &Path) -> Result<()> {
    let patterns: Vec<Pattern> = read_json(path).await?;
    let mut invalid = 0;

    for pattern in &patterns {
        let report = engine.patterns().validate_pattern(pattern);
        if report.valid {
            println!("✅ {}", pattern.id);
        } else {
            invalid += 1;
            println!("❌ {}", pattern.id);
            for error in &report.errors {
                println!("    {}", error);
            }
        }
    }

    if invalid > 0 {
        bail!("{} of {} patterns are invalid", invalid, patterns.len());
    }
    println!("All {} patterns are valid", patterns.len());
    Ok(())
}

pub async fn learn(engine: &Engine, path: &Path, name: &str, category: Option<String>) -> Result<()> {
    let examples: Vec<PatternExample> = read_json(path).await?;
    let options = ExampleOptions {
        category,
        ..ExampleOptions::default()
    };
    let pattern = engine
        .patterns()
        .create_pattern_from_examples(name, &examples, &options)?;
    print_json(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use semgraph::Config;
    use tempfile::tempdir;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("anti-pattern").unwrap(), PatternKind::AntiPattern);
        assert!(parse_kind("gadget").is_err());
    }

    #[tokio::test]
    async fn test_validate_file_reports_invalid_patterns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(
            &path,
            r#"[{"id": "broken", "name": "Broken", "description": "", "kind": "structural",
                 "languages": ["*"], "definition": {"query": "(function"}}]"#,
        )
        .unwrap();

        let engine = Engine::new(Config::default()).unwrap();
        let err = validate_file(&engine, &path).await.unwrap_err();
        assert!(err.to_string().contains("1 of 1"));
    }
}
