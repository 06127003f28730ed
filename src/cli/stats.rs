use anyhow::Result;
use std::collections::BTreeMap;

use semgraph::Engine;

pub fn show_stats(engine: &Engine, detailed: bool) -> Result<()> {
    let stats = engine.search().stats();

    println!("semgraph Statistics v0.1.0");
    println!("\n📊 Index Statistics:");
    println!("  Total files: {}", stats.total_files);
    println!("  Total symbols: {}", stats.total_symbols);
    println!("  Total relationships: {}", stats.total_relationships);
    println!("  Languages: {}", engine.search().languages().join(", "));
    println!("  Indexed tokens: {}", stats.total_tokens);
    println!("  Registered patterns: {}", engine.patterns().len());

    if detailed {
        let snapshot = engine.search().export_index();

        println!("\n📈 Detailed Statistics:");
        let symbols_by_kind = count_by(snapshot.symbols.iter().map(|s| s.kind.as_str()));
        if !symbols_by_kind.is_empty() {
            println!("  Symbols by kind:");
            for (kind, count) in symbols_by_kind {
                println!("    {}: {}", kind, count);
            }
        }

        let symbols_by_language = count_by(snapshot.symbols.iter().map(|s| s.language.as_str()));
        if !symbols_by_language.is_empty() {
            println!("  Symbols by language:");
            for (language, count) in symbols_by_language {
                println!("    {}: {}", language, count);
            }
        }

        let relationships_by_type = count_by(snapshot.relationships.iter().map(|r| r.kind.as_str()));
        if !relationships_by_type.is_empty() {
            println!("  Relationships by type:");
            for (rel_type, count) in relationships_by_type {
                println!("    {}: {}", rel_type, count);
            }
        }

        let cache = engine.cache().stats();
        println!("  Cache:");
        println!("    entries: {} (~{} bytes)", cache.size, cache.memory_bytes);
        println!("    hit rate: {:.1}%", cache.hit_rate * 100.0);
        for (category, size) in &cache.category_sizes {
            println!("    {}: {}", category, size);
        }
    }

    Ok(())
}

/// Counts per key, most frequent first
fn count_by<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<(&'a str, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    let mut counts: Vec<(&str, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}
