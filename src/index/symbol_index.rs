// Primary symbol table with secondary, relationship and full-text indexes

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use super::{Relationship, Symbol, SymbolKind};

/// Minimum token length kept in the full-text index
const MIN_TOKEN_LEN: usize = 3;

/// Index statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_symbols: usize,
    pub total_relationships: usize,
    pub total_files: usize,
    pub total_languages: usize,
    pub total_tokens: usize,
}

/// In-memory symbol index.
///
/// Every id held by a secondary index, the adjacency maps or the full-text
/// index is present in `symbols`. The index is only ever built whole; there
/// is no incremental mutation.
#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    symbols: HashMap<String, Symbol>,
    by_name: HashMap<String, BTreeSet<String>>,
    by_kind: HashMap<SymbolKind, BTreeSet<String>>,
    by_language: HashMap<String, BTreeSet<String>>,
    by_file: HashMap<String, BTreeSet<String>>,
    outgoing: HashMap<String, Vec<Relationship>>,
    incoming: HashMap<String, Vec<Relationship>>,
    full_text: HashMap<String, BTreeSet<String>>,
    relationship_count: usize,
}

/// Lower-case, replace punctuation with whitespace and drop short tokens.
/// Underscores are kept as part of identifiers.
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a complete index from extracted records.
    ///
    /// A later symbol with an already-seen id replaces the earlier one.
    /// Relationships whose source symbol is unknown are dropped.
    pub fn build(symbols: Vec<Symbol>, relationships: Vec<Relationship>) -> Self {
        let mut index = Self::new();
        for symbol in symbols {
            index.insert_symbol(symbol);
        }
        for rel in relationships {
            index.insert_relationship(rel);
        }
        debug!(
            "Built symbol index: {} symbols, {} relationships, {} tokens",
            index.symbols.len(),
            index.relationship_count,
            index.full_text.len()
        );
        index
    }

    fn insert_symbol(&mut self, symbol: Symbol) {
        if self.symbols.contains_key(&symbol.id) {
            debug!("Duplicate symbol id {}, keeping the last one", symbol.id);
            self.unlink_symbol(&symbol.id);
        }

        let id = symbol.id.clone();
        self.by_name
            .entry(symbol.name.to_lowercase())
            .or_default()
            .insert(id.clone());
        self.by_kind.entry(symbol.kind).or_default().insert(id.clone());
        self.by_language
            .entry(symbol.language.clone())
            .or_default()
            .insert(id.clone());
        self.by_file
            .entry(symbol.location.file.clone())
            .or_default()
            .insert(id.clone());

        for token in symbol_tokens(&symbol) {
            self.full_text.entry(token).or_default().insert(id.clone());
        }

        self.symbols.insert(id, symbol);
    }

    /// Remove a symbol from every secondary index (used for duplicate ids)
    fn unlink_symbol(&mut self, id: &str) {
        let Some(old) = self.symbols.remove(id) else {
            return;
        };
        remove_from(&mut self.by_name, &old.name.to_lowercase(), id);
        remove_from(&mut self.by_kind, &old.kind, id);
        remove_from(&mut self.by_language, &old.language, id);
        remove_from(&mut self.by_file, &old.location.file, id);
        for token in symbol_tokens(&old) {
            remove_from(&mut self.full_text, &token, id);
        }
    }

    fn insert_relationship(&mut self, rel: Relationship) {
        if !self.symbols.contains_key(&rel.from_id) {
            debug!("Dropping relationship from unknown symbol {}", rel.from_id);
            return;
        }
        self.incoming
            .entry(rel.to_id.clone())
            .or_default()
            .push(rel.clone());
        self.outgoing.entry(rel.from_id.clone()).or_default().push(rel);
        self.relationship_count += 1;
    }

    pub fn get(&self, id: &str) -> Option<&Symbol> {
        self.symbols.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.symbols.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    /// Ids whose name equals `name`, ignoring case
    pub fn ids_by_name(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.by_name.get(&name.to_lowercase())
    }

    /// Every distinct lower-cased name with the ids carrying it
    pub fn names(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.by_name.iter()
    }

    pub fn ids_by_kind(&self, kind: SymbolKind) -> Option<&BTreeSet<String>> {
        self.by_kind.get(&kind)
    }

    pub fn ids_by_language(&self, language: &str) -> Option<&BTreeSet<String>> {
        self.by_language.get(language)
    }

    pub fn ids_by_file(&self, file: &str) -> Option<&BTreeSet<String>> {
        self.by_file.get(file)
    }

    /// Ids whose name, signature or documentation contains the token
    pub fn ids_by_token(&self, token: &str) -> Option<&BTreeSet<String>> {
        self.full_text.get(token)
    }

    pub fn outgoing(&self, id: &str) -> &[Relationship] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming(&self, id: &str) -> &[Relationship] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Indexed languages, sorted
    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.by_language.keys().cloned().collect();
        languages.sort();
        languages
    }

    /// Every relationship, grouped by source symbol
    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.outgoing.values().flatten()
    }

    /// blake3 digest of the indexed content. Symbols are hashed in id order
    /// and relationships grouped by source in insertion order, so equal
    /// inputs give equal digests in any process.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let mut ids: Vec<&String> = self.symbols.keys().collect();
        ids.sort();
        for id in ids {
            if let Ok(bytes) = serde_json::to_vec(&self.symbols[id]) {
                hasher.update(&bytes);
            }
        }
        hasher.update(b"\n");
        let mut sources: Vec<&String> = self.outgoing.keys().collect();
        sources.sort();
        for source in sources {
            for rel in &self.outgoing[source] {
                if let Ok(bytes) = serde_json::to_vec(rel) {
                    hasher.update(&bytes);
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_symbols: self.symbols.len(),
            total_relationships: self.relationship_count,
            total_files: self.by_file.len(),
            total_languages: self.by_language.len(),
            total_tokens: self.full_text.len(),
        }
    }
}

fn symbol_tokens(symbol: &Symbol) -> BTreeSet<String> {
    let mut tokens: BTreeSet<String> = tokenize(&symbol.name).into_iter().collect();
    if let Some(signature) = &symbol.signature {
        tokens.extend(tokenize(signature));
    }
    if let Some(documentation) = &symbol.documentation {
        tokens.extend(tokenize(documentation));
    }
    tokens
}

fn remove_from<K, Q>(map: &mut HashMap<K, BTreeSet<String>>, key: &Q, id: &str)
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    let now_empty = match map.get_mut(key) {
        Some(ids) => {
            ids.remove(id);
            ids.is_empty()
        }
        None => false,
    };
    if now_empty {
        map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RelationshipKind;

    fn sample() -> SymbolIndex {
        SymbolIndex::build(
            vec![
                Symbol::new("s1", "parseFile", SymbolKind::Function, "src/parse.ts", "typescript")
                    .with_signature("parseFile(path: string): Ast")
                    .with_documentation("Parse a source file into an AST."),
                Symbol::new("s2", "parse_file", SymbolKind::Function, "parse.py", "python"),
                Symbol::new("s3", "Ast", SymbolKind::Class, "src/parse.ts", "typescript"),
            ],
            vec![
                Relationship::new("s1", "s3", RelationshipKind::Uses),
                Relationship::new("ghost", "s1", RelationshipKind::Calls),
            ],
        )
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Parse a source-file, into an AST!"),
            vec!["parse", "source", "file", "into", "ast"]
        );
        assert_eq!(tokenize("parse_file(x)"), vec!["parse_file"]);
        assert!(tokenize("a b c").is_empty());
    }

    #[test]
    fn test_secondary_indexes() {
        let index = sample();
        assert_eq!(index.len(), 3);
        assert_eq!(index.ids_by_name("PARSEFILE").unwrap().len(), 1);
        assert_eq!(index.ids_by_kind(SymbolKind::Function).unwrap().len(), 2);
        assert_eq!(index.ids_by_language("typescript").unwrap().len(), 2);
        assert_eq!(index.ids_by_file("src/parse.ts").unwrap().len(), 2);
        assert!(index.ids_by_token("source").unwrap().contains("s1"));
        assert_eq!(index.languages(), vec!["python", "typescript"]);
    }

    #[test]
    fn test_relationships_from_unknown_source_are_dropped() {
        let index = sample();
        assert_eq!(index.outgoing("s1").len(), 1);
        assert!(index.incoming("s1").is_empty());
        assert_eq!(index.incoming("s3").len(), 1);
        assert_eq!(index.stats().total_relationships, 1);
    }

    #[test]
    fn test_duplicate_id_replaces_previous_symbol() {
        let index = SymbolIndex::build(
            vec![
                Symbol::new("s1", "oldName", SymbolKind::Function, "a.rs", "rust"),
                Symbol::new("s1", "newName", SymbolKind::Method, "b.rs", "rust"),
            ],
            vec![],
        );
        assert_eq!(index.len(), 1);
        assert!(index.ids_by_name("oldName").is_none());
        assert!(index.ids_by_file("a.rs").is_none());
        assert!(index.ids_by_kind(SymbolKind::Function).is_none());
        assert!(index.ids_by_token("oldname").is_none());
        assert_eq!(index.get("s1").unwrap().name, "newName");
    }

    #[test]
    fn test_every_secondary_id_is_in_primary_table() {
        let index = sample();
        let secondary = index
            .names()
            .flat_map(|(_, ids)| ids.iter())
            .chain(index.full_text.values().flatten())
            .chain(index.by_kind.values().flatten())
            .chain(index.by_language.values().flatten())
            .chain(index.by_file.values().flatten());
        for id in secondary {
            assert!(index.contains(id), "dangling id {}", id);
        }
    }

    #[test]
    fn test_fingerprint_tracks_content_not_insertion_order() {
        let a = Symbol::new("a", "alpha", SymbolKind::Function, "a.rs", "rust");
        let b = Symbol::new("b", "beta", SymbolKind::Function, "b.rs", "rust");
        let forward = SymbolIndex::build(vec![a.clone(), b.clone()], vec![]);
        let reversed = SymbolIndex::build(vec![b.clone(), a.clone()], vec![]);
        assert_eq!(forward.fingerprint(), reversed.fingerprint());

        let linked = SymbolIndex::build(vec![a, b], vec![Relationship::new("a", "b", RelationshipKind::Calls)]);
        assert_ne!(forward.fingerprint(), linked.fingerprint());
        assert_ne!(forward.fingerprint(), sample().fingerprint());
    }
}
