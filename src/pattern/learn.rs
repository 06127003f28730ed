// Deriving a pattern from labelled examples

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::executor::ScannedCode;
use super::scan::count_items;
use super::{
    Constraint, ExampleOptions, Pattern, PatternDefinition, PatternExample, PatternMetadata, ANY_LANGUAGE,
};
use crate::error::{Error, Result};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]{2,}\b").expect("valid word regex"));

const STOP_WORDS: &[&str] = &[
    "def", "function", "func", "return", "class", "self", "this", "const", "let", "var", "for", "while",
    "else", "pub", "int", "str", "string", "void", "public", "private", "static", "new", "true", "false",
    "none", "null", "and", "not", "async", "await", "import", "from",
];

/// Most distinctive tokens kept in a derived constraint
const MAX_TOKENS: usize = 5;

/// Build a best-effort pattern that matches the positive examples and,
/// where a separating feature can be found, not the negative ones.
///
/// Shapes are tried in order (function, class, loop nest, call, raw text);
/// the first shape present in every positive example wins.
pub fn derive_pattern(name: &str, examples: &[PatternExample], options: &ExampleOptions) -> Result<Pattern> {
    let positives: Vec<&PatternExample> = examples.iter().filter(|e| e.positive).collect();
    if positives.is_empty() {
        return Err(Error::NoPositiveExamples);
    }
    let negatives: Vec<&PatternExample> = examples.iter().filter(|e| !e.positive).collect();

    let language_of = |e: &PatternExample| e.language.clone().or_else(|| options.languages.first().cloned());
    let positive_languages: Vec<Option<String>> = positives.iter().map(|e| language_of(*e)).collect();
    let negative_languages: Vec<Option<String>> = negatives.iter().map(|e| language_of(*e)).collect();

    let positive_units: Vec<ScannedCode<'_>> = positives
        .iter()
        .zip(&positive_languages)
        .map(|(e, lang)| ScannedCode::new(&e.code, lang.as_deref()))
        .collect();
    let negative_units: Vec<ScannedCode<'_>> = negatives
        .iter()
        .zip(&negative_languages)
        .map(|(e, lang)| ScannedCode::new(&e.code, lang.as_deref()))
        .collect();

    let definition = derive_definition(&positive_units, &negative_units);
    debug!("Derived query for '{}': {}", name, definition.query);

    let languages = if !options.languages.is_empty() {
        options.languages.clone()
    } else {
        let found: BTreeSet<String> = examples.iter().filter_map(|e| e.language.clone()).collect();
        if found.is_empty() {
            vec![ANY_LANGUAGE.to_string()]
        } else {
            found.into_iter().collect()
        }
    };

    let description = options.description.clone().unwrap_or_else(|| {
        format!(
            "Derived from {} positive and {} negative examples",
            positives.len(),
            negatives.len()
        )
    });

    Ok(Pattern {
        id: slugify(name),
        name: name.to_string(),
        description,
        kind: options.kind,
        languages,
        definition,
        metadata: PatternMetadata {
            category: options.category.clone().unwrap_or_else(|| "custom".to_string()),
            severity: options.severity,
            tags: vec!["learned".to_string()],
            examples: positives.iter().map(|e| e.code.clone()).collect(),
            suggestions: Vec::new(),
        },
    })
}

fn derive_definition(positives: &[ScannedCode<'_>], negatives: &[ScannedCode<'_>]) -> PatternDefinition {
    let mut constraints = BTreeMap::new();
    let distinct = distinctive_tokens(positives, negatives);
    if !negatives.is_empty() && !distinct.is_empty() {
        constraints.insert(
            "distinctive_tokens".to_string(),
            Constraint::Matches {
                capture: "match".into(),
                pattern: token_alternation(&distinct),
            },
        );
    }

    if positives.iter().all(|u| !u.functions().is_empty()) {
        let max_params = |u: &ScannedCode<'_>| u.functions().iter().map(|f| count_items(&f.params)).max();
        let min_params = positives.iter().filter_map(max_params).min().unwrap_or(0);
        let negative_max = negatives.iter().filter_map(max_params).max();
        if matches!(negative_max, Some(n) if n < min_params) {
            constraints.insert(
                "min_params".to_string(),
                Constraint::MinItems { capture: "params".into(), min: min_params },
            );
        }
        return definition("(function name: @name params: @params) @match", constraints, &["name", "params", "match"]);
    }

    if positives.iter().all(|u| !u.classes().is_empty()) {
        return definition("(class name: @name body: @body) @match", constraints, &["name", "body", "match"]);
    }

    let deepest = |u: &ScannedCode<'_>| u.loops().iter().map(|l| l.max_depth).max().unwrap_or(0);
    let nesting = positives.iter().map(deepest).min().unwrap_or(0);
    if nesting >= 2 {
        return definition(
            &format!("(loop min-depth: {} depth: @depth) @match", nesting),
            constraints,
            &["depth", "match"],
        );
    }

    let callees = common_callees(positives);
    if !callees.is_empty() {
        let alternation: Vec<String> = callees.iter().map(|c| escape_literal(c)).collect();
        return definition(
            &format!("(call callee: /^(?:{})$/ name: @callee args: @args) @match", alternation.join("|")),
            constraints,
            &["callee", "args", "match"],
        );
    }

    // Raw text: the constraint would be redundant with the query itself
    constraints.remove("distinctive_tokens");
    let tokens = if distinct.is_empty() { common_tokens(positives) } else { distinct };
    let query = if tokens.is_empty() {
        let first_line = positives
            .first()
            .and_then(|u| u.code().lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or_default();
        format!("(text /{}/) @match", escape_literal(first_line))
    } else {
        format!("(text /{}/) @match", token_alternation(&tokens).replace('/', "\\/"))
    };
    definition(&query, constraints, &["match"])
}

fn definition(query: &str, constraints: BTreeMap<String, Constraint>, variables: &[&str]) -> PatternDefinition {
    PatternDefinition {
        query: query.to_string(),
        constraints,
        variables: variables.iter().map(|v| v.to_string()).collect(),
    }
}

fn tokens_of(code: &str) -> BTreeSet<String> {
    WORD.find_iter(code)
        .map(|m| m.as_str())
        .filter(|w| !STOP_WORDS.contains(&w.to_ascii_lowercase().as_str()))
        .map(str::to_string)
        .collect()
}

fn common_tokens(units: &[ScannedCode<'_>]) -> BTreeSet<String> {
    let mut sets = units.iter().map(|u| tokens_of(u.code()));
    let Some(first) = sets.next() else {
        return BTreeSet::new();
    };
    sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect())
}

/// Tokens present in every positive and in no negative example
fn distinctive_tokens(positives: &[ScannedCode<'_>], negatives: &[ScannedCode<'_>]) -> BTreeSet<String> {
    let negative: BTreeSet<String> = negatives.iter().flat_map(|u| tokens_of(u.code())).collect();
    common_tokens(positives)
        .into_iter()
        .filter(|t| !negative.contains(t))
        .take(MAX_TOKENS)
        .collect()
}

fn common_callees(units: &[ScannedCode<'_>]) -> BTreeSet<String> {
    let mut sets = units.iter().map(|u| {
        u.calls()
            .iter()
            .map(|c| c.callee.rsplit('.').next().unwrap_or(&c.callee).to_string())
            .collect::<BTreeSet<String>>()
    });
    let Some(first) = sets.next() else {
        return BTreeSet::new();
    };
    sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect())
}

fn token_alternation(tokens: &BTreeSet<String>) -> String {
    let escaped: Vec<String> = tokens.iter().map(|t| regex::escape(t)).collect();
    format!(r"\b(?:{})\b", escaped.join("|"))
}

/// Escape text for use inside a `/.../` literal
fn escape_literal(text: &str) -> String {
    regex::escape(text).replace('/', "\\/")
}

fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "custom-pattern".to_string()
    } else {
        slug
    }
}
