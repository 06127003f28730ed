// Built-in pattern catalog registered at construction

use std::collections::BTreeMap;

use super::{Constraint, Pattern, PatternDefinition, PatternKind, PatternMetadata, Severity, ANY_LANGUAGE};

const SQL_CONCATENATION: &str = r#"(?i)(["'`][^"'`]*\b(select|insert|update|delete|drop)\b[^"'`]*["'`]\s*(\+|\|\||%|\.\.|\.)|\b(select|insert|update|delete)\b[^"'`]*\$\{|\bf["'][^"']*\b(select|insert|update|delete)\b[^"']*\{|\+\s*["'`][^"'`]*\b(where|from|values|set)\b)"#;

const SINGLETON_BODY: &str = r"(?i)(get_?instance\s*\(|static\s+[\w<>?]*\s*_?instance\b|_instance\s*=|__new__|static\s+(readonly\s+)?instance\b|\bINSTANCE\b)";

const CALLABLE_PARAMETER: &str = r"(callback|\bcb\b|\bfn\b|\bfunc\b|handler|=>|\b(Fn|FnMut|FnOnce)\s*\(|Callable|\bFunction\b|\bfunc\s*\()";

#[allow(clippy::too_many_arguments)]
fn pattern(
    id: &str,
    name: &str,
    description: &str,
    kind: PatternKind,
    query: &str,
    constraints: Vec<(&str, Constraint)>,
    variables: &[&str],
    metadata: PatternMetadata,
) -> Pattern {
    Pattern {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        kind,
        languages: vec![ANY_LANGUAGE.to_string()],
        definition: PatternDefinition {
            query: query.to_string(),
            constraints: constraints
                .into_iter()
                .map(|(n, c)| (n.to_string(), c))
                .collect::<BTreeMap<_, _>>(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
        },
        metadata,
    }
}

fn metadata(category: &str, severity: Severity, tags: &[&str], suggestions: &[&str]) -> PatternMetadata {
    PatternMetadata {
        category: category.to_string(),
        severity,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        examples: Vec::new(),
        suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
    }
}

/// The seed patterns every matcher starts with
pub fn builtin_patterns() -> Vec<Pattern> {
    vec![
        pattern(
            "long-parameter-list",
            "Long Parameter List",
            "Function takes five or more parameters",
            PatternKind::AntiPattern,
            "(function name: @name params: @params)",
            vec![(
                "too_many_parameters",
                Constraint::MinItems { capture: "params".into(), min: 5 },
            )],
            &["name", "params"],
            metadata(
                "maintainability",
                Severity::Medium,
                &["code-smell", "parameters"],
                &[
                    "Group related parameters into a struct or options object",
                    "Split the function so each part needs fewer inputs",
                ],
            ),
        ),
        pattern(
            "sql-injection-concatenation",
            "SQL Built by String Concatenation",
            "Query execution call whose SQL text is assembled from strings and values",
            PatternKind::AntiPattern,
            r"(call callee: /^(query|execute|exec|executemany|raw|prepare|run)$/i name: @callee args: @args)",
            vec![(
                "string_built_sql",
                Constraint::Matches { capture: "args".into(), pattern: SQL_CONCATENATION.into() },
            )],
            &["callee", "args"],
            metadata(
                "security",
                Severity::Critical,
                &["security", "sql", "injection"],
                &["Use parameterized queries or prepared statements with bound values"],
            ),
        ),
        pattern(
            "deep-loop-nesting",
            "Deep Loop Nesting",
            "Loops nested three or more levels deep",
            PatternKind::AntiPattern,
            "(loop min-depth: 3 depth: @depth) @nest",
            Vec::new(),
            &["depth", "nest"],
            metadata(
                "complexity",
                Severity::Medium,
                &["complexity", "performance"],
                &[
                    "Extract the inner loops into a helper function",
                    "Consider an index or lookup table instead of nested scans",
                ],
            ),
        ),
        pattern(
            "singleton-class",
            "Singleton",
            "Class that manages a single shared instance of itself",
            PatternKind::Structural,
            "(class name: @name body: @body)",
            vec![(
                "holds_own_instance",
                Constraint::Matches { capture: "body".into(), pattern: SINGLETON_BODY.into() },
            )],
            &["name", "body"],
            metadata(
                "design-pattern",
                Severity::Info,
                &["design-pattern", "creational"],
                &["Prefer passing the shared instance explicitly where testability matters"],
            ),
        ),
        pattern(
            "higher-order-function",
            "Higher-Order Function",
            "Function that accepts a callable parameter",
            PatternKind::Behavioral,
            "(function name: @name params: @params)",
            vec![(
                "takes_callable",
                Constraint::Matches { capture: "params".into(), pattern: CALLABLE_PARAMETER.into() },
            )],
            &["name", "params"],
            metadata("functional", Severity::Info, &["functional"], &[]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::compiler::compile_pattern;

    #[test]
    fn test_builtins_compile() {
        for pattern in builtin_patterns() {
            compile_pattern(&pattern).unwrap_or_else(|e| panic!("{} failed: {}", pattern.id, e));
        }
    }

    #[test]
    fn test_builtin_ids_are_unique() {
        let patterns = builtin_patterns();
        let mut ids: Vec<&str> = patterns.iter().map(|p| p.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), patterns.len());
    }

    #[test]
    fn test_sql_concatenation_regex() {
        let re = regex::Regex::new(SQL_CONCATENATION).unwrap();
        assert!(re.is_match(r#""SELECT * FROM users WHERE id = " + user_id"#));
        assert!(re.is_match(r#"`SELECT * FROM t WHERE id = ${id}`"#));
        assert!(re.is_match(r#"f"SELECT * FROM t WHERE id = {uid}""#));
        assert!(!re.is_match(r#""SELECT * FROM users WHERE id = ?", [user_id]"#));
    }
}
