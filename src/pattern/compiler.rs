// Compiles the S-expression pattern language into an executable tree
//
//   (function name: @name params: @params)
//   (call callee: /^execute$/i args: @args)
//   (all (class name: @cls) (not (text /TODO/)))

use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use thiserror::Error;

use super::{Constraint, Pattern};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct CompileError {
    pub message: String,
    pub offset: usize,
}

impl CompileError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self { message: message.into(), offset }
    }
}

type CompileResult<T> = std::result::Result<T, CompileError>;

/// A node plus the optional capture bound to its whole matched text
#[derive(Debug, Clone)]
pub struct QueryExpr {
    pub node: QueryNode,
    pub capture: Option<String>,
}

#[derive(Debug, Clone)]
pub enum QueryNode {
    Function {
        name_filter: Option<Regex>,
        name: Option<String>,
        params: Option<String>,
        body: Option<String>,
    },
    Class {
        name_filter: Option<Regex>,
        name: Option<String>,
        body: Option<String>,
    },
    Call {
        callee_filter: Option<Regex>,
        callee: Option<String>,
        args: Option<String>,
    },
    Loop {
        min_depth: usize,
        depth: Option<String>,
    },
    Text {
        regex: Regex,
    },
    All(Vec<QueryExpr>),
    Any(Vec<QueryExpr>),
    Not(Box<QueryExpr>),
}

#[derive(Debug, Clone)]
pub enum CompiledConstraint {
    MinItems { capture: String, min: usize },
    MaxItems { capture: String, max: usize },
    Matches { capture: String, regex: Regex },
    NotMatches { capture: String, regex: Regex },
}

impl CompiledConstraint {
    fn compile(name: &str, constraint: &Constraint) -> CompileResult<Self> {
        let regex = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| CompileError::new(format!("constraint '{}': invalid regex: {}", name, e), 0))
        };
        Ok(match constraint {
            Constraint::MinItems { capture, min } => Self::MinItems { capture: capture.clone(), min: *min },
            Constraint::MaxItems { capture, max } => Self::MaxItems { capture: capture.clone(), max: *max },
            Constraint::Matches { capture, pattern } => Self::Matches {
                capture: capture.clone(),
                regex: regex(pattern)?,
            },
            Constraint::NotMatches { capture, pattern } => Self::NotMatches {
                capture: capture.clone(),
                regex: regex(pattern)?,
            },
        })
    }

    /// A constraint over a capture the match did not bind fails
    pub fn check(&self, captures: &BTreeMap<String, String>) -> bool {
        match self {
            Self::MinItems { capture, min } => captures
                .get(capture)
                .is_some_and(|text| super::scan::count_items(text) >= *min),
            Self::MaxItems { capture, max } => captures
                .get(capture)
                .is_some_and(|text| super::scan::count_items(text) <= *max),
            Self::Matches { capture, regex } => captures.get(capture).is_some_and(|text| regex.is_match(text)),
            Self::NotMatches { capture, regex } => captures.get(capture).is_some_and(|text| !regex.is_match(text)),
        }
    }
}

/// Executable form of a registered pattern
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub pattern_id: String,
    pub root: QueryExpr,
    pub constraints: Vec<(String, CompiledConstraint)>,
}

impl CompiledPattern {
    pub fn constraints_hold(&self, captures: &BTreeMap<String, String>) -> bool {
        self.constraints.iter().all(|(_, c)| c.check(captures))
    }
}

pub fn compile_pattern(pattern: &Pattern) -> CompileResult<CompiledPattern> {
    let root = compile_query(&pattern.definition.query)?;
    let constraints = pattern
        .definition
        .constraints
        .iter()
        .map(|(name, c)| CompiledConstraint::compile(name, c).map(|compiled| (name.clone(), compiled)))
        .collect::<CompileResult<Vec<_>>>()?;
    Ok(CompiledPattern {
        pattern_id: pattern.id.clone(),
        root,
        constraints,
    })
}

pub fn compile_query(source: &str) -> CompileResult<QueryExpr> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if let Some(token) = parser.tokens.get(parser.pos) {
        return Err(CompileError::new("trailing input after expression", token.offset));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Open,
    Close,
    Colon,
    Ident(String),
    Capture(String),
    Regex { source: String, case_insensitive: bool },
    Number(usize),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn lex(source: &str) -> CompileResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ';' => {
                // comment to end of line
                while let Some(&(_, c)) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '(' | ')' | ':' => {
                chars.next();
                let tok = match c {
                    '(' => Tok::Open,
                    ')' => Tok::Close,
                    _ => Tok::Colon,
                };
                tokens.push(Token { tok, offset });
            }
            '@' => {
                chars.next();
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                if name.is_empty() {
                    return Err(CompileError::new("expected capture name after '@'", offset));
                }
                tokens.push(Token { tok: Tok::Capture(name), offset });
            }
            '/' => {
                chars.next();
                let mut regex = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, '/')) => regex.push('/'),
                            Some((_, other)) => {
                                regex.push('\\');
                                regex.push(other);
                            }
                            None => break,
                        },
                        '/' => {
                            closed = true;
                            break;
                        }
                        other => regex.push(other),
                    }
                }
                if !closed {
                    return Err(CompileError::new("unterminated regex literal", offset));
                }
                let case_insensitive = matches!(chars.peek(), Some(&(_, 'i')));
                if case_insensitive {
                    chars.next();
                }
                tokens.push(Token {
                    tok: Tok::Regex { source: regex, case_insensitive },
                    offset,
                });
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    digits.push(c);
                    chars.next();
                }
                let value = digits
                    .parse()
                    .map_err(|_| CompileError::new("number out of range", offset))?;
                tokens.push(Token { tok: Tok::Number(value), offset });
            }
            c if is_ident_char(c) => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    ident.push(c);
                    chars.next();
                }
                tokens.push(Token { tok: Tok::Ident(ident), offset });
            }
            other => {
                return Err(CompileError::new(format!("unexpected character '{}'", other), offset));
            }
        }
    }

    Ok(tokens)
}

/// Value given to a `field:` inside a node
enum FieldValue {
    Capture(String),
    Regex(Regex),
    Number(usize),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.offset)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> CompileResult<QueryExpr> {
        let start = self.offset();
        match self.next() {
            Some(Token { tok: Tok::Open, .. }) => {}
            _ => return Err(CompileError::new("expected '('", start)),
        }
        let head = match self.next() {
            Some(Token { tok: Tok::Ident(head), .. }) => head,
            _ => return Err(CompileError::new("expected node name after '('", start)),
        };

        let mut fields: BTreeMap<String, FieldValue> = BTreeMap::new();
        let mut children = Vec::new();
        let mut positional = Vec::new();

        loop {
            let offset = self.offset();
            match self.peek() {
                None => return Err(CompileError::new(format!("unclosed '({}'", head), start)),
                Some(Tok::Close) => {
                    self.pos += 1;
                    break;
                }
                Some(Tok::Open) => children.push(self.expr()?),
                Some(Tok::Regex { .. }) => {
                    if let Some(FieldValue::Regex(regex)) = self.value()? {
                        positional.push(regex);
                    }
                }
                Some(Tok::Ident(field)) => {
                    let field = field.clone();
                    self.pos += 1;
                    if self.peek() != Some(&Tok::Colon) {
                        return Err(CompileError::new(format!("expected ':' after field '{}'", field), offset));
                    }
                    self.pos += 1;
                    let value = self
                        .value()?
                        .ok_or_else(|| CompileError::new(format!("missing value for field '{}'", field), offset))?;
                    if fields.insert(field.clone(), value).is_some() {
                        return Err(CompileError::new(format!("duplicate field '{}'", field), offset));
                    }
                }
                Some(_) => return Err(CompileError::new("unexpected token", offset)),
            }
        }

        let capture = match self.peek() {
            Some(Tok::Capture(name)) => {
                let name = name.clone();
                self.pos += 1;
                Some(name)
            }
            _ => None,
        };

        let node = build_node(&head, fields, children, positional, start)?;
        Ok(QueryExpr { node, capture })
    }

    fn value(&mut self) -> CompileResult<Option<FieldValue>> {
        let offset = self.offset();
        let value = match self.peek() {
            Some(Tok::Capture(name)) => FieldValue::Capture(name.clone()),
            Some(Tok::Number(n)) => FieldValue::Number(*n),
            Some(Tok::Regex { source, case_insensitive }) => {
                let regex = RegexBuilder::new(source)
                    .case_insensitive(*case_insensitive)
                    .build()
                    .map_err(|e| CompileError::new(format!("invalid regex: {}", e), offset))?;
                FieldValue::Regex(regex)
            }
            _ => return Ok(None),
        };
        self.pos += 1;
        Ok(Some(value))
    }
}

fn build_node(
    head: &str,
    mut fields: BTreeMap<String, FieldValue>,
    children: Vec<QueryExpr>,
    positional: Vec<Regex>,
    offset: usize,
) -> CompileResult<QueryNode> {
    let leaf = matches!(head, "function" | "class" | "call" | "loop" | "text");
    if leaf && !children.is_empty() {
        return Err(CompileError::new(format!("'{}' does not take sub-expressions", head), offset));
    }
    if head != "text" && !positional.is_empty() {
        return Err(CompileError::new(format!("'{}' does not take a bare regex", head), offset));
    }

    let node = match head {
        "function" => QueryNode::Function {
            name_filter: take_regex(&mut fields, "match", offset)?,
            name: take_capture(&mut fields, "name", offset)?,
            params: take_capture(&mut fields, "params", offset)?,
            body: take_capture(&mut fields, "body", offset)?,
        },
        "class" => QueryNode::Class {
            name_filter: take_regex(&mut fields, "match", offset)?,
            name: take_capture(&mut fields, "name", offset)?,
            body: take_capture(&mut fields, "body", offset)?,
        },
        "call" => QueryNode::Call {
            callee_filter: take_regex(&mut fields, "callee", offset)?,
            callee: take_capture(&mut fields, "name", offset)?,
            args: take_capture(&mut fields, "args", offset)?,
        },
        "loop" => QueryNode::Loop {
            min_depth: take_number(&mut fields, "min-depth", offset)?.unwrap_or(1).max(1),
            depth: take_capture(&mut fields, "depth", offset)?,
        },
        "text" => {
            let mut positional = positional.into_iter();
            match (positional.next(), positional.next()) {
                (Some(regex), None) => QueryNode::Text { regex },
                _ => return Err(CompileError::new("'text' takes exactly one regex", offset)),
            }
        }
        "all" | "any" => {
            if children.is_empty() {
                return Err(CompileError::new(format!("'{}' needs at least one sub-expression", head), offset));
            }
            if head == "all" {
                QueryNode::All(children)
            } else {
                QueryNode::Any(children)
            }
        }
        "not" => {
            let mut children = children.into_iter();
            match (children.next(), children.next()) {
                (Some(child), None) => QueryNode::Not(Box::new(child)),
                _ => return Err(CompileError::new("'not' takes exactly one sub-expression", offset)),
            }
        }
        other => return Err(CompileError::new(format!("unknown node '{}'", other), offset)),
    };

    if let Some(field) = fields.keys().next() {
        return Err(CompileError::new(format!("unknown field '{}' for '{}'", field, head), offset));
    }
    Ok(node)
}

fn take_capture(fields: &mut BTreeMap<String, FieldValue>, key: &str, offset: usize) -> CompileResult<Option<String>> {
    match fields.remove(key) {
        None => Ok(None),
        Some(FieldValue::Capture(name)) => Ok(Some(name)),
        Some(_) => Err(CompileError::new(format!("field '{}' expects a @capture", key), offset)),
    }
}

fn take_regex(fields: &mut BTreeMap<String, FieldValue>, key: &str, offset: usize) -> CompileResult<Option<Regex>> {
    match fields.remove(key) {
        None => Ok(None),
        Some(FieldValue::Regex(regex)) => Ok(Some(regex)),
        Some(_) => Err(CompileError::new(format!("field '{}' expects a /regex/", key), offset)),
    }
}

fn take_number(fields: &mut BTreeMap<String, FieldValue>, key: &str, offset: usize) -> CompileResult<Option<usize>> {
    match fields.remove(key) {
        None => Ok(None),
        Some(FieldValue::Number(n)) => Ok(Some(n)),
        Some(_) => Err(CompileError::new(format!("field '{}' expects a number", key), offset)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_function_node() {
        let expr = compile_query("(function name: @name params: @params)").unwrap();
        match expr.node {
            QueryNode::Function { name, params, body, name_filter } => {
                assert_eq!(name.as_deref(), Some("name"));
                assert_eq!(params.as_deref(), Some("params"));
                assert!(body.is_none());
                assert!(name_filter.is_none());
            }
            other => panic!("unexpected node {:?}", other),
        }
        assert!(expr.capture.is_none());
    }

    #[test]
    fn test_compile_regex_literal_with_flags_and_escapes() {
        let expr = compile_query(r"(call callee: /^exec(ute)?$/i args: @args) @call").unwrap();
        assert_eq!(expr.capture.as_deref(), Some("call"));
        let QueryNode::Call { callee_filter, .. } = expr.node else {
            panic!("expected call node");
        };
        assert!(callee_filter.unwrap().is_match("EXECUTE"));

        let expr = compile_query(r"(text /a\/b/)").unwrap();
        let QueryNode::Text { regex } = expr.node else {
            panic!("expected text node");
        };
        assert!(regex.is_match("a/b"));
    }

    #[test]
    fn test_compile_combinators() {
        let expr = compile_query(
            "(all ; functions without docs\n  (function name: @n)\n  (not (text /TODO/)))",
        )
        .unwrap();
        let QueryNode::All(children) = expr.node else {
            panic!("expected all");
        };
        assert_eq!(children.len(), 2);
        assert!(matches!(children[1].node, QueryNode::Not(_)));
    }

    #[test]
    fn test_compile_loop_depth() {
        let expr = compile_query("(loop min-depth: 3 depth: @d)").unwrap();
        assert!(matches!(expr.node, QueryNode::Loop { min_depth: 3, .. }));
    }

    #[test]
    fn test_compile_errors() {
        for (source, fragment) in [
            ("", "expected '('"),
            ("(function", "unclosed"),
            ("(widget)", "unknown node"),
            ("(function colour: @c)", "unknown field"),
            ("(function name: /x/)", "expects a @capture"),
            ("(text /unterminated)", "unterminated"),
            ("(text /(/)", "invalid regex"),
            ("(not)", "exactly one"),
            ("(all)", "at least one"),
            ("(function) (class)", "trailing input"),
            ("(function name @n)", "expected ':'"),
        ] {
            let err = compile_query(source).unwrap_err();
            assert!(
                err.message.contains(fragment),
                "{:?}: '{}' does not contain '{}'",
                source,
                err.message,
                fragment
            );
        }
    }

    #[test]
    fn test_constraint_check_requires_bound_capture() {
        let constraint = CompiledConstraint::MinItems { capture: "params".into(), min: 2 };
        let mut captures = BTreeMap::new();
        assert!(!constraint.check(&captures));
        captures.insert("params".to_string(), "a, b".to_string());
        assert!(constraint.check(&captures));
    }
}
