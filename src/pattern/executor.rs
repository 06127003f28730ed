// Walks a compiled query tree over one code unit

use once_cell::unsync::OnceCell;
use std::collections::BTreeMap;

use super::compiler::{QueryExpr, QueryNode};
use super::scan::{self, CallShape, ClassShape, Dialect, FunctionShape, LineIndex, LoopShape, Span};

/// A code unit plus its lazily computed shapes. Each scanner runs at most
/// once no matter how many patterns are executed against the unit.
pub struct ScannedCode<'a> {
    code: &'a str,
    language: Option<&'a str>,
    dialect: Dialect,
    mask: Vec<bool>,
    lines: LineIndex<'a>,
    functions: OnceCell<Vec<FunctionShape>>,
    classes: OnceCell<Vec<ClassShape>>,
    calls: OnceCell<Vec<CallShape>>,
    loops: OnceCell<Vec<LoopShape>>,
}

impl<'a> ScannedCode<'a> {
    pub fn new(code: &'a str, language: Option<&'a str>) -> Self {
        let dialect = Dialect::for_language(language, code);
        Self {
            code,
            language,
            dialect,
            mask: scan::code_mask(code, dialect),
            lines: LineIndex::new(code),
            functions: OnceCell::new(),
            classes: OnceCell::new(),
            calls: OnceCell::new(),
            loops: OnceCell::new(),
        }
    }

    pub fn code(&self) -> &'a str {
        self.code
    }

    pub fn language(&self) -> Option<&'a str> {
        self.language
    }

    pub fn lines(&self) -> &LineIndex<'a> {
        &self.lines
    }

    pub fn functions(&self) -> &[FunctionShape] {
        self.functions
            .get_or_init(|| scan::scan_functions(self.code, &self.mask, self.dialect))
    }

    pub fn classes(&self) -> &[ClassShape] {
        self.classes
            .get_or_init(|| scan::scan_classes(self.code, &self.mask, self.dialect))
    }

    pub fn calls(&self) -> &[CallShape] {
        self.calls
            .get_or_init(|| scan::scan_calls(self.code, &self.mask, self.functions()))
    }

    pub fn loops(&self) -> &[LoopShape] {
        self.loops
            .get_or_init(|| scan::scan_loops(self.code, &self.mask, self.dialect))
    }

    fn text(&self, span: Span) -> &'a str {
        self.code.get(span.start..span.end).unwrap_or("")
    }

    /// Name of the innermost function or class whose span contains `offset`
    pub fn enclosing_symbol(&self, offset: usize) -> Option<&str> {
        let functions = self.functions().iter().map(|f| (f.span, f.name.as_str()));
        let classes = self.classes().iter().map(|c| (c.span, c.name.as_str()));
        functions
            .chain(classes)
            .filter(|(span, _)| span.contains(offset))
            .min_by_key(|(span, _)| span.len())
            .map(|(_, name)| name)
    }
}

/// An uninterpreted match: where it is and what it bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMatch {
    pub span: Span,
    pub captures: BTreeMap<String, String>,
}

/// Evaluate `expr` against the unit, in source order
pub fn execute(expr: &QueryExpr, unit: &ScannedCode<'_>) -> Vec<RawMatch> {
    let mut matches = eval(expr, unit);
    matches.sort_by_key(|m| (m.span.start, m.span.end));
    matches
}

fn eval(expr: &QueryExpr, unit: &ScannedCode<'_>) -> Vec<RawMatch> {
    let mut matches = eval_node(&expr.node, unit);
    if let Some(capture) = &expr.capture {
        for m in &mut matches {
            let text = unit.text(m.span).to_string();
            m.captures.entry(capture.clone()).or_insert(text);
        }
    }
    matches
}

fn bind(captures: &mut BTreeMap<String, String>, name: &Option<String>, value: &str) {
    if let Some(name) = name {
        captures.insert(name.clone(), value.to_string());
    }
}

fn eval_node(node: &QueryNode, unit: &ScannedCode<'_>) -> Vec<RawMatch> {
    match node {
        QueryNode::Function { name_filter, name, params, body } => unit
            .functions()
            .iter()
            .filter(|f| name_filter.as_ref().map_or(true, |re| re.is_match(&f.name)))
            .map(|f| {
                let mut captures = BTreeMap::new();
                bind(&mut captures, name, &f.name);
                bind(&mut captures, params, &f.params);
                if let Some(span) = f.body {
                    bind(&mut captures, body, unit.text(span));
                }
                RawMatch { span: f.span, captures }
            })
            .collect(),

        QueryNode::Class { name_filter, name, body } => unit
            .classes()
            .iter()
            .filter(|c| name_filter.as_ref().map_or(true, |re| re.is_match(&c.name)))
            .map(|c| {
                let mut captures = BTreeMap::new();
                bind(&mut captures, name, &c.name);
                if let Some(span) = c.body {
                    bind(&mut captures, body, unit.text(span));
                }
                RawMatch { span: c.span, captures }
            })
            .collect(),

        QueryNode::Call { callee_filter, callee, args } => unit
            .calls()
            .iter()
            .filter(|c| {
                callee_filter.as_ref().map_or(true, |re| {
                    let last = c.callee.rsplit('.').next().unwrap_or(&c.callee);
                    re.is_match(last) || re.is_match(&c.callee)
                })
            })
            .map(|c| {
                let mut captures = BTreeMap::new();
                bind(&mut captures, callee, &c.callee);
                bind(&mut captures, args, &c.args);
                RawMatch { span: c.span, captures }
            })
            .collect(),

        QueryNode::Loop { min_depth, depth } => unit
            .loops()
            .iter()
            // one match per nest, reported at its outermost loop
            .filter(|l| l.depth == 1 && l.max_depth >= *min_depth)
            .map(|l| {
                let mut captures = BTreeMap::new();
                bind(&mut captures, depth, &l.max_depth.to_string());
                RawMatch { span: l.span, captures }
            })
            .collect(),

        QueryNode::Text { regex } => {
            let names: Vec<&str> = regex.capture_names().flatten().collect();
            regex
                .captures_iter(unit.code)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    if whole.start() == whole.end() {
                        return None;
                    }
                    let mut captures = BTreeMap::new();
                    for name in &names {
                        if let Some(group) = caps.name(name) {
                            captures.insert(name.to_string(), group.as_str().to_string());
                        }
                    }
                    Some(RawMatch {
                        span: Span { start: whole.start(), end: whole.end() },
                        captures,
                    })
                })
                .collect()
        }

        QueryNode::All(children) => {
            let mut results = children.iter().map(|child| eval(child, unit));
            let Some(first) = results.next() else {
                return Vec::new();
            };
            let rest: Vec<Vec<RawMatch>> = results.collect();
            if rest.iter().any(Vec::is_empty) {
                return Vec::new();
            }
            first
                .into_iter()
                .map(|mut m| {
                    for other in rest.iter().filter_map(|r| r.first()) {
                        for (k, v) in &other.captures {
                            m.captures.entry(k.clone()).or_insert_with(|| v.clone());
                        }
                    }
                    m
                })
                .collect()
        }

        QueryNode::Any(children) => {
            let mut seen = std::collections::HashSet::new();
            children
                .iter()
                .flat_map(|child| eval(child, unit))
                .filter(|m| seen.insert((m.span.start, m.span.end)))
                .collect()
        }

        QueryNode::Not(child) => {
            if eval(child, unit).is_empty() {
                vec![RawMatch {
                    span: Span { start: 0, end: unit.code.trim_end().len() },
                    captures: BTreeMap::new(),
                }]
            } else {
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::compiler::compile_query;
    use proptest::prelude::*;

    const EVERY_SHAPE: &str = "(any (function name: @n params: @p body: @b) (class name: @c body: @cb) \
                               (call name: @callee args: @args) (loop min-depth: 1 depth: @d))";
    const LANGUAGES: &[Option<&str>] = &[Some("python"), Some("ruby"), Some("rust"), Some("javascript"), None];

    fn run(query: &str, code: &str, language: &str) -> Vec<RawMatch> {
        let expr = compile_query(query).unwrap();
        let unit = ScannedCode::new(code, Some(language));
        execute(&expr, &unit)
    }

    #[test]
    fn test_function_captures() {
        let matches = run(
            "(function name: @name params: @params) @whole",
            "def area(width, height):\n    return width * height\n",
            "python",
        );
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].captures["name"], "area");
        assert_eq!(matches[0].captures["params"], "width, height");
        assert!(matches[0].captures["whole"].starts_with("def area"));
    }

    #[test]
    fn test_call_filter_uses_last_segment() {
        let code = "cursor.execute(\"SELECT 1\")\nrun(x)\n";
        let matches = run("(call callee: /^execute$/ name: @callee args: @args)", code, "python");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].captures["callee"], "cursor.execute");
        assert_eq!(matches[0].captures["args"], "\"SELECT 1\"");
    }

    #[test]
    fn test_loop_nest_matches_outermost_at_depth() {
        let code = "for a in x:\n    for b in y:\n        for c in z:\n            pass\n";
        let matches = run("(loop min-depth: 3 depth: @d)", code, "python");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].captures["d"], "3");
        assert!(run("(loop min-depth: 4)", code, "python").is_empty());
    }

    #[test]
    fn test_text_named_groups() {
        let matches = run(r"(text /TODO\((?P<owner>\w+)\)/)", "// TODO(ana): fix\n", "rust");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].captures["owner"], "ana");
    }

    #[test]
    fn test_combinators() {
        let code = "function a() { helper(); }\nfunction b() { }\n";
        assert_eq!(run("(all (function name: @n) (call name: @c))", code, "javascript").len(), 2);
        assert!(run("(all (function) (text /nothing-here/))", code, "javascript").is_empty());
        assert_eq!(run("(any (function match: /^a$/) (function match: /^a$/))", code, "javascript").len(), 1);
        assert_eq!(run("(not (class))", code, "javascript").len(), 1);
        assert!(run("(not (function))", code, "javascript").is_empty());
    }

    #[test]
    fn test_enclosing_symbol() {
        let code = "class Box {\n  open() {\n    unlock();\n  }\n}\n";
        let unit = ScannedCode::new(code, Some("typescript"));
        let offset = code.find("unlock").unwrap();
        assert_eq!(unit.enclosing_symbol(offset), Some("open"));
        assert_eq!(unit.enclosing_symbol(0), Some("Box"));
    }

    proptest! {
        #[test]
        fn prop_execute_never_panics(code in "\\PC*") {
            let expr = compile_query(EVERY_SHAPE).unwrap();
            for language in LANGUAGES {
                let unit = ScannedCode::new(&code, *language);
                let _ = execute(&expr, &unit);
            }
        }

        #[test]
        fn prop_execute_never_panics_on_code_like_text(code in "[a-z_ (){}\\[\\]\"'`/#*=>;:.,\n\t]{0,120}") {
            let expr = compile_query(EVERY_SHAPE).unwrap();
            for language in LANGUAGES {
                let unit = ScannedCode::new(&code, *language);
                for m in execute(&expr, &unit) {
                    prop_assert!(m.span.start <= m.span.end);
                    prop_assert!(m.span.end <= code.len());
                }
            }
        }
    }
}
