// Lightweight, language-tolerant code shape scanning
//
// Nothing here builds a syntax tree. Shapes are located with regexes and
// bracket balancing over a mask that blanks out comments and string
// literals.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static KEYWORD_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:def|fn|func|function\*?|fun|sub)\s+(?:\([^)]*\)\s*)?([A-Za-z_$][\w$]*)\s*(?:<[^<>()]*>)?\s*\(",
    )
    .expect("valid function regex")
});

static ARROW_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=\n]+)?=\s*(?:async\s+)?(?:function\s*)?\(")
        .expect("valid arrow regex")
});

static METHOD_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*((?:[\w<>\[\],.?*&:@]+[ \t]+)*?)([A-Za-z_$][\w$]*)[ \t]*\(")
        .expect("valid method regex")
});

static METHOD_TRAILER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?::\s*[\w<>\[\],.?|& ]+|->\s*[^{;]+|throws\s+[\w., ]+|const|override|noexcept)?\s*\{")
        .expect("valid trailer regex")
});

static CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:class|struct|object)\s+([A-Za-z_$][\w$]*)").expect("valid class regex")
});

static CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z_$][\w$]*(?:[ \t]*\.[ \t]*[A-Za-z_$][\w$]*)*)[ \t]*\(").expect("valid call regex")
});

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "else", "for", "foreach", "while", "switch", "catch", "return", "match", "elif", "with",
    "synchronized", "using", "lock", "fixed", "until", "unless", "sizeof", "await", "throw", "yield",
    "not", "and", "or", "in", "is", "lambda", "do", "try", "new", "delete",
];

const DECLARATION_KEYWORDS: &[&str] = &["def", "fn", "func", "function", "fun", "sub", "class", "struct"];

const RECEIVERS: &[&str] = &["self", "&self", "&mut self", "mut self", "cls", "this"];

/// Comment and string conventions of a source language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub slash_comments: bool,
    pub hash_comments: bool,
    pub single_quote_strings: bool,
    pub triple_quotes: bool,
    pub indent_blocks: bool,
}

impl Dialect {
    pub fn for_language(language: Option<&str>, code: &str) -> Self {
        let language = language.map(str::to_ascii_lowercase);
        match language.as_deref() {
            Some("python" | "py") => Self {
                slash_comments: false,
                hash_comments: true,
                single_quote_strings: true,
                triple_quotes: true,
                indent_blocks: true,
            },
            Some("ruby" | "rb" | "shell" | "bash" | "sh" | "perl") => Self {
                slash_comments: false,
                hash_comments: true,
                single_quote_strings: true,
                triple_quotes: false,
                indent_blocks: false,
            },
            Some("rust" | "rs") => Self {
                slash_comments: true,
                hash_comments: false,
                single_quote_strings: false,
                triple_quotes: false,
                indent_blocks: false,
            },
            Some(_) => Self {
                slash_comments: true,
                hash_comments: false,
                single_quote_strings: true,
                triple_quotes: false,
                indent_blocks: false,
            },
            None => {
                // Unknown language: guess from the shape of the code
                let looks_indented = !code.contains('{') && code.lines().any(|l| l.trim_end().ends_with(':'));
                Self {
                    slash_comments: !looks_indented,
                    hash_comments: looks_indented,
                    single_quote_strings: true,
                    triple_quotes: looks_indented,
                    indent_blocks: looks_indented,
                }
            }
        }
    }
}

/// Byte range into the scanned code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionShape {
    pub name: String,
    pub name_start: usize,
    pub params: String,
    pub body: Option<Span>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassShape {
    pub name: String,
    pub body: Option<Span>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallShape {
    pub callee: String,
    pub args: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopShape {
    /// 1 for an outermost loop
    pub depth: usize,
    /// Deepest nesting reached inside this loop, counting itself
    pub max_depth: usize,
    pub span: Span,
}

/// Maps byte offsets to 1-based lines and 0-based character columns
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    code: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(code: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(code.match_indices('\n').map(|(i, _)| i + 1));
        Self { code, starts }
    }

    pub fn position(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.code.len());
        let line = match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.starts[line];
        let column = self.code.get(start..offset).map(|s| s.chars().count()).unwrap_or(0);
        (line as u32 + 1, column as u32)
    }

    /// Text of 1-based line `line`, without its newline
    pub fn line(&self, line: u32) -> Option<&'a str> {
        let idx = (line as usize).checked_sub(1)?;
        let start = *self.starts.get(idx)?;
        let end = self.starts.get(idx + 1).map(|e| e - 1).unwrap_or(self.code.len());
        self.code.get(start..end)
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }
}

/// Mark which bytes are code (not inside a comment or string literal)
pub fn code_mask(code: &str, dialect: Dialect) -> Vec<bool> {
    let bytes = code.as_bytes();
    let mut mask = vec![true; bytes.len()];
    let mut i = 0;

    let blank = |mask: &mut Vec<bool>, from: usize, to: usize| {
        for m in &mut mask[from..to.min(bytes.len())] {
            *m = false;
        }
    };

    while i < bytes.len() {
        let rest = &bytes[i..];
        if dialect.slash_comments && rest.starts_with(b"//") || dialect.hash_comments && rest[0] == b'#' {
            let end = memchr_newline(bytes, i);
            blank(&mut mask, i, end);
            i = end;
        } else if dialect.slash_comments && rest.starts_with(b"/*") {
            let end = find_from(code, i + 2, "*/").map(|e| e + 2).unwrap_or(bytes.len());
            blank(&mut mask, i, end);
            i = end;
        } else if dialect.triple_quotes && (rest.starts_with(b"\"\"\"") || rest.starts_with(b"'''")) {
            let delimiter = &code[i..i + 3];
            let end = find_from(code, i + 3, delimiter).map(|e| e + 3).unwrap_or(bytes.len());
            blank(&mut mask, i, end);
            i = end;
        } else if rest[0] == b'"' || rest[0] == b'`' || (rest[0] == b'\'' && dialect.single_quote_strings) {
            let end = string_end(bytes, i);
            blank(&mut mask, i, end);
            i = end;
        } else if rest[0] == b'\'' && !dialect.single_quote_strings {
            // Char literal ('x', '\n') or a lifetime ('a)
            let end = char_literal_end(bytes, i).unwrap_or(i + 1);
            if end > i + 1 {
                blank(&mut mask, i, end);
            }
            i = end;
        } else {
            i += 1;
        }
    }
    mask
}

fn memchr_newline(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|p| from + p)
        .unwrap_or(bytes.len())
}

fn find_from(code: &str, from: usize, needle: &str) -> Option<usize> {
    code.get(from..)?.find(needle).map(|p| from + p)
}

/// End (exclusive) of a quoted literal starting at `start`. Plain quotes stop
/// at the end of the line, backticks may span lines.
fn string_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if quote != b'`' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn char_literal_end(bytes: &[u8], start: usize) -> Option<usize> {
    let next = *bytes.get(start + 1)?;
    if next == b'\\' {
        let close = bytes[start + 2..].iter().take(10).position(|b| *b == b'\'')?;
        return Some(start + 2 + close + 1);
    }
    // Multi-byte chars: find the closing quote right after one scalar value
    let width = utf8_width(next);
    if bytes.get(start + 1 + width) == Some(&b'\'') {
        Some(start + 2 + width)
    } else {
        None
    }
}

fn utf8_width(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >> 5 == 0b110 => 2,
        b if b >> 4 == 0b1110 => 3,
        _ => 4,
    }
}

/// Index of the bracket closing the one at `open`, skipping masked bytes
pub fn find_matching(code: &str, mask: &[bool], open: usize) -> Option<usize> {
    if !is_code(mask, open) {
        return None;
    }
    let bytes = code.as_bytes();
    let (open_b, close_b) = match bytes.get(open)? {
        b'(' => (b'(', b')'),
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };
    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        if !is_code(mask, i) {
            continue;
        }
        if *b == open_b {
            depth += 1;
        } else if *b == close_b {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Count comma-separated items at bracket depth zero, ignoring receivers
/// such as `self` or `this` and empty segments
pub fn count_items(text: &str) -> usize {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '(' | '[' | '{' | '<' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' | '>' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth <= 0 => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    items.push(current);

    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .filter(|item| {
            let head = item.split(':').next().unwrap_or(item).trim();
            !RECEIVERS.contains(&head)
        })
        .count()
}

fn is_code(mask: &[bool], offset: usize) -> bool {
    mask.get(offset).copied().unwrap_or(false)
}

fn line_start(code: &str, offset: usize) -> usize {
    code[..offset].rfind('\n').map(|p| p + 1).unwrap_or(0)
}

fn line_end(code: &str, offset: usize) -> usize {
    code[offset..].find('\n').map(|p| offset + p).unwrap_or(code.len())
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Span of an indentation block whose header line contains `header`.
/// The block ends before the first non-blank line indented no deeper than
/// the header.
fn indent_block(code: &str, header: usize) -> Option<Span> {
    let header_start = line_start(code, header);
    let header_indent = indent_width(&code[header_start..]);
    let body_start = line_end(code, header) + 1;
    if body_start >= code.len() {
        return None;
    }

    let mut end = body_start;
    let mut offset = body_start;
    for line in code[body_start..].split_inclusive('\n') {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            if indent_width(line) <= header_indent {
                break;
            }
            end = offset + line.trim_end().len();
        }
        offset += line.len();
    }
    (end > body_start).then_some(Span { start: body_start, end })
}

/// Body block following `from`: a brace block, or an indentation block for
/// indentation-structured dialects. Stops at a `;` before any `{`.
fn block_after(code: &str, mask: &[bool], dialect: Dialect, from: usize) -> Option<Span> {
    if dialect.indent_blocks {
        let colon = code[from..].find(':').map(|p| from + p)?;
        if code[from..colon].contains('\n') {
            return None;
        }
        return indent_block(code, colon);
    }
    let bytes = code.as_bytes();
    for i in from..bytes.len() {
        if !mask[i] {
            continue;
        }
        match bytes[i] {
            b'{' => {
                let close = find_matching(code, mask, i)?;
                return Some(Span { start: i, end: close + 1 });
            }
            b';' => return None,
            _ => {}
        }
    }
    None
}

pub fn scan_functions(code: &str, mask: &[bool], dialect: Dialect) -> Vec<FunctionShape> {
    let mut functions: Vec<FunctionShape> = Vec::new();
    let mut seen: HashSet<usize> = HashSet::new();

    for regex in [&*KEYWORD_FUNCTION, &*ARROW_FUNCTION] {
        for caps in regex.captures_iter(code) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if !is_code(mask, whole.start()) || !seen.insert(name.start()) {
                continue;
            }
            let open = whole.end() - 1;
            let Some(close) = find_matching(code, mask, open) else {
                continue;
            };
            let body = if regex.as_str() == ARROW_FUNCTION.as_str() {
                arrow_body(code, mask, close + 1)
            } else {
                block_after(code, mask, dialect, close + 1)
            };
            let end = body.map(|b| b.end).unwrap_or(close + 1);
            functions.push(FunctionShape {
                name: name.as_str().to_string(),
                name_start: name.start(),
                params: code[open + 1..close].to_string(),
                body,
                span: Span { start: whole.start(), end },
            });
        }
    }

    if !dialect.indent_blocks {
        for caps in METHOD_HEADER.captures_iter(code) {
            let (Some(whole), Some(prefix), Some(name)) = (caps.get(0), caps.get(1), caps.get(2)) else {
                continue;
            };
            if !is_code(mask, name.start()) || seen.contains(&name.start()) {
                continue;
            }
            let last_prefix = prefix.as_str().split_whitespace().last().unwrap_or("");
            if CONTROL_KEYWORDS.contains(&name.as_str())
                || DECLARATION_KEYWORDS.contains(&name.as_str())
                || matches!(last_prefix, "new" | "return" | "throw" | "await" | "else" | "=")
            {
                continue;
            }
            let open = whole.end() - 1;
            let Some(close) = find_matching(code, mask, open) else {
                continue;
            };
            if !METHOD_TRAILER.is_match(&code[close + 1..]) {
                continue;
            }
            let Some(body) = block_after(code, mask, dialect, close + 1) else {
                continue;
            };
            let start = whole.start() + (whole.as_str().len() - whole.as_str().trim_start().len());
            seen.insert(name.start());
            functions.push(FunctionShape {
                name: name.as_str().to_string(),
                name_start: name.start(),
                params: code[open + 1..close].to_string(),
                body: Some(body),
                span: Span { start, end: body.end },
            });
        }
    }

    functions.sort_by_key(|f| f.span.start);
    functions
}

fn arrow_body(code: &str, mask: &[bool], from: usize) -> Option<Span> {
    let rest = code.get(from..)?;
    let arrow = rest
        .match_indices("=>")
        .map(|(p, _)| from + p)
        .find(|&p| is_code(mask, p) && is_code(mask, p + 1))?;
    if code[from..arrow].contains(['{', ';', '\n']) {
        return None;
    }
    let after = arrow + 2;
    let skip = code[after..].len() - code[after..].trim_start().len();
    let start = after + skip;
    if code[start..].starts_with('{') {
        let close = find_matching(code, mask, start)?;
        Some(Span { start, end: close + 1 })
    } else {
        let end = line_end(code, start);
        Some(Span { start, end })
    }
}

pub fn scan_classes(code: &str, mask: &[bool], dialect: Dialect) -> Vec<ClassShape> {
    CLASS
        .captures_iter(code)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            if !is_code(mask, whole.start()) {
                return None;
            }
            let body = block_after(code, mask, dialect, name.end());
            let end = body.map(|b| b.end).unwrap_or(name.end());
            Some(ClassShape {
                name: name.as_str().to_string(),
                body,
                span: Span { start: whole.start(), end },
            })
        })
        .collect()
}

pub fn scan_calls(code: &str, mask: &[bool], functions: &[FunctionShape]) -> Vec<CallShape> {
    let declared: HashSet<usize> = functions.iter().map(|f| f.name_start).collect();
    let bytes = code.as_bytes();

    CALL.captures_iter(code)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let callee = caps.get(1)?;
            if !is_code(mask, whole.start()) || declared.contains(&callee.start()) {
                return None;
            }
            let first = callee.as_str().split('.').next().unwrap_or("").trim();
            if CONTROL_KEYWORDS.contains(&first) || DECLARATION_KEYWORDS.contains(&first) {
                return None;
            }
            // Chained calls on a call result (`a().b(`) are not reported separately
            let previous_word = code[..whole.start()]
                .trim_end()
                .rsplit(|c: char| !(c.is_alphanumeric() || c == '_' || c == '*'))
                .next()
                .unwrap_or("");
            if DECLARATION_KEYWORDS.contains(&previous_word.trim_end_matches('*')) {
                return None;
            }
            if whole.start() > 0 && matches!(bytes[whole.start() - 1], b'.' | b'$') {
                return None;
            }
            let open = whole.end() - 1;
            let close = find_matching(code, mask, open)?;
            let callee: String = callee.as_str().chars().filter(|c| !c.is_whitespace()).collect();
            Some(CallShape {
                callee,
                args: code[open + 1..close].to_string(),
                span: Span { start: whole.start(), end: close + 1 },
            })
        })
        .collect()
}

/// Loops with their nesting depth. Brace dialects track `{}` frames opened
/// by a loop header; indentation dialects track header indentation.
pub fn scan_loops(code: &str, mask: &[bool], dialect: Dialect) -> Vec<LoopShape> {
    let mut loops = if dialect.indent_blocks {
        scan_indented_loops(code, mask)
    } else {
        scan_braced_loops(code, mask)
    };

    let spans: Vec<(usize, Span)> = loops.iter().map(|l| (l.depth, l.span)).collect();
    for shape in &mut loops {
        shape.max_depth = spans
            .iter()
            .filter(|(_, span)| shape.span.start <= span.start && span.start < shape.span.end)
            .map(|(depth, _)| *depth)
            .max()
            .unwrap_or(shape.depth);
    }
    loops
}

fn scan_braced_loops(code: &str, mask: &[bool]) -> Vec<LoopShape> {
    struct Frame {
        loop_idx: Option<usize>,
    }

    let bytes = code.as_bytes();
    let mut loops: Vec<LoopShape> = Vec::new();
    let mut is_do: Vec<bool> = Vec::new();
    let mut frames: Vec<Frame> = Vec::new();
    let mut pending: Option<usize> = None;
    let mut paren_depth = 0usize;
    // A `while` right after the block of a `do` loop is its condition
    let mut last_closed_do = false;
    let mut i = 0;

    while i < bytes.len() {
        if !mask[i] {
            i += 1;
            continue;
        }
        let b = bytes[i];
        if b.is_ascii_alphabetic() && (i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_')) {
            let end = bytes[i..]
                .iter()
                .position(|c| !(c.is_ascii_alphanumeric() || *c == b'_'))
                .map(|p| i + p)
                .unwrap_or(bytes.len());
            let word = &code[i..end];
            let do_condition = word == "while" && last_closed_do;
            let next = code[end..].trim_start();
            let not_a_loop = match word {
                // `impl Trait for Type` and `for<'a>` bounds
                "for" => code[line_start(code, i)..i].contains("impl") || next.starts_with('<'),
                "loop" | "do" => !next.starts_with('{'),
                _ => false,
            };
            if matches!(word, "for" | "while" | "loop" | "do" | "foreach") && !do_condition && !not_a_loop {
                let enclosing = frames.iter().filter(|f| f.loop_idx.is_some()).count();
                let depth = enclosing + usize::from(pending.is_some()) + 1;
                loops.push(LoopShape {
                    depth,
                    max_depth: depth,
                    span: Span { start: i, end: line_end(code, i) },
                });
                is_do.push(word == "do");
                pending = Some(loops.len() - 1);
            }
            last_closed_do = false;
            i = end;
            continue;
        }
        match b {
            b'(' => paren_depth += 1,
            b')' => paren_depth = paren_depth.saturating_sub(1),
            b'{' => {
                frames.push(Frame { loop_idx: pending.take() });
            }
            b'}' => {
                last_closed_do = false;
                if let Some(Frame { loop_idx: Some(idx) }) = frames.pop() {
                    loops[idx].span.end = i + 1;
                    last_closed_do = is_do[idx];
                }
            }
            b';' if paren_depth == 0 => {
                if let Some(idx) = pending.take() {
                    loops[idx].span.end = i + 1;
                }
            }
            _ => {}
        }
        if !b.is_ascii_whitespace() && b != b'}' {
            last_closed_do = false;
        }
        i += 1;
    }

    // Unclosed loops run to the end of the code
    for frame in frames {
        if let Some(idx) = frame.loop_idx {
            loops[idx].span.end = code.trim_end().len();
        }
    }
    loops
}

fn scan_indented_loops(code: &str, mask: &[bool]) -> Vec<LoopShape> {
    let mut loops: Vec<LoopShape> = Vec::new();
    // (indent, loop index)
    let mut open: Vec<(usize, usize)> = Vec::new();
    let mut offset = 0;

    for line in code.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let trimmed = line.trim();
        let first = start + (line.len() - line.trim_start().len());
        if trimmed.is_empty() || !is_code(mask, first) {
            continue;
        }
        let indent = indent_width(line);
        while let Some(&(frame_indent, idx)) = open.last() {
            if frame_indent < indent {
                break;
            }
            open.pop();
            loops[idx].span.end = code[..start].trim_end().len();
        }
        let header = trimmed.strip_prefix("async ").unwrap_or(trimmed);
        if (header.starts_with("for ") || header.starts_with("while ")) && trimmed.ends_with(':') {
            let depth = open.len() + 1;
            loops.push(LoopShape {
                depth,
                max_depth: depth,
                span: Span { start: first, end: start + line.trim_end().len() },
            });
            open.push((indent, loops.len() - 1));
        }
    }

    let end = code.trim_end().len();
    for (_, idx) in open {
        loops[idx].span.end = end;
    }
    loops
}
