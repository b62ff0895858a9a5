//! Lightweight symbol indexing for C-family sources.
//!
//! Not a parser: comments and literals are blanked, braces are matched at
//! file scope, and each top-level brace block is classified from the text
//! that precedes it. That is enough to find the function, aggregate,
//! initializer or macro a changed line belongs to, in both the mainline and
//! the drifted target tree.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain::change_unit::{EnclosingSymbol, SymbolKind};

/// A top-level symbol and its line range (0-based, inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolSpan {
    pub name: String,
    pub kind: SymbolKind,
    pub start: usize,
    pub end: usize,
}

impl SymbolSpan {
    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }

    pub fn as_symbol(&self) -> EnclosingSymbol {
        EnclosingSymbol::new(self.name.clone(), self.kind)
    }
}

/// Index of the top-level symbols of one source file.
#[derive(Debug, Clone)]
pub struct SymbolIndex {
    spans: Vec<SymbolSpan>,
    line_starts: Vec<usize>,
    len: usize,
}

const SKIP_CALLERS: &[&str] = &[
    "__attribute__",
    "__attribute",
    "__printf",
    "__scanf",
    "__acquires",
    "__releases",
    "__must_hold",
    "__aligned",
    "__section",
    "__cold",
    "if",
    "while",
    "for",
    "switch",
    "return",
    "sizeof",
];

fn define_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*#\s*define\s+([A-Za-z_]\w*)").expect("valid regex"))
}

fn aggregate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(struct|union|enum)\b(?:\s+__\w+(?:\([^)]*\))?)*(?:\s+([A-Za-z_]\w*))?(?:\s+__\w+)*\s*$")
            .expect("valid regex")
    })
}

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_]\w*").expect("valid regex"))
}

/// Blank out comments and the contents of string and character literals,
/// preserving line structure.
pub fn mask_source(source: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str,
        Char,
    }

    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' {
            out.push('\n');
            if state != State::BlockComment {
                state = State::Code;
            }
            continue;
        }
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                '"' => {
                    out.push('"');
                    state = State::Str;
                }
                '\'' => {
                    out.push('\'');
                    state = State::Char;
                }
                _ => out.push(c),
            },
            State::LineComment => out.push(' '),
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
            State::Str | State::Char => {
                let close = if state == State::Str { '"' } else { '\'' };
                if c == '\\' {
                    out.push(' ');
                    match chars.next() {
                        Some('\n') => out.push('\n'),
                        Some(_) => out.push(' '),
                        None => {}
                    }
                } else if c == close {
                    out.push(c);
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
        }
    }
    out
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identifier immediately before byte offset `end` of `text`.
fn ident_before(text: &str, end: usize) -> Option<&str> {
    let head = text[..end].trim_end();
    let start = head
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
        .last()
        .map(|(i, _)| i)?;
    let ident = &head[start..];
    ident
        .chars()
        .next()
        .filter(|c| !c.is_ascii_digit())
        .map(|_| ident)
}

/// First argument of a `NAME(arg, ...)` call starting at `open`.
fn first_arg(text: &str, open: usize) -> Option<&str> {
    let rest = &text[open + 1..];
    let end = rest.find([',', ')'])?;
    let arg = rest[..end].trim();
    (!arg.is_empty()).then_some(arg)
}

/// Classify the text preceding a file-scope `{`.
fn classify(header: &str) -> Option<(String, SymbolKind)> {
    let h = collapse(header);
    if h.is_empty() {
        return None;
    }

    let mut depth = 0i32;
    let mut opens = Vec::new();
    let mut assign = None;
    for (i, c) in h.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    opens.push(i);
                }
                depth += 1;
            }
            ')' => depth -= 1,
            '[' => depth += 1,
            ']' => depth -= 1,
            '=' if depth == 0 && assign.is_none() => assign = Some(i),
            _ => {}
        }
    }

    if let Some(eq) = assign {
        let lhs = h[..eq].trim_end();
        let lhs = match lhs.find('[') {
            Some(b) => &lhs[..b],
            None => lhs,
        };
        let lhs = lhs.trim_end();
        return ident_before(lhs, lhs.len()).map(|n| (n.to_string(), SymbolKind::Variable));
    }

    for open in opens {
        let Some(name) = ident_before(&h, open) else {
            continue;
        };
        if SKIP_CALLERS.contains(&name) {
            continue;
        }
        if let Some(base) = name
            .strip_prefix("COMPAT_SYSCALL_DEFINE")
            .map(|_| "compat_sys_")
            .or_else(|| name.strip_prefix("SYSCALL_DEFINE").map(|_| "sys_"))
        {
            if let Some(arg) = first_arg(&h, open) {
                return Some((format!("{base}{arg}"), SymbolKind::Function));
            }
        }
        return Some((name.to_string(), SymbolKind::Function));
    }

    let caps = aggregate_re().captures(&h)?;
    let kind = match &caps[1] {
        "struct" => SymbolKind::Struct,
        "union" => SymbolKind::Union,
        _ => SymbolKind::Enum,
    };
    let name = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
    Some((name, kind))
}

fn is_transparent(header: &str) -> bool {
    let h = collapse(header);
    h.starts_with("extern \"") || h.starts_with("namespace")
}

impl SymbolIndex {
    pub fn parse(source: &str) -> Self {
        let masked = mask_source(source);
        let masked_lines: Vec<&str> = masked.split('\n').collect();
        let raw_lines: Vec<&str> = source.split('\n').collect();

        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));

        let mut spans: Vec<SymbolSpan> = Vec::new();
        let mut depth = 0i32;
        let mut header = String::new();
        let mut header_start: Option<usize> = None;
        // (start, name, kind) of the open top-level block
        let mut open: Option<(usize, String, SymbolKind)> = None;
        let mut skip_to_semicolon = false;
        let mut directive: Option<Option<(usize, String)>> = None;

        for (i, &line) in masked_lines.iter().enumerate() {
            // preprocessor directives and their continuations
            if let Some(define) = directive.take() {
                let continued = line.trim_end().ends_with('\\');
                if continued {
                    directive = Some(define);
                } else if let Some((start, name)) = define {
                    spans.push(SymbolSpan {
                        name,
                        kind: SymbolKind::Macro,
                        start,
                        end: i,
                    });
                }
                continue;
            }
            if line.trim_start().starts_with('#') {
                let define = if depth == 0 {
                    define_re()
                        .captures(raw_lines.get(i).copied().unwrap_or(line))
                        .map(|c| (i, c[1].to_string()))
                } else {
                    None
                };
                if depth == 0 {
                    header.clear();
                    header_start = None;
                }
                if line.trim_end().ends_with('\\') {
                    directive = Some(define);
                } else if let Some((start, name)) = define {
                    spans.push(SymbolSpan {
                        name,
                        kind: SymbolKind::Macro,
                        start,
                        end: i,
                    });
                }
                continue;
            }

            for (col, c) in line.char_indices() {
                if depth > 0 {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                if let Some((start, mut name, kind)) = open.take() {
                                    let aggregate = kind != SymbolKind::Function;
                                    if name.is_empty() {
                                        let tail = &line[col + 1..];
                                        let tail = tail.split(';').next().unwrap_or_default();
                                        name = ident_re()
                                            .find_iter(tail)
                                            .last()
                                            .map(|m| m.as_str().to_string())
                                            .unwrap_or_default();
                                    }
                                    if !name.is_empty() {
                                        spans.push(SymbolSpan {
                                            name,
                                            kind,
                                            start,
                                            end: i,
                                        });
                                    }
                                    skip_to_semicolon = aggregate;
                                }
                                header.clear();
                                header_start = None;
                            }
                        }
                        _ => {}
                    }
                    continue;
                }

                if skip_to_semicolon {
                    if c == ';' {
                        skip_to_semicolon = false;
                    }
                    continue;
                }
                match c {
                    '{' => {
                        if is_transparent(&header) {
                            header.clear();
                            header_start = None;
                            continue;
                        }
                        let start = header_start.unwrap_or(i);
                        let (name, kind) =
                            classify(&header).unwrap_or((String::new(), SymbolKind::FileScope));
                        open = (kind != SymbolKind::FileScope).then_some((start, name, kind));
                        depth = 1;
                    }
                    ';' | '}' => {
                        header.clear();
                        header_start = None;
                    }
                    _ => {
                        if !c.is_whitespace() && header_start.is_none() {
                            header_start = Some(i);
                        }
                        header.push(c);
                    }
                }
            }
            if depth == 0 {
                header.push(' ');
            }
        }

        spans.sort_by_key(|s| s.start);

        // pull directly preceding comment lines into each span
        let mut prev_end: Option<usize> = None;
        for span in spans.iter_mut() {
            while span.start > 0
                && prev_end.map_or(true, |e| span.start - 1 > e)
                && masked_lines[span.start - 1].trim().is_empty()
                && !raw_lines[span.start - 1].trim().is_empty()
            {
                span.start -= 1;
            }
            prev_end = Some(span.end);
        }

        Self {
            spans,
            line_starts,
            len: source.len(),
        }
    }

    pub fn spans(&self) -> &[SymbolSpan] {
        &self.spans
    }

    /// Innermost span containing `line` (0-based).
    pub fn enclosing(&self, line: usize) -> Option<&SymbolSpan> {
        self.spans
            .iter()
            .filter(|s| s.contains(line))
            .min_by_key(|s| s.end - s.start)
    }

    /// Definition of `name`, preferring functions over other kinds.
    pub fn find(&self, name: &str) -> Option<&SymbolSpan> {
        let mut hits: Vec<&SymbolSpan> = self.spans.iter().filter(|s| s.name == name).collect();
        hits.sort_by_key(|s| s.kind != SymbolKind::Function);
        hits.first().copied()
    }

    pub fn find_kind(&self, name: &str, kind: SymbolKind) -> Option<&SymbolSpan> {
        self.spans
            .iter()
            .find(|s| s.name == name && s.kind == kind)
    }

    pub fn of_kind(&self, kind: SymbolKind) -> impl Iterator<Item = &SymbolSpan> {
        self.spans.iter().filter(move |s| s.kind == kind)
    }

    /// Last span that ends before `line`.
    pub fn preceding(&self, line: usize) -> Option<&SymbolSpan> {
        self.spans.iter().filter(|s| s.end < line).max_by_key(|s| s.end)
    }

    /// Exact source text of `span`, including its trailing newline.
    pub fn text<'a>(&self, source: &'a str, span: &SymbolSpan) -> &'a str {
        let start = self.line_starts.get(span.start).copied().unwrap_or(self.len);
        let end = self
            .line_starts
            .get(span.end + 1)
            .copied()
            .unwrap_or(self.len);
        &source[start.min(source.len())..end.min(source.len())]
    }
}
