//! Preprocessor guards around changed lines.
//!
//! Only positive requirements become guards. `#ifndef`, negated terms and
//! `#else` branches name symbols that must be *off*, which tells us nothing
//! about whether the code is built, so they contribute nothing.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain::change_unit::Guard;
use crate::extract::symbols::mask_source;

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*#\s*(if|ifdef|ifndef|elif|else|endif)\b(.*)$").expect("valid regex")
    })
}

fn atom_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:defined\s*\(\s*(CONFIG_\w+)\s*\)|defined\s+(CONFIG_\w+)|(?:IS_ENABLED|IS_BUILTIN|IS_MODULE|IS_REACHABLE)\s*\(\s*(CONFIG_\w+)\s*\)|(CONFIG_\w+))$",
        )
        .expect("valid regex")
    })
}

/// Split `expr` on a two-character operator at parenthesis depth zero.
fn split_top(expr: &str, op: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut last = 0;
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && expr[i..].starts_with(op) => {
                parts.push(expr[last..i].trim().to_string());
                i += op.len();
                last = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(expr[last..].trim().to_string());
    parts
}

/// Remove parentheses that wrap the whole expression.
fn strip_parens(expr: &str) -> &str {
    let mut e = expr.trim();
    while e.starts_with('(') && e.ends_with(')') {
        let inner = &e[1..e.len() - 1];
        let mut depth = 0i32;
        let balanced = inner.chars().all(|c| {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            depth >= 0
        });
        if !balanced {
            break;
        }
        e = inner.trim();
    }
    e
}

fn atom(term: &str) -> Option<String> {
    let caps = atom_re().captures(term.trim())?;
    (1..=4)
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str().to_string())
}

/// Guards required by an `#if` / `#elif` expression.
pub fn parse_condition(expr: &str) -> Vec<Guard> {
    let expr = strip_parens(expr);
    let mut guards = Vec::new();
    for conjunct in split_top(expr, "&&") {
        let conjunct = strip_parens(&conjunct).to_string();
        let alternatives = split_top(&conjunct, "||");
        if alternatives.len() == 1 && conjunct.contains("&&") {
            guards.extend(parse_condition(&conjunct));
            continue;
        }
        let symbols: Option<Vec<String>> = alternatives
            .iter()
            .map(|alt| atom(strip_parens(alt)))
            .collect();
        if let Some(guard) = symbols.and_then(Guard::any_of) {
            guards.push(guard);
        }
    }
    guards
}

/// Guards in force at each line of `source`, indexed by 0-based line.
pub fn guard_table(source: &str) -> Vec<Vec<Guard>> {
    let masked = mask_source(source);
    let mut table = Vec::new();
    let mut frames: Vec<Vec<Guard>> = Vec::new();
    let mut pending = String::new();

    for text in masked.split('\n') {
        table.push(frames.iter().flatten().cloned().collect());

        let joined = if pending.is_empty() {
            text.to_string()
        } else {
            format!("{pending} {text}")
        };
        if let Some(head) = joined.trim_end().strip_suffix('\\') {
            if joined.trim_start().starts_with('#') {
                pending = head.to_string();
                continue;
            }
        }
        pending.clear();

        let Some(caps) = directive_re().captures(&joined) else {
            continue;
        };
        let rest = caps.get(2).map_or("", |m| m.as_str()).trim();
        match &caps[1] {
            "if" => frames.push(parse_condition(rest)),
            "ifdef" => frames.push(atom(rest).map(Guard::single).into_iter().collect()),
            "ifndef" => frames.push(Vec::new()),
            "elif" => {
                if let Some(top) = frames.last_mut() {
                    *top = parse_condition(rest);
                }
            }
            "else" => {
                if let Some(top) = frames.last_mut() {
                    top.clear();
                }
            }
            _ => {
                frames.pop();
            }
        }
    }
    table
}

/// Guards in force at `line` (0-based) of `source`.
pub fn guards_at(source: &str, line: usize) -> Vec<Guard> {
    guard_table(source).into_iter().nth(line).unwrap_or_default()
}
