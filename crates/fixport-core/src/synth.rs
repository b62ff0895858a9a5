//! Backport synthesizer.
//!
//! Replays each change unit's mainline edit script onto the drifted target
//! body. Lines removed by the fix and the lines around each insertion are
//! matched whitespace-insensitively, tolerating small local edits; an
//! identifier map learned from the aligned lines carries target-local names
//! into the inserted code.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::domain::change_unit::ChangeUnit;
use crate::domain::error::{FixportError, Result};
use crate::domain::patch::{BackportPatch, EditPoint, SymbolEdit};
use crate::extract::symbols::SymbolIndex;
use crate::probe::{already_fixed, CodePath, TargetSite};
use crate::source_tree::SourceTree;
use crate::textdiff::{char_similarity, lcs_pairs, line_ops, normalize_ws, LineOp};

/// Minimum character similarity for two drifted lines to align.
const FUZZY_LINE_THRESHOLD: f64 = 0.6;

const C_KEYWORDS: &[&str] = &[
    "auto", "bool", "break", "case", "char", "const", "continue", "default", "do", "double",
    "else", "enum", "extern", "false", "float", "for", "goto", "if", "inline", "int", "likely",
    "long", "NULL", "register", "return", "short", "signed", "sizeof", "static", "struct",
    "switch", "true", "typedef", "typeof", "union", "unlikely", "unsigned", "void", "volatile",
    "while",
];

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_]\w*").expect("valid regex"))
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_]\w*|\d\w*|\S").expect("valid regex"))
}

fn is_identifier(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

fn failed(unit: &ChangeUnit, why: impl std::fmt::Display) -> FixportError {
    FixportError::SynthesisFailed(format!("{} in {}: {}", unit.symbol(), unit.file(), why))
}

// ── Identifier map ──────────────────────────────────────────────────────

/// Mainline → target identifier substitutions.
#[derive(Debug, Clone, Default)]
pub struct IdentMap {
    map: HashMap<String, String>,
    conflicted: BTreeSet<String>,
}

impl IdentMap {
    pub fn insert(&mut self, from: &str, to: &str) {
        if from == to || self.conflicted.contains(from) {
            return;
        }
        match self.map.get(from) {
            Some(existing) if existing != to => {
                self.map.remove(from);
                self.conflicted.insert(from.to_string());
            }
            Some(_) => {}
            None => {
                self.map.insert(from.to_string(), to.to_string());
            }
        }
    }

    pub fn get(&self, from: &str) -> Option<&str> {
        self.map.get(from).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Learn from a pair of aligned lines with the same token skeleton.
    fn learn(&mut self, mainline: &str, target: &str) {
        let a: Vec<&str> = token_re().find_iter(mainline).map(|m| m.as_str()).collect();
        let b: Vec<&str> = token_re().find_iter(target).map(|m| m.as_str()).collect();
        if a.len() != b.len() {
            return;
        }
        let mut pairs = Vec::new();
        for (x, y) in a.iter().zip(&b) {
            if x == y {
                continue;
            }
            let renamable = is_identifier(x)
                && is_identifier(y)
                && !C_KEYWORDS.contains(x)
                && !C_KEYWORDS.contains(y);
            if !renamable {
                return;
            }
            pairs.push((*x, *y));
        }
        for (x, y) in pairs {
            self.insert(x, y);
        }
    }

    /// Rewrite identifiers of `line`.
    pub fn apply(&self, line: &str) -> String {
        if self.map.is_empty() {
            return line.to_string();
        }
        ident_re()
            .replace_all(line, |caps: &regex::Captures| {
                let word = &caps[0];
                self.get(word).unwrap_or(word).to_string()
            })
            .into_owned()
    }
}

// ── Replay ──────────────────────────────────────────────────────────────

/// Align mainline pre-fix lines with target lines.
///
/// Exact (whitespace-normalised) LCS first; remaining lines between two
/// anchors are then paired in order when similar enough.
fn align(original: &[&str], target: &[&str]) -> Vec<Option<usize>> {
    let o_norm: Vec<String> = original.iter().map(|l| normalize_ws(l)).collect();
    let t_norm: Vec<String> = target.iter().map(|l| normalize_ws(l)).collect();
    let mut mapping = vec![None; original.len()];
    let pairs = lcs_pairs(&o_norm, &t_norm, |a, b| a == b);
    for &(i, j) in &pairs {
        mapping[i] = Some(j);
    }

    // gaps between consecutive anchors, plus the tails
    let mut bounds: Vec<(usize, usize)> = vec![(0, 0)];
    bounds.extend(pairs.iter().map(|&(i, j)| (i + 1, j + 1)));
    let mut ends: Vec<(usize, usize)> = pairs.clone();
    ends.push((original.len(), target.len()));

    for ((o_from, t_from), (o_to, t_to)) in bounds.into_iter().zip(ends) {
        let mut t_cursor = t_from;
        for i in o_from..o_to {
            if o_norm[i].is_empty() {
                continue;
            }
            let hit = (t_cursor..t_to).find(|&j| {
                !t_norm[j].is_empty() && char_similarity(&o_norm[i], &t_norm[j]) >= FUZZY_LINE_THRESHOLD
            });
            if let Some(j) = hit {
                mapping[i] = Some(j);
                t_cursor = j + 1;
            }
        }
    }
    mapping
}

/// Where an inserted line lands relative to a target line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    Before(usize),
    After(usize),
}

/// Replay the `original` → `modified` edit script onto `target`.
///
/// `idents` seeds the identifier map (symbol renames); mappings learned from
/// aligned lines are added to it.
pub fn replay(original: &str, modified: &str, target: &str, idents: &IdentMap) -> std::result::Result<String, String> {
    let o: Vec<&str> = original.lines().collect();
    let m: Vec<&str> = modified.lines().collect();
    let t: Vec<&str> = target.lines().collect();

    let ops = line_ops(&o, &m, |a, b| normalize_ws(a) == normalize_ws(b));
    let mapping = align(&o, &t);

    let mut idents = idents.clone();
    for (i, j) in mapping.iter().enumerate() {
        if let Some(j) = j {
            if normalize_ws(o[i]) != normalize_ws(t[*j]) {
                idents.learn(o[i], t[*j]);
            }
        }
    }

    let mut deleted = vec![false; t.len()];
    for op in &ops {
        if let LineOp::Delete(i) = op {
            match mapping[*i] {
                Some(j) => deleted[j] = true,
                None => return Err(format!("removed line not found in target: `{}`", o[*i].trim())),
            }
        }
    }

    // inserted lines, keyed by the target line they attach to
    let mut inserts: Vec<(Slot, String)> = Vec::new();
    for (k, op) in ops.iter().enumerate() {
        let LineOp::Insert(j) = op else {
            continue;
        };
        let previous = ops[..k].iter().rev().find_map(|op| match op {
            LineOp::Equal(i, _) | LineOp::Delete(i) => Some(*i),
            LineOp::Insert(_) => None,
        });
        let next = ops[k + 1..].iter().find_map(|op| match op {
            LineOp::Equal(i, _) | LineOp::Delete(i) => Some(*i),
            LineOp::Insert(_) => None,
        });
        // blank neighbours are weak anchors: prefer a line with content
        let solid = |i: &usize| !o[*i].trim().is_empty();
        let slot = previous
            .filter(solid)
            .and_then(|i| mapping[i])
            .map(Slot::After)
            .or_else(|| next.filter(solid).and_then(|i| mapping[i]).map(Slot::Before))
            .or_else(|| previous.and_then(|i| mapping[i]).map(Slot::After))
            .or_else(|| next.and_then(|i| mapping[i]).map(Slot::Before));
        match slot {
            Some(slot) => inserts.push((slot, idents.apply(m[*j]))),
            None => {
                return Err(format!(
                    "no anchor in target for inserted line `{}`",
                    m[*j].trim()
                ))
            }
        }
    }

    let mut out: Vec<String> = Vec::with_capacity(t.len() + inserts.len());
    for (j, line) in t.iter().enumerate() {
        out.extend(
            inserts
                .iter()
                .filter(|(s, _)| *s == Slot::Before(j))
                .map(|(_, l)| l.clone()),
        );
        if !deleted[j] {
            out.push((*line).to_string());
        }
        out.extend(
            inserts
                .iter()
                .filter(|(s, _)| *s == Slot::After(j))
                .map(|(_, l)| l.clone()),
        );
    }

    let mut text = out.join("\n");
    if target.ends_with('\n') && !text.is_empty() {
        text.push('\n');
    }
    Ok(text)
}

// ── Synthesizer ─────────────────────────────────────────────────────────

/// Builds a [`BackportPatch`] for units judged applicable.
pub struct Synthesizer<'a> {
    tree: &'a dyn SourceTree,
}

impl<'a> Synthesizer<'a> {
    pub fn new(tree: &'a dyn SourceTree) -> Self {
        Self { tree }
    }

    /// One edit per unit that still needs changing.
    ///
    /// Fails with `SynthesisFailed` when any unit cannot be relocated or the
    /// resulting edits do not apply cleanly to the target.
    pub fn synthesize(&self, units: &[ChangeUnit], paths: &[CodePath]) -> Result<BackportPatch> {
        if units.len() != paths.len() {
            return Err(FixportError::SynthesisFailed(format!(
                "{} units but {} code paths",
                units.len(),
                paths.len()
            )));
        }

        // symbol renames across the whole fix
        let mut renames = IdentMap::default();
        for (unit, path) in units.iter().zip(paths) {
            if let Some(site) = path.site() {
                if !unit.symbol().is_file_scope() {
                    renames.insert(&unit.symbol().name, &site.symbol.name);
                }
            }
        }

        let mut edits = Vec::new();
        for (unit, path) in units.iter().zip(paths) {
            if already_fixed(unit, path) {
                debug!(unit = %unit.symbol(), "target already carries this change");
                continue;
            }
            let edit = match path {
                CodePath::Present(site) if unit.is_addition() => {
                    return Err(failed(
                        unit,
                        format!("target already defines {} differently", site.symbol),
                    ))
                }
                CodePath::Present(site) => self.replace(unit, site, &renames)?,
                CodePath::Added => self.insert(unit, units, paths, &renames)?,
                CodePath::Unconfirmed { candidate } => {
                    return Err(failed(
                        unit,
                        format!("candidate {} was not confirmed", candidate.symbol),
                    ))
                }
                CodePath::Absent => return Err(failed(unit, "not found in target")),
            };
            debug!(edit = %edit.label(), "edit synthesized");
            edits.push(edit);
        }

        let patch = BackportPatch::new(edits)?;
        self.verify(&patch)?;
        info!(edits = patch.edits().len(), files = patch.files().len(), "backport synthesized");
        Ok(patch)
    }

    fn replace(&self, unit: &ChangeUnit, site: &TargetSite, renames: &IdentMap) -> Result<SymbolEdit> {
        let after = if unit.is_removal() {
            String::new()
        } else {
            replay(unit.original(), unit.modified(), &site.text, renames)
                .map_err(|why| failed(unit, why))?
        };
        let name = if site.symbol.is_file_scope() {
            String::new()
        } else {
            site.symbol.name.clone()
        };
        Ok(SymbolEdit {
            file: site.file.clone(),
            point: EditPoint::Symbol { name },
            kind: site.symbol.kind,
            before: site.text.clone(),
            after,
        })
    }

    /// Insert a new symbol after its anchor, following anchors through other
    /// new symbols of the same fix.
    fn insert(
        &self,
        unit: &ChangeUnit,
        units: &[ChangeUnit],
        paths: &[CodePath],
        renames: &IdentMap,
    ) -> Result<SymbolEdit> {
        let content = self.tree.read(unit.file())?;
        let body: String = unit
            .modified()
            .lines()
            .map(|l| renames.apply(l) + "\n")
            .collect();

        let mut anchor = unit.anchor_after().map(str::to_string);
        let mut hops = 0;
        let point = loop {
            let (Some(name), Some(content)) = (anchor.as_deref(), content.as_deref()) else {
                break EditPoint::EndOfFile;
            };
            let target_name = renames.get(name).unwrap_or(name);
            let index = SymbolIndex::parse(content);
            if let Some(span) = index.find(target_name) {
                break EditPoint::After {
                    anchor: target_name.to_string(),
                    anchor_text: index.text(content, span).to_string(),
                };
            }
            // anchored on a symbol this fix also introduces
            let chained = units
                .iter()
                .zip(paths)
                .find(|(u, p)| **p == CodePath::Added && u.file() == unit.file() && u.symbol().name == name);
            hops += 1;
            match chained {
                Some((u, _)) if hops < units.len() => anchor = u.anchor_after().map(str::to_string),
                _ => return Err(failed(unit, format!("anchor {name} not found in target"))),
            }
        };

        Ok(SymbolEdit {
            file: unit.file().to_string(),
            point,
            kind: unit.symbol().kind,
            before: String::new(),
            after: format!("\n{body}"),
        })
    }

    /// Dry-run every file of the patch against the target tree.
    fn verify(&self, patch: &BackportPatch) -> Result<()> {
        for file in patch.files() {
            let content = self.tree.read(file)?.unwrap_or_default();
            patch.render_file(file, &content).map_err(|e| {
                FixportError::SynthesisFailed(format!("{file}: edits do not apply: {e}"))
            })?;
        }
        Ok(())
    }
}
