//! Backport patches: symbol-anchored edits against the target tree.
//!
//! Edits never carry line numbers. Each one names the exact target text it
//! replaces (or the anchor it follows), and application refuses to proceed
//! unless that text occurs exactly once in the current file.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::change_unit::SymbolKind;
use crate::domain::error::{FixportError, Result};
use crate::textdiff;

/// Where an edit lands in its file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditPoint {
    /// Replace the body of an existing symbol (empty name for file scope).
    Symbol { name: String },
    /// Insert immediately after the anchor symbol's text.
    After { anchor: String, anchor_text: String },
    /// Append to the end of the file, creating it when missing.
    EndOfFile,
}

/// One edit of a [`BackportPatch`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolEdit {
    /// Path relative to the target root.
    pub file: String,
    pub point: EditPoint,
    pub kind: SymbolKind,
    /// Exact target text replaced; empty for insertions.
    pub before: String,
    pub after: String,
}

impl SymbolEdit {
    pub fn label(&self) -> String {
        match &self.point {
            EditPoint::Symbol { name } if name.is_empty() => format!("{} (file scope)", self.file),
            EditPoint::Symbol { name } => format!("{}:{}", self.file, name),
            EditPoint::After { anchor, .. } => format!("{} after {}", self.file, anchor),
            EditPoint::EndOfFile => format!("{} (append)", self.file),
        }
    }
}

/// An ordered set of symbol edits for the target revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackportPatch {
    edits: Vec<SymbolEdit>,
}

/// Byte range of the original file replaced by an edit.
struct Splice<'a> {
    start: usize,
    end: usize,
    text: String,
    edit: &'a SymbolEdit,
}

/// Undo record returned by [`BackportPatch::apply_to`].
#[derive(Debug, Clone)]
pub struct AppliedPatch {
    originals: Vec<(PathBuf, Option<String>)>,
}

impl AppliedPatch {
    /// Restore every touched file to its pre-patch content.
    pub fn revert(&self) -> Result<()> {
        for (path, original) in &self.originals {
            match original {
                Some(content) => std::fs::write(path, content)?,
                None => {
                    if path.exists() {
                        std::fs::remove_file(path)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.originals.iter().map(|(p, _)| p.as_path())
    }
}

impl BackportPatch {
    pub fn new(edits: Vec<SymbolEdit>) -> Result<Self> {
        if edits.is_empty() {
            return Err(FixportError::SynthesisFailed(
                "patch would contain no edits".to_string(),
            ));
        }
        Ok(Self { edits })
    }

    pub fn edits(&self) -> &[SymbolEdit] {
        &self.edits
    }

    /// Target files touched, in first-edit order.
    pub fn files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = Vec::new();
        for e in &self.edits {
            if !files.contains(&e.file.as_str()) {
                files.push(&e.file);
            }
        }
        files
    }

    /// SHA-256 over the serialized edits, lowercase hex.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&self.edits)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Apply to the tree rooted at `root`.
    ///
    /// Every file is verified before anything is written, so a conflicting
    /// edit leaves the tree untouched.
    pub fn apply_to(&self, root: &Path) -> Result<AppliedPatch> {
        let mut staged = Vec::new();
        for (file, edits) in self.by_file() {
            let path = root.join(file);
            let original = read_optional(&path)?;
            let content = original.clone().unwrap_or_default();
            let splices = locate(&content, &edits)?;
            staged.push((path, original, render(&content, &splices)));
        }

        let mut originals = Vec::new();
        for (path, original, updated) in staged {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, updated)?;
            originals.push((path, original));
        }
        Ok(AppliedPatch { originals })
    }

    /// Content of `file` after applying this patch's edits to `content`.
    pub fn render_file(&self, file: &str, content: &str) -> Result<String> {
        let edits: Vec<&SymbolEdit> = self.edits.iter().filter(|e| e.file == file).collect();
        let splices = locate(content, &edits)?;
        Ok(render(content, &splices))
    }

    /// Render as a `git apply`-compatible unified diff against `root`.
    pub fn to_unified_diff(&self, root: &Path) -> Result<String> {
        let mut out = String::new();
        for (file, edits) in self.by_file() {
            let original = read_optional(&root.join(file))?;
            let content = original.clone().unwrap_or_default();
            let splices = locate(&content, &edits)?;

            if original.is_some() {
                out.push_str(&format!("--- a/{file}\n"));
            } else {
                out.push_str("--- /dev/null\n");
            }
            out.push_str(&format!("+++ b/{file}\n"));

            let mut delta: isize = 0;
            for s in &splices {
                let old_line = content[..s.start].matches('\n').count();
                let new_line = (old_line as isize + delta) as usize;
                let old: Vec<&str> = content[s.start..s.end].lines().collect();
                let new: Vec<&str> = s.text.lines().collect();
                let section = match &s.edit.point {
                    EditPoint::Symbol { name } => name.as_str(),
                    EditPoint::After { anchor, .. } => anchor.as_str(),
                    EditPoint::EndOfFile => "",
                };
                out.push_str(&textdiff::render_hunks(
                    &old, &new, old_line, new_line, 3, section,
                ));
                delta += new.len() as isize - old.len() as isize;
            }
        }
        Ok(out)
    }

    fn by_file(&self) -> BTreeMap<&str, Vec<&SymbolEdit>> {
        let mut map: BTreeMap<&str, Vec<&SymbolEdit>> = BTreeMap::new();
        for e in &self.edits {
            map.entry(e.file.as_str()).or_default().push(e);
        }
        map
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn unique_offset(content: &str, needle: &str, what: &str) -> Result<usize> {
    let mut hits = content.match_indices(needle);
    match (hits.next(), hits.next()) {
        (Some((offset, _)), None) => Ok(offset),
        (None, _) => Err(FixportError::PatchConflict(format!("{what} not found"))),
        (Some(_), Some(_)) => Err(FixportError::PatchConflict(format!(
            "{what} is ambiguous"
        ))),
    }
}

fn locate<'a>(content: &str, edits: &[&'a SymbolEdit]) -> Result<Vec<Splice<'a>>> {
    let mut splices = Vec::with_capacity(edits.len());
    for edit in edits {
        let splice = match &edit.point {
            EditPoint::Symbol { .. } => {
                if edit.before.is_empty() {
                    return Err(FixportError::PatchConflict(format!(
                        "{}: empty replacement target",
                        edit.label()
                    )));
                }
                let start = unique_offset(content, &edit.before, &edit.label())?;
                Splice {
                    start,
                    end: start + edit.before.len(),
                    text: edit.after.clone(),
                    edit,
                }
            }
            EditPoint::After { anchor_text, .. } => {
                let start = unique_offset(content, anchor_text, &edit.label())?;
                let end = start + anchor_text.len();
                let text = if anchor_text.ends_with('\n') {
                    edit.after.clone()
                } else {
                    format!("\n{}", edit.after)
                };
                Splice {
                    start: end,
                    end,
                    text,
                    edit,
                }
            }
            EditPoint::EndOfFile => {
                let text = if content.is_empty() || content.ends_with('\n') {
                    edit.after.clone()
                } else {
                    format!("\n{}", edit.after)
                };
                Splice {
                    start: content.len(),
                    end: content.len(),
                    text,
                    edit,
                }
            }
        };
        splices.push(splice);
    }

    splices.sort_by_key(|s| (s.start, s.end));
    let mut cursor = 0;
    for s in &splices {
        if s.start < cursor {
            return Err(FixportError::PatchConflict(format!(
                "{} overlaps another edit",
                s.edit.label()
            )));
        }
        cursor = s.end;
    }
    Ok(splices)
}

fn render(content: &str, splices: &[Splice<'_>]) -> String {
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for s in splices {
        out.push_str(&content[cursor..s.start]);
        out.push_str(&s.text);
        cursor = s.end;
    }
    out.push_str(&content[cursor..]);
    out
}
