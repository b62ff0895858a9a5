//! Diff Extractor: a fix commit -> ordered change units.
//!
//! The raw diff between the fix and its parent is split along symbol
//! boundaries. Hunks touching the same function (or aggregate, initializer,
//! macro) in one file become a single [`ChangeUnit`] carrying the complete
//! pre- and post-fix symbol text, plus the guards under which it is built.

pub mod guards;
pub mod symbols;
pub mod unified;

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info};

use crate::config::kbuild::{arch_guard, parse_makefile, MAX_KBUILD_DEPTH};
use crate::domain::change_unit::{ChangeUnit, EnclosingSymbol, Guard, HunkSpan, SymbolKind};
use crate::domain::commit::{CommitRef, Lineage};
use crate::domain::error::{FixportError, Result};
use crate::extract::guards::guard_table;
use crate::extract::symbols::{mask_source, SymbolIndex};
use crate::extract::unified::{is_code_path, parse_unified, FileDiff, Hunk, LineKind};
use crate::source_tree::has_code_extension;
use crate::vcs::Vcs;

pub use symbols::SymbolSpan;

/// Context lines kept around file-scope changes.
const FILE_SCOPE_CONTEXT: usize = 3;

/// Everything read from the mainline repository for one fix.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub fix: CommitRef,
    pub parent: CommitRef,
    pub message: String,
    pub units: Vec<ChangeUnit>,
}

/// Per-revision view of one side of a changed file.
struct Side {
    source: String,
    masked: Vec<String>,
    index: SymbolIndex,
    guards: Vec<Vec<Guard>>,
}

impl Side {
    fn new(source: String) -> Self {
        let masked = mask_source(&source).split('\n').map(str::to_string).collect();
        let index = SymbolIndex::parse(&source);
        let guards = guard_table(&source);
        Self {
            source,
            masked,
            index,
            guards,
        }
    }

    fn empty() -> Self {
        Self::new(String::new())
    }

    fn symbol_at(&self, line: usize) -> Option<(String, SymbolKind)> {
        self.index
            .enclosing(line)
            .map(|s| (s.name.clone(), s.kind))
    }

    /// Blank or comment-only.
    fn is_noise(&self, line: usize) -> bool {
        self.masked.get(line).map_or(true, |l| l.trim().is_empty())
    }

    fn text_of(&self, name: &str, kind: SymbolKind) -> String {
        self.index
            .find_kind(name, kind)
            .map(|s| self.index.text(&self.source, s).to_string())
            .unwrap_or_default()
    }

    fn guards_at(&self, line: usize) -> Vec<Guard> {
        self.guards.get(line).cloned().unwrap_or_default()
    }
}

/// Accumulates the hunks that land in one unit.
struct UnitDraft {
    symbol: EnclosingSymbol,
    hunks: Vec<HunkSpan>,
    line_guards: Vec<Vec<Guard>>,
    /// Pre-assembled text for file-scope units.
    texts: Option<(String, String)>,
}

impl UnitDraft {
    fn new(symbol: EnclosingSymbol) -> Self {
        Self {
            symbol,
            hunks: Vec::new(),
            line_guards: Vec::new(),
            texts: None,
        }
    }

    fn add_hunk(&mut self, hunk: &Hunk) {
        let span = HunkSpan {
            old_start: hunk.old_start,
            old_len: hunk.old_len,
            new_start: hunk.new_start,
            new_len: hunk.new_len,
        };
        if !self.hunks.contains(&span) {
            self.hunks.push(span);
        }
    }

    /// Guards common to every changed line.
    fn common_guards(&self) -> Vec<Guard> {
        let mut iter = self.line_guards.iter();
        let Some(first) = iter.next() else {
            return Vec::new();
        };
        let mut common = first.clone();
        for other in iter {
            common.retain(|g| other.contains(g));
        }
        common
    }
}

/// Extracts change units from the mainline repository.
pub struct DiffExtractor<'a> {
    vcs: &'a dyn Vcs,
}

impl<'a> DiffExtractor<'a> {
    pub fn new(vcs: &'a dyn Vcs) -> Self {
        Self { vcs }
    }

    /// Extract `fix` against its first parent.
    pub fn extract_fix(&self, fix: &CommitRef) -> Result<Extraction> {
        let parent = self.vcs.parent_of(fix.hash())?;
        let parent = CommitRef::new(parent, Lineage::MainlineFixParent)?;
        self.extract(fix, &parent)
    }

    /// Extract the change between `parent` and `fix`.
    ///
    /// Fails with `CommitNotFound` when either commit cannot be read and with
    /// `EmptyDiff` when nothing but non-code files change.
    pub fn extract(&self, fix: &CommitRef, parent: &CommitRef) -> Result<Extraction> {
        let fix_rev = self.vcs.rev_parse(fix.hash())?;
        let parent_rev = self.vcs.rev_parse(parent.hash())?;
        let message = self.vcs.message(&fix_rev)?;
        let diff = self.vcs.diff(&parent_rev, &fix_rev)?;

        let files: Vec<FileDiff> = parse_unified(&diff)
            .into_iter()
            .filter(|f| is_code_path(f.path()))
            .collect();
        debug!(fix = %fix.short(), files = files.len(), "diff parsed");

        let mut units = Vec::new();
        for file in &files {
            units.extend(self.units_for_file(file, &parent_rev, &fix_rev)?);
        }

        if units.is_empty() {
            return Err(FixportError::EmptyDiff(fix.hash().to_string()));
        }
        info!(fix = %fix.short(), units = units.len(), "change units extracted");

        Ok(Extraction {
            fix: CommitRef::new(&fix_rev, Lineage::MainlineFix)?,
            parent: CommitRef::new(&parent_rev, Lineage::MainlineFixParent)?,
            message,
            units,
        })
    }

    fn units_for_file(&self, file: &FileDiff, parent: &str, fix: &str) -> Result<Vec<ChangeUnit>> {
        let old = match &file.old_path {
            Some(p) => self.vcs.read_file(parent, p)?.map(Side::new),
            None => None,
        }
        .unwrap_or_else(Side::empty);
        let new = match &file.new_path {
            Some(p) => self.vcs.read_file(fix, p)?.map(Side::new),
            None => None,
        }
        .unwrap_or_else(Side::empty);

        let path = file.path().to_string();
        let structured = has_code_extension(Path::new(&path));
        let mut drafts: Vec<UnitDraft> = Vec::new();

        for hunk in &file.hunks {
            for run in change_runs(hunk) {
                let mut keys: Vec<(String, SymbolKind)> = Vec::new();
                let mut guards = Vec::new();
                for line in &hunk.lines[run.clone()] {
                    let (key, line_guards) = match (line.kind, line.old_line, line.new_line) {
                        (LineKind::Removed, Some(l), _) if structured => {
                            (old.symbol_at(l), old.guards_at(l))
                        }
                        (LineKind::Added, _, Some(l)) if structured => {
                            (new.symbol_at(l), new.guards_at(l))
                        }
                        _ => (None, Vec::new()),
                    };
                    if let Some(key) = key {
                        if !keys.contains(&key) {
                            keys.push(key.clone());
                        }
                        guards.push((key, line_guards));
                    }
                }

                if keys.is_empty() {
                    let significant = hunk.lines[run.clone()].iter().any(|l| {
                        let noise = match (l.kind, l.old_line, l.new_line) {
                            (LineKind::Removed, Some(i), _) if structured => old.is_noise(i),
                            (LineKind::Added, _, Some(i)) if structured => new.is_noise(i),
                            _ => l.text.trim().is_empty(),
                        };
                        !noise
                    });
                    if !significant {
                        continue;
                    }
                    // the scanner is authoritative for C sources
                    let symbol = section_function(&hunk.section)
                        .filter(|_| !structured)
                        .map(|name| EnclosingSymbol::new(name, SymbolKind::Function))
                        .unwrap_or_else(EnclosingSymbol::file_scope);
                    let mut draft = UnitDraft::new(symbol);
                    draft.add_hunk(hunk);
                    draft.texts = Some(file_scope_texts(hunk, run.clone()));
                    let first_old = hunk.lines[run.clone()].iter().find_map(|l| l.old_line);
                    let first_new = hunk.lines[run.clone()].iter().find_map(|l| l.new_line);
                    draft.line_guards.push(match (first_old, first_new) {
                        (Some(l), _) if structured => old.guards_at(l),
                        (_, Some(l)) if structured => new.guards_at(l),
                        _ => Vec::new(),
                    });
                    drafts.push(draft);
                    continue;
                }

                for (key, line_guards) in guards {
                    let pos = drafts
                        .iter()
                        .position(|d| d.texts.is_none() && d.symbol.name == key.0 && d.symbol.kind == key.1);
                    let draft = match pos {
                        Some(i) => &mut drafts[i],
                        None => {
                            drafts.push(UnitDraft::new(EnclosingSymbol::new(key.0.clone(), key.1)));
                            let last = drafts.len() - 1;
                            &mut drafts[last]
                        }
                    };
                    draft.add_hunk(hunk);
                    draft.line_guards.push(line_guards);
                }
            }
        }

        let mut file_guards = Vec::new();
        if structured {
            file_guards.extend(self.kbuild_guards(&path, if file.old_path.is_some() { parent } else { fix })?);
        }
        file_guards.extend(arch_guard(&path));

        let mut units = Vec::new();
        for draft in drafts {
            let (original, modified) = match &draft.texts {
                Some(texts) => texts.clone(),
                None => (
                    old.text_of(&draft.symbol.name, draft.symbol.kind),
                    new.text_of(&draft.symbol.name, draft.symbol.kind),
                ),
            };
            if original == modified {
                continue;
            }
            let anchor = if draft.symbol.is_file_scope() {
                None
            } else {
                new.index
                    .find_kind(&draft.symbol.name, draft.symbol.kind)
                    .and_then(|s| new.index.preceding(s.start))
                    .map(|s| s.name.clone())
            };
            let mut guards = file_guards.clone();
            guards.extend(draft.common_guards());
            units.push(
                ChangeUnit::new(path.clone(), draft.symbol, original, modified)
                    .with_guards(guards)
                    .with_hunks(draft.hunks)
                    .with_anchor(anchor),
            );
        }
        Ok(units)
    }

    /// Guards from Kbuild makefiles, walking up from the file's directory.
    fn kbuild_guards(&self, path: &str, rev: &str) -> Result<Vec<Guard>> {
        let p = Path::new(path);
        let is_source = matches!(
            p.extension().and_then(|e| e.to_str()),
            Some("c") | Some("S")
        );
        if !is_source {
            return Ok(Vec::new());
        }

        let mut guards = Vec::new();
        let mut object = match p.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => format!("{stem}.o"),
            None => return Ok(guards),
        };
        let mut dir = p.parent().map(Path::to_path_buf).unwrap_or_default();

        for _ in 0..MAX_KBUILD_DEPTH {
            let dir_str = dir.to_string_lossy().to_string();
            let makefile = ["Makefile", "Kbuild"]
                .iter()
                .map(|name| {
                    if dir_str.is_empty() {
                        name.to_string()
                    } else {
                        format!("{dir_str}/{name}")
                    }
                })
                .find_map(|candidate| self.vcs.read_file(rev, &candidate).ok().flatten());
            let Some(text) = makefile else {
                break;
            };
            match parse_makefile(&text).guards_for_object(&object) {
                Some(found) => guards.extend(found),
                None => break,
            }
            let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                break;
            };
            object = format!("{name}/");
            dir = dir.parent().map(Path::to_path_buf).unwrap_or_default();
            if dir_str.is_empty() {
                break;
            }
        }
        Ok(guards)
    }
}

/// Index ranges of maximal runs of changed lines inside `hunk`.
fn change_runs(hunk: &Hunk) -> Vec<std::ops::Range<usize>> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, line) in hunk.lines.iter().enumerate() {
        match (line.kind, start) {
            (LineKind::Context, Some(s)) => {
                runs.push(s..i);
                start = None;
            }
            (LineKind::Context, None) => {}
            (_, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push(s..hunk.lines.len());
    }
    runs
}

/// Function named by the context git prints after a hunk's range header.
fn section_function(section: &str) -> Option<String> {
    let head = section.split('(').next()?;
    if head.len() == section.len() {
        return None;
    }
    let name = head.split_whitespace().last()?.trim_start_matches('*');
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| name.to_string())
}

/// Old and new text of a file-scope run, with surrounding hunk context.
fn file_scope_texts(hunk: &Hunk, run: std::ops::Range<usize>) -> (String, String) {
    let before_start = run.start.saturating_sub(FILE_SCOPE_CONTEXT);
    let after_end = (run.end + FILE_SCOPE_CONTEXT).min(hunk.lines.len());
    let window = &hunk.lines[before_start..after_end];
    let context_only = |kind: LineKind| kind == LineKind::Context;

    let mut old = String::new();
    let mut new = String::new();
    for (offset, line) in window.iter().enumerate() {
        let idx = before_start + offset;
        let in_run = run.contains(&idx);
        if !in_run && !context_only(line.kind) {
            continue;
        }
        if line.kind != LineKind::Added {
            old.push_str(&line.text);
            old.push('\n');
        }
        if line.kind != LineKind::Removed {
            new.push_str(&line.text);
            new.push('\n');
        }
    }
    (old, new)
}

/// All condition symbols named by `units`.
pub fn condition_symbols(units: &[ChangeUnit]) -> BTreeSet<String> {
    units.iter().flat_map(|u| u.condition_symbols()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryVcs;

    const BEFORE: &str = "\
#include <linux/net.h>

static int parse_len(int len)
{
\treturn len;
}

#ifdef CONFIG_NET_FOO
static int foo_recv(char *buf, int len)
{
\tint n = parse_len(len);
\tmemcpy(dst, buf, n);
\treturn n;
}
#endif
";

    const AFTER: &str = "\
#include <linux/net.h>
#include <linux/overflow.h>

static int parse_len(int len)
{
\tif (len < 0)
\t\treturn -EINVAL;
\treturn len;
}

#ifdef CONFIG_NET_FOO
static int foo_recv(char *buf, int len)
{
\tint n = parse_len(len);
\tif (n > MAX)
\t\treturn -E2BIG;
\tmemcpy(dst, buf, n);
\treturn n;
}
#endif
";

    fn repo() -> MemoryVcs {
        let mut vcs = MemoryVcs::new();
        vcs.commit(
            "1111111a",
            None,
            "base",
            &[
                ("net/foo/foo.c", BEFORE),
                ("net/foo/Makefile", "obj-$(CONFIG_NET_FOO_CORE) += foo.o\n"),
                ("net/Makefile", "obj-$(CONFIG_NET) += foo/\n"),
                ("Documentation/foo.rst", "old\n"),
            ],
        )
        .commit(
            "2222222b",
            Some("1111111a"),
            "foo: bound copy\n\nFixes: 0000000c (\"foo: add\")\n",
            &[
                ("net/foo/foo.c", AFTER),
                ("net/foo/Makefile", "obj-$(CONFIG_NET_FOO_CORE) += foo.o\n"),
                ("net/Makefile", "obj-$(CONFIG_NET) += foo/\n"),
                ("Documentation/foo.rst", "new\n"),
            ],
        )
        .commit("3333333c", Some("2222222b"), "docs only", &[
            ("net/foo/foo.c", AFTER),
            ("net/foo/Makefile", "obj-$(CONFIG_NET_FOO_CORE) += foo.o\n"),
            ("net/Makefile", "obj-$(CONFIG_NET) += foo/\n"),
            ("Documentation/foo.rst", "newer\n"),
        ]);
        vcs
    }

    #[test]
    fn splits_along_symbols() {
        let vcs = repo();
        let fix = CommitRef::mainline_fix("2222222b").unwrap();
        let ex = DiffExtractor::new(&vcs).extract_fix(&fix).unwrap();

        let names: Vec<String> = ex.units.iter().map(|u| u.symbol().to_string()).collect();
        assert_eq!(
            names,
            vec!["<file scope>", "function parse_len", "function foo_recv"]
        );
        assert_eq!(ex.parent.hash(), "1111111a");
        assert!(ex.message.contains("Fixes: 0000000c"));

        let recv = &ex.units[2];
        assert!(recv.original().contains("memcpy"));
        assert!(!recv.original().contains("E2BIG"));
        assert!(recv.modified().contains("E2BIG"));
        assert_eq!(recv.anchor_after(), Some("parse_len"));
    }

    #[test]
    fn collects_preprocessor_and_kbuild_guards() {
        let vcs = repo();
        let fix = CommitRef::mainline_fix("2222222b").unwrap();
        let ex = DiffExtractor::new(&vcs).extract_fix(&fix).unwrap();

        let recv = ex.units.iter().find(|u| u.symbol().name == "foo_recv").unwrap();
        let guards: Vec<String> = recv.guards().iter().map(|g| g.to_string()).collect();
        assert_eq!(guards, vec!["CONFIG_NET_FOO_CORE", "CONFIG_NET", "CONFIG_NET_FOO"]);

        let parse = ex.units.iter().find(|u| u.symbol().name == "parse_len").unwrap();
        assert!(!parse.condition_symbols().contains("CONFIG_NET_FOO"));
        assert!(parse.condition_symbols().contains("CONFIG_NET"));
    }

    #[test]
    fn file_scope_unit_keeps_context() {
        let vcs = repo();
        let fix = CommitRef::mainline_fix("2222222b").unwrap();
        let ex = DiffExtractor::new(&vcs).extract_fix(&fix).unwrap();
        let inc = &ex.units[0];
        assert!(inc.symbol().is_file_scope());
        assert!(inc.original().contains("#include <linux/net.h>"));
        assert!(inc.modified().contains("#include <linux/overflow.h>"));
    }

    #[test]
    fn documentation_only_fix_is_empty() {
        let vcs = repo();
        let fix = CommitRef::mainline_fix("3333333c").unwrap();
        let err = DiffExtractor::new(&vcs).extract_fix(&fix).unwrap_err();
        assert!(matches!(err, FixportError::EmptyDiff(_)));
    }

    #[test]
    fn unknown_commit_is_not_found() {
        let vcs = repo();
        let fix = CommitRef::mainline_fix("deadbeef").unwrap();
        let err = DiffExtractor::new(&vcs).extract_fix(&fix).unwrap_err();
        assert!(matches!(err, FixportError::CommitNotFound(_)));
    }

    #[test]
    fn section_context_names_function() {
        assert_eq!(
            section_function("static int *foo_get(struct foo *f)").as_deref(),
            Some("foo_get")
        );
        assert_eq!(section_function("struct foo {"), None);
        assert_eq!(section_function(""), None);
    }

    #[test]
    fn change_runs_split_on_context() {
        let files = parse_unified(
            "--- a/x.c\n+++ b/x.c\n@@ -1,4 +1,4 @@\n a\n-b\n+B\n c\n-d\n+D\n",
        );
        let runs = change_runs(&files[0].hunks[0]);
        assert_eq!(runs, vec![1..3, 4..6]);
    }
}
