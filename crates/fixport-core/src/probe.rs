//! Probes of the target tree: does each change unit's code path exist there,
//! and is the fix's lineage consistent with the target's history?

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::change_unit::{ChangeUnit, EnclosingSymbol};
use crate::domain::commit::CommitRef;
use crate::domain::error::Result;
use crate::extract::symbols::{SymbolIndex, SymbolSpan};
use crate::oracle::{OracleAnswer, SymbolOracle, MATCH_THRESHOLD, NO_MATCH_THRESHOLD};
use crate::source_tree::{has_code_extension, SourceTree};
use crate::textdiff::{char_similarity, line_similarity, normalize_ws};
use crate::vcs::Vcs;

const NAME_WEIGHT: f64 = 0.4;
const BODY_WEIGHT: f64 = 0.6;

/// Where a unit's code lives in the target tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetSite {
    /// Path relative to the target root.
    pub file: String,
    pub symbol: EnclosingSymbol,
    /// Exact target text of the symbol (or region, for file-scope units).
    pub text: String,
    /// Line similarity to the unit's pre-fix body.
    pub similarity: f64,
}

/// Result of locating one change unit in the target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CodePath {
    Present(TargetSite),
    /// The unit introduces a symbol the target does not have yet.
    Added,
    /// A plausible candidate exists but could not be confirmed.
    Unconfirmed { candidate: TargetSite },
    Absent,
}

impl CodePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePath::Present(_) => "present",
            CodePath::Added => "added",
            CodePath::Unconfirmed { .. } => "unconfirmed",
            CodePath::Absent => "absent",
        }
    }

    pub fn site(&self) -> Option<&TargetSite> {
        match self {
            CodePath::Present(site) => Some(site),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, CodePath::Absent)
    }

    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, CodePath::Unconfirmed { .. })
    }
}

/// Whether the target text at `path` already carries the unit's fixed body.
pub fn already_fixed(unit: &ChangeUnit, path: &CodePath) -> bool {
    match path.site() {
        Some(site) => same_lines(&site.text, unit.modified()),
        None => false,
    }
}

fn significant_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(normalize_ws)
        .filter(|l| !l.is_empty())
        .collect()
}

fn same_lines(a: &str, b: &str) -> bool {
    significant_lines(a) == significant_lines(b)
}

/// Region of `content` aligned with `window`, as (exact text, similarity).
///
/// The window is slid over the file line by line; the offset matching the
/// most non-blank lines wins, and at least half of them must match.
pub fn locate_region(content: &str, window: &str) -> Option<(String, f64)> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let want: Vec<String> = window.lines().map(normalize_ws).collect();
    let significant = want.iter().filter(|l| !l.is_empty()).count();
    if significant == 0 || want.len() > lines.len() {
        return None;
    }
    let have: Vec<String> = lines.iter().map(|l| normalize_ws(l)).collect();

    let mut best: Option<(usize, usize)> = None;
    for offset in 0..=(have.len() - want.len()) {
        let hits = want
            .iter()
            .enumerate()
            .filter(|(i, w)| !w.is_empty() && have[offset + i] == **w)
            .count();
        if best.map_or(true, |(_, b)| hits > b) {
            best = Some((offset, hits));
        }
    }
    let (offset, hits) = best?;
    if hits * 2 < significant {
        return None;
    }
    let text: String = lines[offset..offset + want.len()].concat();
    Some((text, hits as f64 / significant as f64))
}

/// Locates change units in the target, consulting an oracle for ambiguous
/// candidates.
pub struct CodePathProbe<'a> {
    tree: &'a dyn SourceTree,
    oracle: &'a dyn SymbolOracle,
}

impl<'a> CodePathProbe<'a> {
    pub fn new(tree: &'a dyn SourceTree, oracle: &'a dyn SymbolOracle) -> Self {
        Self { tree, oracle }
    }

    pub async fn probe_all(&self, units: &[ChangeUnit]) -> Result<Vec<CodePath>> {
        let mut paths = Vec::with_capacity(units.len());
        for unit in units {
            paths.push(self.probe(unit).await?);
        }
        Ok(paths)
    }

    pub async fn probe(&self, unit: &ChangeUnit) -> Result<CodePath> {
        let path = if unit.symbol().is_file_scope() || !has_code_extension(Path::new(unit.file())) {
            self.probe_region(unit)?
        } else if unit.is_addition() {
            match self.find_exact(unit)? {
                Some(site) => CodePath::Present(site),
                None => CodePath::Added,
            }
        } else {
            match self.find_exact(unit)? {
                Some(site) => CodePath::Present(site),
                None => self.find_similar(unit).await?,
            }
        };
        debug!(
            unit = %unit.symbol(),
            file = unit.file(),
            path = path.as_str(),
            "code path probed"
        );
        Ok(path)
    }

    fn probe_region(&self, unit: &ChangeUnit) -> Result<CodePath> {
        let Some(content) = self.tree.read(unit.file())? else {
            return Ok(CodePath::Absent);
        };
        let site = |(text, similarity): (String, f64)| TargetSite {
            file: unit.file().to_string(),
            symbol: unit.symbol().clone(),
            text,
            similarity,
        };
        // the fixed window is already there verbatim
        if let Some(found) = locate_region(&content, unit.modified()) {
            if found.1 >= 1.0 && !same_lines(unit.original(), unit.modified()) {
                let exact_original = locate_region(&content, unit.original())
                    .is_some_and(|(_, s)| s >= 1.0);
                if !exact_original {
                    return Ok(CodePath::Present(site(found)));
                }
            }
        }
        Ok(match locate_region(&content, unit.original()) {
            Some(found) => CodePath::Present(site(found)),
            None => CodePath::Absent,
        })
    }

    fn site_in(
        file: &str,
        content: &str,
        index: &SymbolIndex,
        span: &SymbolSpan,
        unit: &ChangeUnit,
    ) -> TargetSite {
        let text = index.text(content, span).to_string();
        let reference = if unit.is_addition() {
            unit.modified()
        } else {
            unit.original()
        };
        TargetSite {
            file: file.to_string(),
            symbol: span.as_symbol(),
            similarity: line_similarity(&text, reference),
            text,
        }
    }

    /// Same name and kind: same path first, then anywhere in the tree.
    fn find_exact(&self, unit: &ChangeUnit) -> Result<Option<TargetSite>> {
        let name = &unit.symbol().name;
        let kind = unit.symbol().kind;

        if let Some(content) = self.tree.read(unit.file())? {
            let index = SymbolIndex::parse(&content);
            if let Some(span) = index.find_kind(name, kind) {
                return Ok(Some(Self::site_in(unit.file(), &content, &index, span, unit)));
            }
        }

        for file in self.tree.files_mentioning(name)? {
            if file == unit.file() {
                continue;
            }
            let Some(content) = self.tree.read(&file)? else {
                continue;
            };
            let index = SymbolIndex::parse(&content);
            if let Some(span) = index.find_kind(name, kind) {
                debug!(symbol = %name, from = unit.file(), to = %file, "symbol moved");
                return Ok(Some(Self::site_in(&file, &content, &index, span, unit)));
            }
        }
        Ok(None)
    }

    /// Same-kind candidates in the same file, ranked by name and body
    /// similarity.
    async fn find_similar(&self, unit: &ChangeUnit) -> Result<CodePath> {
        let Some(content) = self.tree.read(unit.file())? else {
            return Ok(CodePath::Absent);
        };
        let index = SymbolIndex::parse(&content);
        let kind = unit.symbol().kind;

        let mut best: Option<(f64, &SymbolSpan)> = None;
        for span in index.of_kind(kind) {
            let body = index.text(&content, span);
            let score = NAME_WEIGHT * char_similarity(&span.name, &unit.symbol().name)
                + BODY_WEIGHT * line_similarity(body, unit.original());
            if best.map_or(true, |(b, _)| score > b) {
                best = Some((score, span));
            }
        }
        let Some((score, span)) = best else {
            return Ok(CodePath::Absent);
        };
        let site = Self::site_in(unit.file(), &content, &index, span, unit);

        if score >= MATCH_THRESHOLD {
            debug!(from = %unit.symbol().name, to = %span.name, score, "symbol renamed");
            return Ok(CodePath::Present(site));
        }
        if score < NO_MATCH_THRESHOLD {
            return Ok(CodePath::Absent);
        }

        let answer = self.oracle.classify(&site.text, unit.original()).await;
        debug!(
            oracle = self.oracle.name(),
            candidate = %span.name,
            score,
            answer = answer.as_str(),
            "ambiguous candidate"
        );
        Ok(match answer {
            OracleAnswer::Match => CodePath::Present(site),
            OracleAnswer::NoMatch => CodePath::Absent,
            OracleAnswer::Unknown => CodePath::Unconfirmed { candidate: site },
        })
    }
}

// ── Ancestry ────────────────────────────────────────────────────────────

fn trailer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:fixes|fix|commit):\s*([0-9a-f]{7,40})\b").expect("valid regex")
    })
}

/// Commits named by `Fixes:` / `Fix:` / `Commit:` trailers, in order.
pub fn fixes_trailers(message: &str) -> Vec<String> {
    let mut hashes: Vec<String> = Vec::new();
    for caps in trailer_re().captures_iter(message) {
        let hash = caps[1].to_ascii_lowercase();
        if !hashes.contains(&hash) {
            hashes.push(hash);
        }
    }
    hashes
}

/// Presence of a commit in the target repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitPresence {
    pub hash: String,
    /// `None` when the target is not a repository.
    pub present: Option<bool>,
    /// Reachability from the target revision; `None` when not checked.
    pub reachable: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AncestryReport {
    /// Whether the fix itself is already part of the target revision.
    pub fix_in_target: Option<bool>,
    /// Commits the fix says it fixes.
    pub introducing: Vec<CommitPresence>,
}

impl AncestryReport {
    pub fn fix_already_merged(&self) -> bool {
        self.fix_in_target == Some(true)
    }

    /// First introducing commit known to be missing from the target.
    pub fn missing_introducer(&self) -> Option<&str> {
        self.introducing
            .iter()
            .find(|c| c.present == Some(false))
            .map(|c| c.hash.as_str())
    }
}

/// Checks the fix's lineage against the target repository.
pub struct AncestryProbe<'a> {
    target: Option<&'a dyn Vcs>,
    target_rev: String,
}

impl<'a> AncestryProbe<'a> {
    /// `target` is `None` when the target tree is not a repository;
    /// `target_rev` defaults to `HEAD`.
    pub fn new(target: Option<&'a dyn Vcs>, target_rev: Option<&str>) -> Self {
        Self {
            target,
            target_rev: target_rev.unwrap_or("HEAD").to_string(),
        }
    }

    fn presence(&self, vcs: &dyn Vcs, hash: &str) -> CommitPresence {
        let present = vcs.commit_exists(hash);
        let reachable = if present {
            match vcs.is_ancestor(hash, &self.target_rev) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(hash, error = %e, "ancestry check failed");
                    None
                }
            }
        } else {
            Some(false)
        };
        CommitPresence {
            hash: hash.to_string(),
            present: Some(present),
            reachable,
        }
    }

    pub fn probe(&self, fix: &CommitRef, message: &str) -> AncestryReport {
        let trailers = fixes_trailers(message);
        let Some(vcs) = self.target else {
            return AncestryReport {
                fix_in_target: None,
                introducing: trailers
                    .into_iter()
                    .map(|hash| CommitPresence {
                        hash,
                        present: None,
                        reachable: None,
                    })
                    .collect(),
            };
        };

        let fix_presence = self.presence(vcs, fix.hash());
        let report = AncestryReport {
            fix_in_target: fix_presence.reachable,
            introducing: trailers.iter().map(|h| self.presence(vcs, h)).collect(),
        };
        debug!(
            fix = %fix.short(),
            fix_in_target = ?report.fix_in_target,
            introducing = report.introducing.len(),
            "ancestry probed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::change_unit::SymbolKind;
    use crate::fakes::{MemoryTree, MemoryVcs};
    use crate::oracle::{FixedOracle, SimilarityOracle};

    const MAINLINE: &str = "\
static int foo_recv(char *buf, int len)
{
\tint n = parse_len(len);
\tmemcpy(dst, buf, n);
\treturn n;
}
";

    fn unit(original: &str, modified: &str) -> ChangeUnit {
        ChangeUnit::new(
            "net/foo.c",
            EnclosingSymbol::new("foo_recv", SymbolKind::Function),
            original,
            modified,
        )
    }

    fn fixed_unit() -> ChangeUnit {
        unit(
            MAINLINE,
            &MAINLINE.replace("\tmemcpy", "\tif (n > MAX)\n\t\treturn -E2BIG;\n\tmemcpy"),
        )
    }

    // ── Code path ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn finds_symbol_at_same_path() {
        let tree = MemoryTree::new().with_file("net/foo.c", &format!("#include <x.h>\n\n{MAINLINE}"));
        let oracle = SimilarityOracle::default();
        let path = CodePathProbe::new(&tree, &oracle).probe(&fixed_unit()).await.unwrap();
        let site = path.site().unwrap();
        assert_eq!(site.file, "net/foo.c");
        assert_eq!(site.text, MAINLINE);
        assert!((site.similarity - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn finds_symbol_moved_to_another_file() {
        let tree = MemoryTree::new()
            .with_file("net/foo.c", "int unrelated;\n")
            .with_file("net/foo/core.c", MAINLINE);
        let oracle = SimilarityOracle::default();
        let path = CodePathProbe::new(&tree, &oracle).probe(&fixed_unit()).await.unwrap();
        assert_eq!(path.site().unwrap().file, "net/foo/core.c");
    }

    #[tokio::test]
    async fn renamed_symbol_matches_by_similarity() {
        let drifted = MAINLINE.replace("foo_recv", "foo_receive");
        let tree = MemoryTree::new().with_file("net/foo.c", &drifted);
        let oracle = FixedOracle::new(OracleAnswer::NoMatch);
        let path = CodePathProbe::new(&tree, &oracle).probe(&fixed_unit()).await.unwrap();
        assert_eq!(path.site().unwrap().symbol.name, "foo_receive");
    }

    #[tokio::test]
    async fn ambiguous_candidate_defers_to_oracle() {
        let drifted = "\
static int bar_poll(char *buf, int len)
{
\tint n = parse_len(len);
\tkick(n);
\tqueue(n);
\tflush(n);
\treturn n;
}
";
        let tree = MemoryTree::new().with_file("net/foo.c", drifted);

        let unknown = FixedOracle::new(OracleAnswer::Unknown);
        let path = CodePathProbe::new(&tree, &unknown).probe(&fixed_unit()).await.unwrap();
        assert!(path.is_unconfirmed());

        let yes = FixedOracle::new(OracleAnswer::Match);
        let path = CodePathProbe::new(&tree, &yes).probe(&fixed_unit()).await.unwrap();
        assert_eq!(path.site().unwrap().symbol.name, "bar_poll");
    }

    #[tokio::test]
    async fn unrelated_file_is_absent() {
        let tree = MemoryTree::new().with_file("net/foo.c", "struct other { int a; };\n");
        let oracle = SimilarityOracle::default();
        let path = CodePathProbe::new(&tree, &oracle).probe(&fixed_unit()).await.unwrap();
        assert!(path.is_absent());

        let empty = MemoryTree::new();
        let path = CodePathProbe::new(&empty, &oracle).probe(&fixed_unit()).await.unwrap();
        assert!(path.is_absent());
    }

    #[tokio::test]
    async fn new_symbol_is_added() {
        let tree = MemoryTree::new().with_file("net/foo.c", MAINLINE);
        let oracle = SimilarityOracle::default();
        let added = ChangeUnit::new(
            "net/foo.c",
            EnclosingSymbol::new("foo_check", SymbolKind::Function),
            "",
            "static int foo_check(int n)\n{\n\treturn n > MAX;\n}\n",
        );
        let path = CodePathProbe::new(&tree, &oracle).probe(&added).await.unwrap();
        assert_eq!(path, CodePath::Added);
    }

    #[tokio::test]
    async fn detects_already_fixed_target() {
        let unit = fixed_unit();
        let tree = MemoryTree::new().with_file("net/foo.c", unit.modified());
        let oracle = SimilarityOracle::default();
        let path = CodePathProbe::new(&tree, &oracle).probe(&unit).await.unwrap();
        assert!(already_fixed(&unit, &path));
    }

    #[tokio::test]
    async fn file_scope_region_is_located() {
        let unit = ChangeUnit::new(
            "net/foo.c",
            EnclosingSymbol::file_scope(),
            "#include <a.h>\n#include <b.h>\n",
            "#include <a.h>\n#include <b.h>\n#include <c.h>\n",
        );
        let tree = MemoryTree::new().with_file("net/foo.c", "/* hdr */\n#include <a.h>\n#include <b.h>\n\nint x;\n");
        let oracle = SimilarityOracle::default();
        let path = CodePathProbe::new(&tree, &oracle).probe(&unit).await.unwrap();
        assert_eq!(path.site().unwrap().text, "#include <a.h>\n#include <b.h>\n");
        assert!(!already_fixed(&unit, &path));
    }

    #[test]
    fn locate_region_requires_half_the_lines() {
        assert!(locate_region("a\nb\nc\n", "x\ny\nc\n").is_none());
        let (text, score) = locate_region("a\nb\nc\nd\n", "b\nX\nd\n").unwrap();
        assert_eq!(text, "b\nc\nd\n");
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    // ── Ancestry ────────────────────────────────────────────────────────

    #[test]
    fn trailers_are_case_insensitive_and_deduplicated() {
        let msg = "net: fix\n\nFixes: 1234567abc (\"net: add\")\nfix: 89abcde\ncommit: 1234567ABC\nCc: stable\n";
        assert_eq!(fixes_trailers(msg), vec!["1234567abc", "89abcde"]);
        assert!(fixes_trailers("no trailers, see commit 1234567 inline").is_empty());
    }

    fn target_repo() -> MemoryVcs {
        let mut vcs = MemoryVcs::new();
        vcs.commit("aaaaaaa1", None, "base", &[])
            .commit("bbbbbbb2", Some("aaaaaaa1"), "intro", &[])
            .commit("ccccccc3", Some("bbbbbbb2"), "release", &[]);
        vcs
    }

    #[test]
    fn missing_introducer_is_reported() {
        let vcs = target_repo();
        let probe = AncestryProbe::new(Some(&vcs as &dyn Vcs), None);
        let fix = CommitRef::mainline_fix("ddddddd4").unwrap();
        let report = probe.probe(&fix, "x\n\nFixes: eeeeeee5\nFixes: bbbbbbb2\n");
        assert_eq!(report.fix_in_target, Some(false));
        assert_eq!(report.missing_introducer(), Some("eeeeeee5"));
        assert_eq!(report.introducing[1].reachable, Some(true));
    }

    #[test]
    fn merged_fix_is_detected() {
        let vcs = target_repo();
        let probe = AncestryProbe::new(Some(&vcs as &dyn Vcs), Some("ccccccc3"));
        let fix = CommitRef::mainline_fix("bbbbbbb2").unwrap();
        assert!(probe.probe(&fix, "fix").fix_already_merged());
    }

    #[test]
    fn no_repository_means_unknown() {
        let probe = AncestryProbe::new(None, None);
        let fix = CommitRef::mainline_fix("bbbbbbb2").unwrap();
        let report = probe.probe(&fix, "Fixes: aaaaaaa1");
        assert_eq!(report.fix_in_target, None);
        assert_eq!(report.missing_introducer(), None);
        assert_eq!(report.introducing[0].present, None);
    }
}
