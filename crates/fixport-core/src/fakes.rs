//! In-memory fakes for unit and integration testing.
//!
//! [`MemoryVcs`] holds whole-tree snapshots per commit and renders diffs on
//! demand, so extractor and judge tests run without spawning git.
//! [`MemoryTree`] is the matching stand-in for a target checkout.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use regex::Regex;

use crate::domain::error::{FixportError, Result};
use crate::source_tree::SourceTree;
use crate::textdiff;
use crate::vcs::Vcs;

#[derive(Debug, Clone)]
struct MemCommit {
    parent: Option<String>,
    message: String,
    files: BTreeMap<String, String>,
}

/// [`Vcs`] over a map of commit snapshots.
#[derive(Debug, Clone, Default)]
pub struct MemoryVcs {
    commits: HashMap<String, MemCommit>,
    head: Option<String>,
}

impl MemoryVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commit whose tree is `files` and make it HEAD.
    pub fn commit(
        &mut self,
        hash: &str,
        parent: Option<&str>,
        message: &str,
        files: &[(&str, &str)],
    ) -> &mut Self {
        self.commits.insert(
            hash.to_string(),
            MemCommit {
                parent: parent.map(str::to_string),
                message: message.to_string(),
                files: files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect(),
            },
        );
        self.head = Some(hash.to_string());
        self
    }

    fn resolve(&self, rev: &str) -> Option<&str> {
        if rev == "HEAD" {
            return self.head.as_deref();
        }
        let mut hits = self.commits.keys().filter(|k| k.starts_with(rev));
        match (hits.next(), hits.next()) {
            (Some(k), None) => Some(k.as_str()),
            _ => None,
        }
    }

    fn get(&self, rev: &str) -> Result<(&str, &MemCommit)> {
        self.resolve(rev)
            .and_then(|k| self.commits.get_key_value(k))
            .map(|(k, c)| (k.as_str(), c))
            .ok_or_else(|| FixportError::CommitNotFound(rev.to_string()))
    }
}

impl Vcs for MemoryVcs {
    fn commit_exists(&self, rev: &str) -> bool {
        self.resolve(rev).is_some()
    }

    fn rev_parse(&self, rev: &str) -> Result<String> {
        self.get(rev).map(|(k, _)| k.to_string())
    }

    fn parent_of(&self, rev: &str) -> Result<String> {
        let (_, commit) = self.get(rev)?;
        commit
            .parent
            .clone()
            .ok_or_else(|| FixportError::CommitNotFound(format!("{rev}^")))
    }

    fn message(&self, rev: &str) -> Result<String> {
        self.get(rev).map(|(_, c)| c.message.clone())
    }

    fn diff(&self, from: &str, to: &str) -> Result<String> {
        let (_, old) = self.get(from)?;
        let (_, new) = self.get(to)?;
        let paths: BTreeSet<&String> = old.files.keys().chain(new.files.keys()).collect();

        let mut out = String::new();
        for path in paths {
            let a = old.files.get(path.as_str());
            let b = new.files.get(path.as_str());
            if a == b {
                continue;
            }
            let a_lines: Vec<&str> = a.map(|s| s.lines().collect()).unwrap_or_default();
            let b_lines: Vec<&str> = b.map(|s| s.lines().collect()).unwrap_or_default();
            out.push_str(&format!("diff --git a/{path} b/{path}\n"));
            match a {
                Some(_) => out.push_str(&format!("--- a/{path}\n")),
                None => out.push_str("--- /dev/null\n"),
            }
            match b {
                Some(_) => out.push_str(&format!("+++ b/{path}\n")),
                None => out.push_str("+++ /dev/null\n"),
            }
            out.push_str(&textdiff::render_hunks(&a_lines, &b_lines, 0, 0, 3, ""));
        }
        Ok(out)
    }

    fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        let (_, commit) = self.get(rev)?;
        Ok(commit.files.get(path).cloned())
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let (target, _) = self.get(ancestor)?;
        let mut cursor = Some(self.get(descendant)?.0.to_string());
        while let Some(hash) = cursor {
            if hash == target {
                return Ok(true);
            }
            cursor = self.commits.get(&hash).and_then(|c| c.parent.clone());
        }
        Ok(false)
    }
}

/// [`SourceTree`] over an in-memory map of paths to contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    files: BTreeMap<String, String>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }
}

impl SourceTree for MemoryTree {
    fn read(&self, path: &str) -> Result<Option<String>> {
        Ok(self.files.get(path).cloned())
    }

    fn files_mentioning(&self, word: &str) -> Result<Vec<String>> {
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(word)))
            .map_err(|e| FixportError::GitError(e.to_string()))?;
        Ok(self
            .files
            .iter()
            .filter(|(_, content)| pattern.is_match(content))
            .map(|(path, _)| path.clone())
            .collect())
    }
}
