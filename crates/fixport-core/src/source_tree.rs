//! Read access to the target source tree.

use regex::Regex;
use std::path::{Path, PathBuf};

use crate::domain::error::Result;
use crate::vcs::{is_git_repo, run_git, GIT_TIMEOUT};

/// Extensions scanned when searching the tree for symbol definitions.
pub const CODE_EXTENSIONS: &[&str] = &["c", "h", "S", "cc", "cpp", "hpp"];

/// The operations the probes and synthesizer need from the target tree.
pub trait SourceTree: Send + Sync {
    /// Content of `path` (relative to the root), `None` when absent.
    fn read(&self, path: &str) -> Result<Option<String>>;

    /// Relative paths of code files that mention `word` as a whole word.
    fn files_mentioning(&self, word: &str) -> Result<Vec<String>>;
}

/// [`SourceTree`] over a directory on disk.
#[derive(Debug, Clone)]
pub struct FsSourceTree {
    root: PathBuf,
    git: bool,
}

impl FsSourceTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let git = is_git_repo(&root);
        Self { root, git }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn git_grep(&self, word: &str) -> Option<Vec<String>> {
        let mut args = vec!["grep", "-l", "-w", "-F", "-e", word, "--"];
        let globs: Vec<String> = CODE_EXTENSIONS.iter().map(|e| format!("*.{e}")).collect();
        args.extend(globs.iter().map(String::as_str));
        let output = match run_git(&self.root, &args, GIT_TIMEOUT) {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(error = %e, "git grep unavailable, walking the tree");
                return None;
            }
        };
        // exit 1 means no match
        match output.status.code() {
            Some(0) => Some(
                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .map(str::to_string)
                    .collect(),
            ),
            Some(1) => Some(Vec::new()),
            _ => None,
        }
    }
}

impl SourceTree for FsSourceTree {
    fn read(&self, path: &str) -> Result<Option<String>> {
        let full = self.root.join(path);
        match std::fs::read(&full) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn files_mentioning(&self, word: &str) -> Result<Vec<String>> {
        if self.git {
            if let Some(files) = self.git_grep(word) {
                return Ok(files);
            }
        }

        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(word)))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let mut hits = Vec::new();
        for path in walk_files(&self.root, &has_code_extension)? {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            if pattern.is_match(&String::from_utf8_lossy(&bytes)) {
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    hits.push(rel.to_string_lossy().into_owned());
                }
            }
        }
        hits.sort();
        Ok(hits)
    }
}

pub fn has_code_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| CODE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Recursively collect files under `root` accepted by `filter`, skipping
/// VCS metadata directories.
pub fn walk_files(root: &Path, filter: &dyn Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if dir != root => {
                tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if entry.file_name() != ".git" {
                    stack.push(path);
                }
            } else if file_type.is_file() && filter(&path) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}
