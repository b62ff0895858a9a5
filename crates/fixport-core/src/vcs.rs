//! Version-control access for the mainline and target repositories.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::domain::error::{FixportError, Result};

/// Bound on a single git invocation.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on materialising a whole revision into a worktree.
pub const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(600);

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// The repository operations the pipeline needs.
pub trait Vcs: Send + Sync {
    /// Whether `rev` names a commit object in this repository.
    fn commit_exists(&self, rev: &str) -> bool;

    /// Full hash of `rev`.
    fn rev_parse(&self, rev: &str) -> Result<String>;

    /// Full hash of the first parent of `rev`.
    fn parent_of(&self, rev: &str) -> Result<String>;

    /// Commit message of `rev`.
    fn message(&self, rev: &str) -> Result<String>;

    /// Unified diff between two revisions.
    fn diff(&self, from: &str, to: &str) -> Result<String>;

    /// Content of `path` at `rev`, `None` when the path does not exist there.
    fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>>;

    /// Whether `ancestor` is reachable from `descendant`.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;
}

/// [`Vcs`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            timeout: GIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open `dir` only if it is inside a git work tree.
    pub fn open(dir: &Path) -> Option<Self> {
        is_git_repo(dir).then(|| Self::new(dir))
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        run_git(&self.repo, args, self.timeout)
    }

    fn stdout(&self, args: &[&str]) -> Result<String> {
        checked_stdout(self.run(args)?, args)
    }

    /// Path of the repository directory relative to its work-tree root.
    pub fn show_prefix(&self) -> Result<String> {
        Ok(self.stdout(&["rev-parse", "--show-prefix"])?.trim().to_string())
    }

    /// Check `rev` out into a new detached worktree at `path`, which must
    /// not exist yet.
    pub fn add_worktree(&self, rev: &str, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        let args = ["worktree", "add", "--detach", &*path, rev];
        checked_stdout(run_git(&self.repo, &args, CHECKOUT_TIMEOUT)?, &args).map(|_| ())
    }

    pub fn remove_worktree(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        self.stdout(&["worktree", "remove", "--force", &*path]).map(|_| ())
    }

    /// Paths of every worktree attached to this repository, main one first.
    pub fn worktrees(&self) -> Result<Vec<PathBuf>> {
        let list = self.stdout(&["worktree", "list", "--porcelain"])?;
        Ok(list
            .lines()
            .filter_map(|l| l.strip_prefix("worktree "))
            .map(PathBuf::from)
            .collect())
    }
}

fn checked_stdout(output: Output, args: &[&str]) -> Result<String> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FixportError::GitError(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run git in `dir`, killing it once `timeout` has passed.
///
/// A timeout is reported as [`FixportError::ExecutionTimeout`].
pub(crate) fn run_git(dir: &Path, args: &[&str], timeout: Duration) -> Result<Output> {
    let mut child = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| FixportError::GitError(format!("failed to run git: {e}")))?;

    // both pipes are drained concurrently so a large diff cannot stall git
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(?args, dir = %dir.display(), "git timed out");
                return Err(FixportError::ExecutionTimeout {
                    stage: format!("git {}", args.first().copied().unwrap_or_default()),
                    secs: timeout.as_secs(),
                });
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(FixportError::GitError(format!("failed to wait for git: {e}"))),
        }
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

impl Vcs for GitCli {
    fn commit_exists(&self, rev: &str) -> bool {
        let spec = format!("{rev}^{{commit}}");
        self.run(&["cat-file", "-e", &spec])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn rev_parse(&self, rev: &str) -> Result<String> {
        if !self.commit_exists(rev) {
            return Err(FixportError::CommitNotFound(rev.to_string()));
        }
        let spec = format!("{rev}^{{commit}}");
        let sha = self.stdout(&["rev-parse", "--verify", &spec])?;
        Ok(sha.trim().to_string())
    }

    fn parent_of(&self, rev: &str) -> Result<String> {
        let parent = format!("{rev}^");
        if !self.commit_exists(&parent) {
            return Err(FixportError::CommitNotFound(parent));
        }
        self.rev_parse(&parent)
    }

    fn message(&self, rev: &str) -> Result<String> {
        if !self.commit_exists(rev) {
            return Err(FixportError::CommitNotFound(rev.to_string()));
        }
        self.stdout(&["log", "-1", "--pretty=%B", rev])
    }

    fn diff(&self, from: &str, to: &str) -> Result<String> {
        for rev in [from, to] {
            if !self.commit_exists(rev) {
                return Err(FixportError::CommitNotFound(rev.to_string()));
            }
        }
        self.stdout(&["diff", "--no-color", "--no-ext-diff", "--no-renames", from, to])
    }

    fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        let spec = format!("{rev}:{path}");
        let output = self.run(&["show", &spec])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self.run(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(FixportError::GitError(format!(
                "git merge-base failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    run_git(dir, &["rev-parse", "--is-inside-work-tree"], GIT_TIMEOUT)
        .map(|o| o.status.success())
        .unwrap_or(false)
}
