//! Where prejudge reads and validation builds happen.

use std::path::{Path, PathBuf};

use fixport_core::{GitCli, Vcs};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::HarnessError;

/// Untracked files of the target tree that the release checkout needs too.
const CARRIED_FILES: &[&str] = &[".config"];

/// A directory the harness may build and patch.
///
/// `InPlace` works on the target tree itself and relies on the harness
/// reverting the patch; `Copied` works on a scratch copy removed on drop.
#[derive(Debug)]
pub enum WorkingCopy {
    InPlace(PathBuf),
    Copied { _scratch: TempDir, path: PathBuf },
}

impl WorkingCopy {
    pub fn prepare(target: &Path, isolate: bool) -> Result<Self, HarnessError> {
        if !target.is_dir() {
            return Err(HarnessError::WorkingCopy(format!(
                "{} is not a directory",
                target.display()
            )));
        }
        if !isolate {
            return Ok(WorkingCopy::InPlace(target.to_path_buf()));
        }

        let scratch = tempfile::Builder::new().prefix("fixport-wc-").tempdir()?;
        let name = target.file_name().unwrap_or_else(|| "target".as_ref());
        let path = scratch.path().join(name);
        copy_tree(target, &path)?;
        debug!(from = %target.display(), to = %path.display(), "working copy created");
        Ok(WorkingCopy::Copied {
            _scratch: scratch,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            WorkingCopy::InPlace(path) => path,
            WorkingCopy::Copied { path, .. } => path,
        }
    }

    pub fn is_isolated(&self) -> bool {
        matches!(self, WorkingCopy::Copied { .. })
    }
}

/// The target release checked out into a scratch worktree of the target
/// repository. The worktree is detached from the repository on drop; the
/// target's own working tree and HEAD are never touched.
#[derive(Debug)]
pub struct ReleaseCheckout {
    git: GitCli,
    rev: String,
    root: PathBuf,
    path: PathBuf,
    _scratch: TempDir,
}

impl ReleaseCheckout {
    /// Check out `release` of the repository holding `target`.
    pub fn create(target: &Path, release: &str) -> fixport_core::Result<Self> {
        let git = GitCli::new(target);
        let rev = git.rev_parse(release)?;
        let prefix = git.show_prefix()?;

        let scratch = tempfile::Builder::new().prefix("fixport-release-").tempdir()?;
        let root = scratch.path().join("checkout");
        git.add_worktree(&rev, &root)?;
        // `target` may sit below the repository root
        let path = match prefix.trim_end_matches('/') {
            "" => root.clone(),
            sub => root.join(sub),
        };

        for name in CARRIED_FILES {
            let from = target.join(name);
            let to = path.join(name);
            if from.is_file() && !to.exists() {
                std::fs::copy(&from, &to)?;
            }
        }
        info!(release, rev = %rev, path = %path.display(), "target release checked out");
        Ok(Self {
            git,
            rev,
            root,
            path,
            _scratch: scratch,
        })
    }

    /// Directory corresponding to `target` at the release.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full hash of the checked-out release.
    pub fn rev(&self) -> &str {
        &self.rev
    }
}

impl Drop for ReleaseCheckout {
    fn drop(&mut self) {
        if let Err(e) = self.git.remove_worktree(&self.root) {
            warn!(path = %self.root.display(), error = %e, "release worktree not removed");
        }
    }
}

/// Recursive copy preserving symlinks; `.git` is left behind.
fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let src = entry.path();
        let dst = to.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&src, &dst)?;
        } else if file_type.is_symlink() {
            copy_link(&src, &dst)?;
        } else {
            std::fs::copy(&src, &dst)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_link(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_place_uses_target() {
        let target = tempfile::tempdir().unwrap();
        let wc = WorkingCopy::prepare(target.path(), false).unwrap();
        assert_eq!(wc.path(), target.path());
        assert!(!wc.is_isolated());
    }

    #[test]
    fn copy_is_isolated_and_removed() {
        let target = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(target.path().join("src/.git")).unwrap();
        std::fs::create_dir_all(target.path().join(".git")).unwrap();
        std::fs::write(target.path().join("src/a.c"), "int a;\n").unwrap();

        let wc = WorkingCopy::prepare(target.path(), true).unwrap();
        let copied = wc.path().to_path_buf();
        assert!(wc.is_isolated());
        assert_eq!(std::fs::read_to_string(copied.join("src/a.c")).unwrap(), "int a;\n");
        assert!(!copied.join(".git").exists());

        std::fs::write(copied.join("src/a.c"), "int b;\n").unwrap();
        assert_eq!(
            std::fs::read_to_string(target.path().join("src/a.c")).unwrap(),
            "int a;\n"
        );

        drop(wc);
        assert!(!copied.exists());
    }

    #[test]
    fn missing_target_is_an_error() {
        let err = WorkingCopy::prepare(Path::new("/no/such/fixport/target"), true).unwrap_err();
        assert!(matches!(err, HarnessError::WorkingCopy(_)));
    }

    fn git(repo: &Path, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(repo)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&output.stderr));
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    #[test]
    fn release_checkout_reads_the_release_and_cleans_up() {
        let repo = tempfile::tempdir().unwrap();
        git(repo.path(), &["init"]);
        git(repo.path(), &["config", "user.name", "test-user"]);
        git(repo.path(), &["config", "user.email", "test@example.com"]);
        std::fs::write(repo.path().join("a.c"), "int old;\n").unwrap();
        git(repo.path(), &["add", "."]);
        git(repo.path(), &["commit", "-m", "release"]);
        git(repo.path(), &["tag", "v1.0"]);
        std::fs::write(repo.path().join("a.c"), "int new;\n").unwrap();
        git(repo.path(), &["commit", "-am", "later"]);
        std::fs::write(repo.path().join(".config"), "CONFIG_FOO=y\n").unwrap();

        let checkout = ReleaseCheckout::create(repo.path(), "v1.0").unwrap();
        let path = checkout.path().to_path_buf();
        assert_eq!(checkout.rev(), git(repo.path(), &["rev-parse", "v1.0"]));
        assert_eq!(std::fs::read_to_string(path.join("a.c")).unwrap(), "int old;\n");
        assert_eq!(std::fs::read_to_string(path.join(".config")).unwrap(), "CONFIG_FOO=y\n");
        assert_eq!(
            std::fs::read_to_string(repo.path().join("a.c")).unwrap(),
            "int new;\n"
        );

        drop(checkout);
        assert!(!path.exists());
        let list = git(repo.path(), &["worktree", "list", "--porcelain"]);
        assert_eq!(list.lines().filter(|l| l.starts_with("worktree ")).count(), 1);
    }

    #[test]
    fn unknown_release_is_an_error() {
        let repo = tempfile::tempdir().unwrap();
        git(repo.path(), &["init"]);
        let err = ReleaseCheckout::create(repo.path(), "v9.9").unwrap_err();
        assert!(matches!(err, fixport_core::FixportError::CommitNotFound(_)), "{err}");
    }
}
