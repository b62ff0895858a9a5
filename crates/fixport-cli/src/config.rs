//! Per-project backport configuration (YAML).
//!
//! ```yaml
//! project: libfoo
//! project_url: https://example.org/libfoo.git
//! project_dir: ~/src/libfoo
//! new_patch: 4f1c2a9
//! new_patch_parent: 4f1c2a9^
//! target_release: v2.1.0
//! sanitizer: address
//! error_message: "heap-buffer-overflow"
//! patch_dataset_dir: ./CVE-2024-1234
//! ```

use std::path::{Path, PathBuf};

use fixport_core::{GitCli, Vcs};
use fixport_pipeline::{
    HarnessConfig, Sanitizer, DEFAULT_BUILD_TIMEOUT_SECS, DEFAULT_POC_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{field} is not a directory: {}", path.display())]
    MissingDirectory { field: &'static str, path: PathBuf },

    #[error("{} is not a git repository", .0.display())]
    NotARepository(PathBuf),

    #[error("{field} does not name a commit: {value}")]
    UnknownCommit { field: &'static str, value: String },

    #[error("{0}")]
    UnknownSanitizer(String),

    #[error("git error: {0}")]
    Git(#[from] fixport_core::FixportError),
}

fn default_build_timeout() -> u64 {
    DEFAULT_BUILD_TIMEOUT_SECS
}

fn default_poc_timeout() -> u64 {
    DEFAULT_POC_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub project: String,
    #[serde(default)]
    pub project_url: Option<String>,
    /// Target checkout; also the mainline repository unless `mainline_dir`
    /// is set.
    pub project_dir: PathBuf,
    pub new_patch: String,
    /// Diff base of the fix; its first parent when unset.
    #[serde(default)]
    pub new_patch_parent: Option<String>,
    pub target_release: String,
    #[serde(default)]
    pub sanitizer: Option<String>,
    /// Diagnostic substring expected from the trigger before the fix.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Holds `build.sh`, `poc.sh` and optionally `test.sh`.
    pub patch_dataset_dir: PathBuf,
    #[serde(default)]
    pub mainline_dir: Option<PathBuf>,
    #[serde(default)]
    pub poc_input: Option<PathBuf>,
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_poc_timeout")]
    pub poc_timeout_secs: u64,
    #[serde(default)]
    pub config_manifests: Vec<PathBuf>,
    /// Free-form label for reports.
    #[serde(default)]
    pub tag: Option<String>,
}

impl ProjectConfig {
    /// Read, resolve paths relative to the file, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = Self::parse(&content)?;
        config.resolve_paths(base);
        config.validate()?;
        debug!(project = %config.project, fix = %config.new_patch, "project config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn mainline_dir(&self) -> &Path {
        self.mainline_dir.as_deref().unwrap_or(&self.project_dir)
    }

    pub fn sanitizer(&self) -> Result<Option<Sanitizer>, ConfigError> {
        self.sanitizer
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<Sanitizer>)
            .transpose()
            .map_err(ConfigError::UnknownSanitizer)
    }

    /// Harness settings for this project.
    pub fn harness(&self, isolate: bool) -> Result<HarnessConfig, ConfigError> {
        let mut harness = HarnessConfig::new(&self.patch_dataset_dir);
        harness.sanitizer = self.sanitizer()?;
        harness.expected = self.error_message.clone().filter(|m| !m.trim().is_empty());
        harness.poc_input = self.poc_input.clone();
        harness.build_timeout_secs = self.build_timeout_secs;
        harness.poc_timeout_secs = self.poc_timeout_secs;
        harness.isolate = isolate;
        Ok(harness)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &Path| {
            let p = expand_home(p);
            if p.is_absolute() {
                p
            } else {
                base.join(p)
            }
        };
        self.project_dir = resolve(&self.project_dir);
        self.patch_dataset_dir = resolve(&self.patch_dataset_dir);
        self.mainline_dir = self.mainline_dir.as_deref().map(resolve);
        self.poc_input = self.poc_input.as_deref().map(resolve);
        self.config_manifests = self.config_manifests.iter().map(|p| resolve(p)).collect();
    }

    /// Check directories and rewrite every revision to a full hash.
    fn validate(&mut self) -> Result<(), ConfigError> {
        require_dir("project_dir", &self.project_dir)?;
        require_dir("patch_dataset_dir", &self.patch_dataset_dir)?;

        let mainline = self.mainline_dir().to_path_buf();
        require_dir("mainline_dir", &mainline)?;
        let mainline =
            GitCli::open(&mainline).ok_or_else(|| ConfigError::NotARepository(mainline.clone()))?;

        self.new_patch = full_hash(&mainline, "new_patch", &self.new_patch)?;
        if let Some(parent) = &self.new_patch_parent {
            self.new_patch_parent = Some(full_hash(&mainline, "new_patch_parent", parent)?);
        }

        match GitCli::open(&self.project_dir) {
            Some(target) => {
                self.target_release = full_hash(&target, "target_release", &self.target_release)?;
            }
            None => warn!(
                project_dir = %self.project_dir.display(),
                "project_dir is not a git repository; target_release not checked"
            ),
        }

        self.sanitizer()?;
        if self.sanitizer.is_none() && self.error_message.is_none() {
            warn!("no sanitizer or error_message configured; validation will be inconclusive");
        }
        Ok(())
    }
}

fn require_dir(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ConfigError::MissingDirectory {
            field,
            path: path.to_path_buf(),
        })
    }
}

fn full_hash(vcs: &GitCli, field: &'static str, rev: &str) -> Result<String, ConfigError> {
    let rev = rev.trim();
    if rev.is_empty() || !vcs.commit_exists(rev) {
        return Err(ConfigError::UnknownCommit {
            field,
            value: rev.to_string(),
        });
    }
    Ok(vcs.rev_parse(rev)?)
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?} failed", args);
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Project repo with two commits and a scripts directory next to it.
    fn project() -> (tempfile::TempDir, String, String) {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("libfoo");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::create_dir_all(dir.path().join("CVE-1")).unwrap();
        run_git(&repo, &["init"]);
        run_git(&repo, &["config", "user.name", "test-user"]);
        run_git(&repo, &["config", "user.email", "test@example.com"]);
        std::fs::write(repo.join("a.c"), "int a;\n").unwrap();
        run_git(&repo, &["add", "."]);
        run_git(&repo, &["commit", "-m", "base"]);
        run_git(&repo, &["tag", "v1.0"]);
        let base = run_git(&repo, &["rev-parse", "HEAD"]);
        std::fs::write(repo.join("a.c"), "int a = 1;\n").unwrap();
        run_git(&repo, &["commit", "-am", "fix"]);
        let fix = run_git(&repo, &["rev-parse", "HEAD"]);
        (dir, base, fix)
    }

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("cve.yml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_and_resolves_revisions() {
        let (dir, base, fix) = project();
        let path = write_config(
            dir.path(),
            &format!(
                "project: libfoo\nproject_dir: libfoo\nnew_patch: {}\nnew_patch_parent: HEAD~1\ntarget_release: v1.0\nsanitizer: asan\npatch_dataset_dir: CVE-1\n",
                &fix[..10]
            ),
        );

        let config = ProjectConfig::load(&path).unwrap();
        assert_eq!(config.new_patch, fix);
        assert_eq!(config.new_patch_parent.as_deref(), Some(base.as_str()));
        assert_eq!(config.target_release, base);
        assert_eq!(config.project_dir, dir.path().join("libfoo"));
        assert_eq!(config.mainline_dir(), dir.path().join("libfoo"));
        assert_eq!(config.build_timeout_secs, 3600);
        assert_eq!(config.poc_timeout_secs, 600);
        assert_eq!(config.sanitizer().unwrap(), Some(Sanitizer::Address));

        let harness = config.harness(true).unwrap();
        assert_eq!(harness.scripts_dir, dir.path().join("CVE-1"));
        assert_eq!(harness.signature().as_deref(), Some("ERROR: AddressSanitizer"));
        assert!(harness.isolate);
    }

    #[test]
    fn missing_dataset_dir_is_rejected() {
        let (dir, _, fix) = project();
        let path = write_config(
            dir.path(),
            &format!("project: libfoo\nproject_dir: libfoo\nnew_patch: {fix}\ntarget_release: v1.0\npatch_dataset_dir: nowhere\n"),
        );
        let err = ProjectConfig::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingDirectory {
                field: "patch_dataset_dir",
                ..
            }
        ));
    }

    #[test]
    fn unknown_commit_is_rejected() {
        let (dir, _, _) = project();
        let path = write_config(
            dir.path(),
            "project: libfoo\nproject_dir: libfoo\nnew_patch: 0123456789abcdef\ntarget_release: v1.0\npatch_dataset_dir: CVE-1\n",
        );
        let err = ProjectConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCommit { field: "new_patch", .. }));
    }

    #[test]
    fn unknown_sanitizer_is_rejected() {
        let (dir, _, fix) = project();
        let path = write_config(
            dir.path(),
            &format!("project: libfoo\nproject_dir: libfoo\nnew_patch: {fix}\ntarget_release: v1.0\nsanitizer: valgrind\npatch_dataset_dir: CVE-1\n"),
        );
        let err = ProjectConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("valgrind"));
    }

    #[test]
    fn missing_required_field_is_a_parse_error() {
        let err = ProjectConfig::parse("project: libfoo\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn home_is_expanded() {
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_home(Path::new("~/src")), PathBuf::from(home).join("src"));
        }
        assert_eq!(expand_home(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
