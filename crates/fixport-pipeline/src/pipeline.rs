//! One work item through prejudge → backport → validate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fixport_core::{
    is_git_repo, CommitRef, ConfigResolver, FixportError, FsSourceTree, GitCli, Lineage,
    PipelineOutcome, Prejudge, PrejudgeReport, Result, SymbolOracle, Synthesizer, Verdict,
};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::harness::{HarnessConfig, ValidationHarness};
use crate::workcopy::ReleaseCheckout;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Stop after the verdict.
    PrejudgeOnly,
    /// Synthesize, then validate when a harness is configured.
    Full,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    /// Target revision to judge, patch and build. When set and the target
    /// is a git repository, that revision is checked out into a scratch
    /// worktree; otherwise the target's working tree is used as it is and
    /// ancestry is checked against `HEAD`.
    pub target_release: Option<String>,
    /// Explicit build-configuration manifests; discovered when empty.
    pub config_manifests: Vec<PathBuf>,
    pub harness: Option<HarnessConfig>,
}

impl PipelineConfig {
    pub fn prejudge_only() -> Self {
        Self {
            mode: PipelineMode::PrejudgeOnly,
            target_release: None,
            config_manifests: Vec::new(),
            harness: None,
        }
    }

    pub fn full() -> Self {
        Self {
            mode: PipelineMode::Full,
            ..Self::prejudge_only()
        }
    }

    pub fn with_harness(mut self, harness: HarnessConfig) -> Self {
        self.harness = Some(harness);
        self
    }
}

/// `(mainline dir, target dir, fix hash)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub mainline_dir: PathBuf,
    pub target_dir: PathBuf,
    pub fix: String,
    /// Diff base; the fix's first parent when unset.
    pub parent: Option<String>,
}

impl WorkItem {
    pub fn new(mainline_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>, fix: impl Into<String>) -> Self {
        Self {
            mainline_dir: mainline_dir.into(),
            target_dir: target_dir.into(),
            fix: fix.into(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Reject malformed input before any stage runs.
    fn check(&self) -> Result<(CommitRef, Option<CommitRef>)> {
        let fix = CommitRef::mainline_fix(&self.fix)?;
        let parent = self
            .parent
            .as_deref()
            .map(|p| CommitRef::new(p, Lineage::MainlineFixParent))
            .transpose()?;
        if !self.mainline_dir.is_dir() || !is_git_repo(&self.mainline_dir) {
            return Err(FixportError::MainlineDirMissing(self.mainline_dir.clone()));
        }
        if !self.target_dir.is_dir() {
            return Err(FixportError::TargetDirMissing(self.target_dir.clone()));
        }
        Ok((fix, parent))
    }
}

/// What one invocation produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fix: CommitRef,
    pub target: PathBuf,
    /// Full hash of the checked-out target release, when one was used.
    pub target_rev: Option<String>,
    pub outcome: PipelineOutcome,
    pub prejudge: PrejudgeReport,
    /// SHA-256 of the synthesized patch, when there is one.
    pub patch_digest: Option<String>,
    /// `git apply`-compatible rendering of the patch against the target.
    pub patch_diff: Option<String>,
}

pub struct Pipeline {
    config: PipelineConfig,
    oracle: Arc<dyn SymbolOracle>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, oracle: Arc<dyn SymbolOracle>) -> Self {
        Self { config, oracle }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Whether validation builds patch the target tree itself.
    pub fn validates_in_place(&self) -> bool {
        self.config.mode == PipelineMode::Full
            && self.config.harness.as_ref().is_some_and(|h| !h.isolate)
    }

    /// Run one work item. Only malformed input is an error; every other
    /// failure is part of the outcome.
    pub async fn run(&self, item: &WorkItem) -> Result<RunRecord> {
        let id = Uuid::new_v4();
        let span = info_span!("pipeline", %id, fix = %item.fix);
        async {
            let started_at = Utc::now();
            let (fix, parent) = item.check()?;
            let release = self.checkout_release(item).await?;
            let tree_dir = release
                .as_ref()
                .map_or(item.target_dir.as_path(), ReleaseCheckout::path);
            let prejudge = self.prejudge(&fix, parent.as_ref(), item, tree_dir).await?;

            let outcome = self
                .backport(&prejudge, tree_dir)
                .await
                .with_findings(prejudge.judgement.details());
            let patch_diff = outcome
                .patch()
                .and_then(|p| p.to_unified_diff(tree_dir).ok());
            let patch_digest = outcome.patch().and_then(|p| p.digest().ok());
            info!(result = %outcome.prejudge_result(), "work item finished");

            let target_rev = release.as_ref().map(|r| r.rev().to_string());
            if let Some(release) = release {
                blocking(move || {
                    drop(release);
                    Ok(())
                })
                .await?;
            }

            Ok(RunRecord {
                id,
                started_at,
                finished_at: Utc::now(),
                fix,
                target: item.target_dir.clone(),
                target_rev,
                outcome,
                prejudge,
                patch_digest,
                patch_diff,
            })
        }
        .instrument(span)
        .await
    }

    async fn checkout_release(&self, item: &WorkItem) -> Result<Option<ReleaseCheckout>> {
        let Some(release) = self.config.target_release.clone() else {
            return Ok(None);
        };
        let target = item.target_dir.clone();
        let span = Span::current();
        blocking(move || {
            span.in_scope(|| {
                if !is_git_repo(&target) {
                    warn!(release = %release, "target is not a repository; using its working tree");
                    return Ok(None);
                }
                ReleaseCheckout::create(&target, &release).map(Some)
            })
        })
        .await
    }

    async fn prejudge(
        &self,
        fix: &CommitRef,
        parent: Option<&CommitRef>,
        item: &WorkItem,
        tree_dir: &Path,
    ) -> Result<PrejudgeReport> {
        let job = PrejudgeJob {
            fix: fix.clone(),
            parent: parent.cloned(),
            mainline_dir: item.mainline_dir.clone(),
            target_dir: item.target_dir.clone(),
            tree_dir: tree_dir.to_path_buf(),
            release: self.config.target_release.clone(),
            manifests: self.config.config_manifests.clone(),
            oracle: Arc::clone(&self.oracle),
        };
        let handle = Handle::current();
        let span = Span::current();
        blocking(move || handle.block_on(job.run().instrument(span))).await
    }

    async fn backport(&self, report: &PrejudgeReport, target: &Path) -> PipelineOutcome {
        match report.verdict() {
            Verdict::NotApplicable(reason) => return PipelineOutcome::not_applicable(reason),
            Verdict::Applicable if self.config.mode == PipelineMode::PrejudgeOnly => {
                return PipelineOutcome::applicable()
            }
            Verdict::Applicable => {}
        }

        let tree = FsSourceTree::new(target);
        let patch = match Synthesizer::new(&tree).synthesize(&report.units, &report.code_paths) {
            Ok(patch) => patch,
            Err(e) => {
                warn!(error = %e, "synthesis failed, routing to manual review");
                return PipelineOutcome::synthesis_failed(e.to_string());
            }
        };
        info!(edits = patch.edits().len(), "backport synthesized");

        match &self.config.harness {
            Some(harness) => {
                let validation = ValidationHarness::new(harness.clone())
                    .validate(target, &patch)
                    .await;
                PipelineOutcome::validated(patch, validation)
            }
            None => PipelineOutcome::synthesized(patch),
        }
    }
}

/// Owned inputs of the prejudge stage, so it can run on a blocking thread.
struct PrejudgeJob {
    fix: CommitRef,
    parent: Option<CommitRef>,
    mainline_dir: PathBuf,
    /// The target as given; ancestry is checked in its repository.
    target_dir: PathBuf,
    /// What the target looks like at the release being judged.
    tree_dir: PathBuf,
    release: Option<String>,
    manifests: Vec<PathBuf>,
    oracle: Arc<dyn SymbolOracle>,
}

impl PrejudgeJob {
    async fn run(self) -> Result<PrejudgeReport> {
        let mainline = GitCli::new(&self.mainline_dir);
        let tree = FsSourceTree::new(&self.tree_dir);
        let resolver = if self.manifests.is_empty() {
            ConfigResolver::for_target(&self.tree_dir)?
        } else {
            ConfigResolver::with_manifests(&self.tree_dir, &self.manifests)?
        };
        let target_vcs = GitCli::open(&self.target_dir);

        let mut prejudge = Prejudge::new(&mainline, &tree, &resolver, self.oracle.as_ref());
        if let Some(vcs) = &target_vcs {
            prejudge = prejudge.with_target_vcs(vcs, self.release.as_deref());
        }
        prejudge.run_from(&self.fix, self.parent.as_ref()).await
    }
}

/// Run git and filesystem work off the async executor, so one slow row does
/// not stall the others polled alongside it.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FixportError::Io(std::io::Error::other(e)))?
}
