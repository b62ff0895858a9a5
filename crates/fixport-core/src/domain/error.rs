//! Error taxonomy for the backport pipeline.

use std::path::PathBuf;

use crate::domain::verdict::Reason;

/// fixport domain errors.
#[derive(Debug, thiserror::Error)]
pub enum FixportError {
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    #[error("commit {0} carries no code change")]
    EmptyDiff(String),

    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("build failed: {0}")]
    BuildFailure(String),

    #[error("{stage} timed out after {secs} seconds")]
    ExecutionTimeout { stage: String, secs: u64 },

    #[error("invalid commit hash: {0:?}")]
    InvalidCommitHash(String),

    #[error("target directory missing: {}", .0.display())]
    TargetDirMissing(PathBuf),

    #[error("mainline directory missing: {}", .0.display())]
    MainlineDirMissing(PathBuf),

    #[error("patch does not apply: {0}")]
    PatchConflict(String),

    #[error("git error: {0}")]
    GitError(String),

    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixportError {
    /// Verdict reason this error deterministically maps to, if any.
    ///
    /// Extraction failures are terminal and never retried: a fix whose commits
    /// cannot be read, or that changes no code, is not applicable.
    pub fn verdict_reason(&self) -> Option<Reason> {
        match self {
            FixportError::CommitNotFound(_) | FixportError::EmptyDiff(_) => {
                Some(Reason::FixCommitsMissing)
            }
            // a repository that stops answering cannot settle the question
            FixportError::ExecutionTimeout { .. } => Some(Reason::Indeterminate),
            _ => None,
        }
    }

    /// Malformed input that aborts the single work item.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            FixportError::InvalidCommitHash(_)
                | FixportError::TargetDirMissing(_)
                | FixportError::MainlineDirMissing(_)
        )
    }
}

/// Result type for fixport domain operations.
pub type Result<T> = std::result::Result<T, FixportError>;
