//! Error types for fixport-pipeline

use std::path::PathBuf;

use fixport_core::ValidationCondition;
use thiserror::Error;

/// Failures inside the validation harness.
///
/// These never escape [`crate::ValidationHarness::validate`]: each one is
/// recorded as an inconclusive [`ValidationCondition`].
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("script not found: {}", .0.display())]
    MissingScript(PathBuf),

    #[error("failed to start {script}: {source}")]
    Spawn {
        script: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} timed out after {secs} seconds")]
    Timeout { stage: String, secs: u64 },

    #[error("{phase} build exited with {exit_code}")]
    Build { phase: String, exit_code: i32 },

    #[error("test script exited with {0}")]
    Test(i32),

    #[error("patch does not apply: {0}")]
    PatchConflict(String),

    #[error("working copy: {0}")]
    WorkingCopy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// The inconclusive condition this failure is recorded as.
    pub fn condition(&self) -> ValidationCondition {
        match self {
            HarnessError::Timeout { stage, secs } => ValidationCondition::Timeout {
                stage: stage.clone(),
                secs: *secs,
            },
            HarnessError::Build { phase, exit_code } => ValidationCondition::BuildFailure {
                phase: phase.clone(),
                exit_code: *exit_code,
            },
            HarnessError::Test(exit_code) => ValidationCondition::TestFailure {
                exit_code: *exit_code,
            },
            HarnessError::PatchConflict(detail) => ValidationCondition::PatchConflict {
                detail: detail.clone(),
            },
            other => ValidationCondition::HarnessError {
                detail: other.to_string(),
            },
        }
    }
}

/// Batch-level failures. Per-row failures are written to the output instead.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("input is missing the {0:?} column")]
    MissingColumn(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
