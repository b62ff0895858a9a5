//! fixport-pipeline: run work items end to end.
//!
//! - [`ValidationHarness`]: reproduce → patch → rebuild → re-run with the
//!   project's own `build.sh` / `poc.sh` scripts
//! - [`Pipeline`]: one `(mainline, target, fix)` work item through
//!   prejudge, synthesis and validation
//! - [`run_batch`]: the CSV driver over many work items

pub mod batch;
pub mod error;
pub mod harness;
pub mod pipeline;
pub mod runner;
pub mod sanitizer;
pub mod stage;
pub mod workcopy;

pub use batch::{run_batch, BatchConfig, BatchSummary, RESULT_COLUMN};
pub use error::{BatchError, HarnessError};
pub use harness::{HarnessConfig, ValidationHarness};
pub use pipeline::{Pipeline, PipelineConfig, PipelineMode, RunRecord, WorkItem};
pub use runner::{ScriptRunner, StageResult};
pub use sanitizer::Sanitizer;
pub use stage::{ProjectScript, StageConfig, DEFAULT_BUILD_TIMEOUT_SECS, DEFAULT_POC_TIMEOUT_SECS};
pub use workcopy::{ReleaseCheckout, WorkingCopy};
