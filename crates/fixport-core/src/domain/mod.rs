//! Domain models for fixport.
//!
//! Canonical definitions for the entities that flow through the pipeline:
//! - `CommitRef`: a commit hash tagged with the lineage it belongs to
//! - `ChangeUnit`: one logical change of the mainline fix, scoped to a symbol
//! - `ConfigState`: resolved enablement of build-time condition symbols
//! - `Verdict`: the prejudge decision
//! - `BackportPatch`: symbol-anchored edits for the target tree
//! - `ValidationResult`: empirical outcome of the reproduce/patch/re-run cycle
//! - `PipelineOutcome`: everything one work item produced

pub mod change_unit;
pub mod commit;
pub mod config_state;
pub mod error;
pub mod outcome;
pub mod patch;
pub mod validation;
pub mod verdict;

// Re-export main types and errors
pub use change_unit::{ChangeUnit, EnclosingSymbol, Guard, HunkSpan, SymbolKind};
pub use commit::{is_valid_hash, CommitRef, Lineage};
pub use config_state::{ConfigState, GuardStatus, SymbolState};
pub use error::{FixportError, Result};
pub use outcome::{OutcomeStage, PipelineOutcome};
pub use patch::{AppliedPatch, BackportPatch, EditPoint, SymbolEdit};
pub use validation::{TriggerCapture, ValidationCondition, ValidationResult, ValidationStatus};
pub use verdict::{Reason, Verdict};
