//! fixport core library
//!
//! Domain model and the prejudge / backport stages of the pipeline: diff
//! extraction, build-configuration resolution, code-path and ancestry
//! probes, the applicability judge and the backport synthesizer.

pub mod config;
pub mod domain;
pub mod extract;
pub mod fakes;
pub mod judge;
pub mod oracle;
pub mod prejudge;
pub mod probe;
pub mod source_tree;
pub mod synth;
pub mod telemetry;
pub mod textdiff;
pub mod vcs;

pub use domain::{
    is_valid_hash, AppliedPatch, BackportPatch, ChangeUnit, CommitRef, ConfigState, EditPoint,
    EnclosingSymbol, FixportError, Guard, GuardStatus, HunkSpan, Lineage, OutcomeStage,
    PipelineOutcome, Reason, Result, SymbolEdit, SymbolKind, SymbolState, TriggerCapture,
    ValidationCondition, ValidationResult, ValidationStatus, Verdict,
};

pub use config::{ConfigManifest, ConfigResolver, KconfigIndex, ManifestSet};
pub use extract::{DiffExtractor, Extraction};
pub use judge::{judge, Finding, JudgeContext, JudgeRule, JudgeRuleSet, Judgement};
pub use oracle::{FixedOracle, OracleAnswer, SimilarityOracle, SymbolOracle};
pub use prejudge::{Prejudge, PrejudgeReport};
pub use probe::{AncestryProbe, AncestryReport, CodePath, CodePathProbe, TargetSite};
pub use source_tree::{FsSourceTree, SourceTree};
pub use synth::Synthesizer;
pub use vcs::{is_git_repo, GitCli, Vcs};

pub use telemetry::init_tracing;

/// fixport version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
