//! The result of running the pipeline on one work item.
//!
//! Construction goes through stage-specific constructors so the nesting
//! invariant holds by construction: a validation result implies a patch, and a
//! patch implies an applicable verdict.

use serde::{Deserialize, Serialize};

use crate::domain::patch::BackportPatch;
use crate::domain::validation::{ValidationResult, ValidationStatus};
use crate::domain::verdict::{Reason, Verdict};

/// How far a work item progressed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum OutcomeStage {
    Prejudged,
    SynthesisFailed { detail: String },
    Synthesized,
    Validated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineOutcome {
    verdict: Verdict,
    stage: OutcomeStage,
    patch: Option<BackportPatch>,
    validation: Option<ValidationResult>,
    findings: Vec<String>,
}

impl PipelineOutcome {
    pub fn not_applicable(reason: Reason) -> Self {
        Self {
            verdict: Verdict::NotApplicable(reason),
            stage: OutcomeStage::Prejudged,
            patch: None,
            validation: None,
            findings: Vec::new(),
        }
    }

    /// Applicable, pipeline stopped after prejudge.
    pub fn applicable() -> Self {
        Self {
            verdict: Verdict::Applicable,
            stage: OutcomeStage::Prejudged,
            patch: None,
            validation: None,
            findings: Vec::new(),
        }
    }

    /// Applicable but no patch could be produced; routed to manual review.
    pub fn synthesis_failed(detail: impl Into<String>) -> Self {
        Self {
            stage: OutcomeStage::SynthesisFailed {
                detail: detail.into(),
            },
            ..Self::applicable()
        }
    }

    pub fn synthesized(patch: BackportPatch) -> Self {
        Self {
            stage: OutcomeStage::Synthesized,
            patch: Some(patch),
            ..Self::applicable()
        }
    }

    pub fn validated(patch: BackportPatch, validation: ValidationResult) -> Self {
        Self {
            stage: OutcomeStage::Validated,
            patch: Some(patch),
            validation: Some(validation),
            ..Self::applicable()
        }
    }

    /// Attach the judge's explanation lines.
    pub fn with_findings(mut self, findings: Vec<String>) -> Self {
        self.findings = findings;
        self
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn stage(&self) -> &OutcomeStage {
        &self.stage
    }

    pub fn patch(&self) -> Option<&BackportPatch> {
        self.patch.as_ref()
    }

    pub fn validation(&self) -> Option<&ValidationResult> {
        self.validation.as_ref()
    }

    pub fn findings(&self) -> &[String] {
        &self.findings
    }

    /// `"<true|false>, <reason>"` as written to the batch output column.
    pub fn prejudge_result(&self) -> String {
        match self.verdict {
            Verdict::NotApplicable(reason) => format!("false, {reason}"),
            Verdict::Applicable => {
                let detail = match (&self.stage, &self.validation) {
                    (OutcomeStage::Validated, Some(v)) => match v.status() {
                        ValidationStatus::Pass => "validated",
                        ValidationStatus::Fail => "validation failed",
                        ValidationStatus::Inconclusive => "validation inconclusive",
                    },
                    (OutcomeStage::Synthesized, _) => "synthesized",
                    (OutcomeStage::SynthesisFailed { .. }, _) => "synthesis failed",
                    _ => "applicable",
                };
                format!("true, {detail}")
            }
        }
    }
}
