//! Results of the reproduce / patch / re-run cycle.

use serde::{Deserialize, Serialize};

/// Overall status of a validation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pass,
    Fail,
    Inconclusive,
}

/// Why validation ended the way it did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum ValidationCondition {
    /// Reproduced before the patch, gone after it.
    Fixed,
    /// The expected diagnostic survives the patch.
    StillReproduces,
    /// The unpatched build did not exhibit the expected diagnostic.
    PocNotReproducing,
    /// A build step exited non-zero.
    BuildFailure { phase: String, exit_code: i32 },
    /// A stage exceeded its time bound.
    Timeout { stage: String, secs: u64 },
    /// The project test script failed on the patched build.
    TestFailure { exit_code: i32 },
    /// The patch could not be applied to the working copy.
    PatchConflict { detail: String },
    /// Neither an expected string nor a sanitizer signature is known.
    NoSignature,
    /// Scripts or the working copy could not be prepared.
    HarnessError { detail: String },
}

impl ValidationCondition {
    pub fn status(&self) -> ValidationStatus {
        match self {
            ValidationCondition::Fixed => ValidationStatus::Pass,
            ValidationCondition::StillReproduces => ValidationStatus::Fail,
            _ => ValidationStatus::Inconclusive,
        }
    }
}

/// Captured output of one trigger run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerCapture {
    pub exit_code: i32,
    /// stdout followed by stderr.
    pub output: String,
    pub duration_ms: u64,
}

impl TriggerCapture {
    pub fn contains(&self, needle: &str) -> bool {
        self.output.contains(needle)
    }
}

/// Outcome of validating one backport patch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    status: ValidationStatus,
    condition: ValidationCondition,
    signature: Option<String>,
    pre_patch: Option<TriggerCapture>,
    post_patch: Option<TriggerCapture>,
}

impl ValidationResult {
    /// Status is derived from the condition, never set independently.
    pub fn new(
        condition: ValidationCondition,
        signature: Option<String>,
        pre_patch: Option<TriggerCapture>,
        post_patch: Option<TriggerCapture>,
    ) -> Self {
        Self {
            status: condition.status(),
            condition,
            signature,
            pre_patch,
            post_patch,
        }
    }

    pub fn inconclusive(condition: ValidationCondition) -> Self {
        Self::new(condition, None, None, None)
    }

    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    pub fn condition(&self) -> &ValidationCondition {
        &self.condition
    }

    /// The diagnostic substring the decision was made on.
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn pre_patch(&self) -> Option<&TriggerCapture> {
        self.pre_patch.as_ref()
    }

    pub fn post_patch(&self) -> Option<&TriggerCapture> {
        self.post_patch.as_ref()
    }

    pub fn passed(&self) -> bool {
        self.status == ValidationStatus::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_condition() {
        assert_eq!(ValidationCondition::Fixed.status(), ValidationStatus::Pass);
        assert_eq!(
            ValidationCondition::StillReproduces.status(),
            ValidationStatus::Fail
        );
        let timeout = ValidationCondition::Timeout {
            stage: "build".into(),
            secs: 3600,
        };
        assert_eq!(timeout.status(), ValidationStatus::Inconclusive);
        assert_eq!(
            ValidationResult::inconclusive(ValidationCondition::NoSignature).status(),
            ValidationStatus::Inconclusive
        );
    }

    #[test]
    fn condition_serializes_tagged() {
        let c = ValidationCondition::BuildFailure {
            phase: "post-patch".into(),
            exit_code: 2,
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["condition"], "build_failure");
        assert_eq!(json["phase"], "post-patch");
    }
}
