//! The prejudge decision.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed taxonomy of reasons a fix does not apply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    FixCommitsMissing,
    ConfigNotEnabled,
    CodePathAbsent,
    AncestryMismatch,
    Indeterminate,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::FixCommitsMissing => "fix commits missing",
            Reason::ConfigNotEnabled => "config not enabled",
            Reason::CodePathAbsent => "code path absent",
            Reason::AncestryMismatch => "ancestry mismatch",
            Reason::Indeterminate => "indeterminate",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a fix should be carried to the target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "verdict", content = "reason", rename_all = "kebab-case")]
pub enum Verdict {
    Applicable,
    NotApplicable(Reason),
}

impl Verdict {
    pub fn is_applicable(&self) -> bool {
        matches!(self, Verdict::Applicable)
    }

    pub fn reason(&self) -> Option<Reason> {
        match self {
            Verdict::Applicable => None,
            Verdict::NotApplicable(r) => Some(*r),
        }
    }
}
