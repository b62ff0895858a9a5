//! Commit references tagged with their lineage.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::{FixportError, Result};

/// Which history a commit belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Lineage {
    /// The security fix on the mainline branch.
    MainlineFix,
    /// The fix commit's first parent.
    MainlineFixParent,
    /// The revision the fix is being carried to.
    TargetRelease,
}

impl Lineage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lineage::MainlineFix => "mainline-fix",
            Lineage::MainlineFixParent => "mainline-fix-parent",
            Lineage::TargetRelease => "target-release",
        }
    }
}

/// Whether `hash` is an abbreviated or full hexadecimal commit id (7-40 chars).
pub fn is_valid_hash(hash: &str) -> bool {
    (7..=40).contains(&hash.len()) && hash.chars().all(|c| c.is_ascii_hexdigit())
}

/// A commit hash plus the lineage it was taken from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CommitRef {
    hash: String,
    lineage: Lineage,
}

impl CommitRef {
    /// Build a reference, rejecting anything that is not 7-40 hex characters.
    pub fn new(hash: impl AsRef<str>, lineage: Lineage) -> Result<Self> {
        let hash = hash.as_ref().trim();
        if !is_valid_hash(hash) {
            return Err(FixportError::InvalidCommitHash(hash.to_string()));
        }
        Ok(Self {
            hash: hash.to_ascii_lowercase(),
            lineage,
        })
    }

    pub fn mainline_fix(hash: impl AsRef<str>) -> Result<Self> {
        Self::new(hash, Lineage::MainlineFix)
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn lineage(&self) -> Lineage {
        self.lineage
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.short(), self.lineage.as_str())
    }
}
