//! Advisory oracle for ambiguous code-path matches.
//!
//! The probe asks an oracle whether a drifted target symbol is the same
//! logical code as the mainline one when name and body similarity alone
//! are inconclusive. Answers are advisory: `Unknown` never turns into a
//! match or a mismatch on its own.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::textdiff::line_similarity;

/// Similarity at or above which two bodies are the same code.
pub const MATCH_THRESHOLD: f64 = 0.6;
/// Similarity below which two bodies are unrelated.
pub const NO_MATCH_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OracleAnswer {
    Match,
    NoMatch,
    Unknown,
}

impl OracleAnswer {
    pub fn as_str(&self) -> &'static str {
        match self {
            OracleAnswer::Match => "match",
            OracleAnswer::NoMatch => "no-match",
            OracleAnswer::Unknown => "unknown",
        }
    }
}

#[async_trait]
pub trait SymbolOracle: Send + Sync {
    /// Is `candidate` (target tree) the same logical code as `target`
    /// (mainline pre-fix body)?
    async fn classify(&self, candidate: &str, target: &str) -> OracleAnswer;

    fn name(&self) -> &str;
}

/// Deterministic oracle over line-level similarity.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityOracle {
    pub accept: f64,
    pub reject: f64,
}

impl Default for SimilarityOracle {
    fn default() -> Self {
        Self {
            accept: MATCH_THRESHOLD,
            reject: NO_MATCH_THRESHOLD,
        }
    }
}

#[async_trait]
impl SymbolOracle for SimilarityOracle {
    async fn classify(&self, candidate: &str, target: &str) -> OracleAnswer {
        let score = line_similarity(candidate, target);
        if score >= self.accept {
            OracleAnswer::Match
        } else if score < self.reject {
            OracleAnswer::NoMatch
        } else {
            OracleAnswer::Unknown
        }
    }

    fn name(&self) -> &str {
        "similarity"
    }
}

/// Oracle with canned answers, keyed by candidate text.
#[derive(Debug, Clone)]
pub struct FixedOracle {
    default: OracleAnswer,
    answers: HashMap<String, OracleAnswer>,
}

impl FixedOracle {
    pub fn new(default: OracleAnswer) -> Self {
        Self {
            default,
            answers: HashMap::new(),
        }
    }

    pub fn with_answer(mut self, candidate: impl Into<String>, answer: OracleAnswer) -> Self {
        self.answers.insert(candidate.into(), answer);
        self
    }
}

#[async_trait]
impl SymbolOracle for FixedOracle {
    async fn classify(&self, candidate: &str, _target: &str) -> OracleAnswer {
        self.answers.get(candidate).copied().unwrap_or(self.default)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn similarity_thresholds() {
        let oracle = SimilarityOracle::default();
        let body = "int a;\nint b;\nint c;\nreturn a;\n";
        assert_eq!(oracle.classify(body, body).await, OracleAnswer::Match);
        assert_eq!(
            oracle.classify("x();\ny();\n", body).await,
            OracleAnswer::NoMatch
        );
        // one shared line out of five: 0.4
        let partial = "int a;\nint z;\nint y;\n";
        assert_eq!(oracle.classify(partial, "int a;\nint q;\n").await, OracleAnswer::Unknown);
    }

    #[tokio::test]
    async fn fixed_answers_by_candidate() {
        let oracle = FixedOracle::new(OracleAnswer::Unknown).with_answer("a", OracleAnswer::Match);
        assert_eq!(oracle.classify("a", "b").await, OracleAnswer::Match);
        assert_eq!(oracle.classify("c", "b").await, OracleAnswer::Unknown);
    }

    #[test]
    fn answer_serializes_kebab() {
        let json = serde_json::to_string(&OracleAnswer::NoMatch).unwrap();
        assert_eq!(json, "\"no-match\"");
    }
}
