//! Prejudge: extract → resolve → probe → judge.

use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::config::ConfigResolver;
use crate::domain::change_unit::ChangeUnit;
use crate::domain::commit::CommitRef;
use crate::domain::config_state::ConfigState;
use crate::domain::error::Result;
use crate::domain::verdict::Verdict;
use crate::extract::{condition_symbols, DiffExtractor, Extraction};
use crate::judge::{judge, Finding, JudgeContext, JudgeRule, JudgeRuleSet, Judgement};
use crate::oracle::SymbolOracle;
use crate::probe::{AncestryProbe, AncestryReport, CodePath, CodePathProbe};
use crate::source_tree::SourceTree;
use crate::vcs::Vcs;

/// Everything the prejudge stage learned about one fix.
#[derive(Debug, Clone, Serialize)]
pub struct PrejudgeReport {
    pub fix: CommitRef,
    /// Empty when extraction failed.
    pub units: Vec<ChangeUnit>,
    pub config: ConfigState,
    pub code_paths: Vec<CodePath>,
    pub ancestry: AncestryReport,
    pub judgement: Judgement,
}

impl PrejudgeReport {
    pub fn verdict(&self) -> Verdict {
        self.judgement.verdict
    }
}

/// Collaborators of the prejudge stage.
pub struct Prejudge<'a> {
    mainline: &'a dyn Vcs,
    target_tree: &'a dyn SourceTree,
    target_vcs: Option<&'a dyn Vcs>,
    target_rev: Option<String>,
    resolver: &'a ConfigResolver,
    oracle: &'a dyn SymbolOracle,
    rules: JudgeRuleSet,
}

impl<'a> Prejudge<'a> {
    pub fn new(
        mainline: &'a dyn Vcs,
        target_tree: &'a dyn SourceTree,
        resolver: &'a ConfigResolver,
        oracle: &'a dyn SymbolOracle,
    ) -> Self {
        Self {
            mainline,
            target_tree,
            target_vcs: None,
            target_rev: None,
            resolver,
            oracle,
            rules: JudgeRuleSet::standard(),
        }
    }

    /// Enable ancestry checks against the target repository.
    pub fn with_target_vcs(mut self, vcs: &'a dyn Vcs, release: Option<&str>) -> Self {
        self.target_vcs = Some(vcs);
        self.target_rev = release.map(str::to_string);
        self
    }

    pub fn with_rules(mut self, rules: JudgeRuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Judge `fix` against its first parent.
    pub async fn run(&self, fix: &CommitRef) -> Result<PrejudgeReport> {
        self.run_from(fix, None).await
    }

    /// Judge the change `parent..fix`; the first parent when `parent` is
    /// `None`.
    pub async fn run_from(&self, fix: &CommitRef, parent: Option<&CommitRef>) -> Result<PrejudgeReport> {
        let span = info_span!("prejudge", fix = %fix.short());
        async {
            let extractor = DiffExtractor::new(self.mainline);
            let extraction = match parent {
                Some(parent) => extractor.extract(fix, parent),
                None => extractor.extract_fix(fix),
            };
            match extraction {
                Ok(extraction) => self.judge_extraction(extraction).await,
                Err(e) => match e.verdict_reason() {
                    Some(reason) => {
                        warn!(error = %e, "extraction failed");
                        let finding = Finding::new(JudgeRule::RequireChangeUnits, e.to_string());
                        info!(verdict = %reason, "prejudge decided");
                        Ok(PrejudgeReport {
                            fix: fix.clone(),
                            units: Vec::new(),
                            config: ConfigState::new(),
                            code_paths: Vec::new(),
                            ancestry: AncestryReport::default(),
                            judgement: Judgement {
                                verdict: Verdict::NotApplicable(reason),
                                findings: vec![finding],
                            },
                        })
                    }
                    None => Err(e),
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn judge_extraction(&self, extraction: Extraction) -> Result<PrejudgeReport> {
        let Extraction {
            fix, message, units, ..
        } = extraction;

        let config = self.resolver.resolve(&condition_symbols(&units));
        let code_paths = CodePathProbe::new(self.target_tree, self.oracle)
            .probe_all(&units)
            .await?;
        let ancestry = AncestryProbe::new(self.target_vcs, self.target_rev.as_deref())
            .probe(&fix, &message);

        let judgement = judge(
            &self.rules,
            &JudgeContext {
                units: &units,
                config: &config,
                code_paths: &code_paths,
                ancestry: &ancestry,
            },
        );
        match judgement.verdict {
            Verdict::Applicable => info!(units = units.len(), "prejudge decided: applicable"),
            Verdict::NotApplicable(reason) => info!(
                verdict = %reason,
                findings = judgement.findings.len(),
                "prejudge decided"
            ),
        }

        Ok(PrejudgeReport {
            fix,
            units,
            config,
            code_paths,
            ancestry,
            judgement,
        })
    }
}
