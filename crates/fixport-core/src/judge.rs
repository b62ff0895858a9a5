//! Applicability judge ("prejudge").
//!
//! Evaluates a [`JudgeContext`] against an ordered [`JudgeRuleSet`]. Every
//! rule is a pure predicate producing at most one [`Finding`]; the first
//! finding in rule order decides the [`Verdict`].

use serde::{Deserialize, Serialize};

use crate::domain::change_unit::ChangeUnit;
use crate::domain::config_state::{ConfigState, GuardStatus};
use crate::domain::verdict::{Reason, Verdict};
use crate::probe::{already_fixed, AncestryReport, CodePath};

/// A single applicability rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JudgeRule {
    /// At least one unit with a net code change.
    RequireChangeUnits,
    /// No guard may have all of its symbols disabled.
    GuardsSatisfiable,
    /// Some modified pre-existing symbol must exist in the target.
    CodePathPresent,
    /// The target must not already carry the fix, and must carry the
    /// commits the fix repairs.
    AncestryConsistent,
    /// Every guard and code path must be decided.
    Determinate,
}

impl JudgeRule {
    pub fn reason(&self) -> Reason {
        match self {
            JudgeRule::RequireChangeUnits => Reason::FixCommitsMissing,
            JudgeRule::GuardsSatisfiable => Reason::ConfigNotEnabled,
            JudgeRule::CodePathPresent => Reason::CodePathAbsent,
            JudgeRule::AncestryConsistent => Reason::AncestryMismatch,
            JudgeRule::Determinate => Reason::Indeterminate,
        }
    }
}

/// Ordered rules; earlier rules take precedence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeRuleSet {
    pub rules: Vec<JudgeRule>,
}

impl JudgeRuleSet {
    /// All five rules in precedence order.
    pub fn standard() -> Self {
        Self {
            rules: vec![
                JudgeRule::RequireChangeUnits,
                JudgeRule::GuardsSatisfiable,
                JudgeRule::CodePathPresent,
                JudgeRule::AncestryConsistent,
                JudgeRule::Determinate,
            ],
        }
    }

    /// Add a rule to this set (builder pattern).
    pub fn with_rule(mut self, rule: JudgeRule) -> Self {
        self.rules.push(rule);
        self
    }
}

impl Default for JudgeRuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

/// Everything the rules look at.
pub struct JudgeContext<'a> {
    pub units: &'a [ChangeUnit],
    pub config: &'a ConfigState,
    /// One entry per unit, in unit order.
    pub code_paths: &'a [CodePath],
    pub ancestry: &'a AncestryReport,
}

/// A rule that fired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub rule: JudgeRule,
    pub reason: Reason,
    pub detail: String,
}

impl Finding {
    pub fn new(rule: JudgeRule, detail: impl Into<String>) -> Self {
        Self {
            rule,
            reason: rule.reason(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Judgement {
    pub verdict: Verdict,
    /// Every finding, in rule order.
    pub findings: Vec<Finding>,
}

impl Judgement {
    pub fn details(&self) -> Vec<String> {
        self.findings
            .iter()
            .map(|f| format!("{}: {}", f.reason, f.detail))
            .collect()
    }
}

/// Evaluate `ctx` against `rule_set`.
pub fn judge(rule_set: &JudgeRuleSet, ctx: &JudgeContext) -> Judgement {
    let findings: Vec<Finding> = rule_set
        .rules
        .iter()
        .filter_map(|rule| check_rule(*rule, ctx))
        .collect();
    let verdict = match findings.first() {
        Some(f) => Verdict::NotApplicable(f.reason),
        None => Verdict::Applicable,
    };
    Judgement { verdict, findings }
}

fn units_with_paths<'c>(
    ctx: &JudgeContext<'c>,
) -> impl Iterator<Item = (&'c ChangeUnit, &'c CodePath)> + 'c {
    ctx.units.iter().zip(ctx.code_paths.iter())
}

fn check_rule(rule: JudgeRule, ctx: &JudgeContext) -> Option<Finding> {
    match rule {
        JudgeRule::RequireChangeUnits => {
            if ctx.units.iter().any(ChangeUnit::has_net_change) {
                None
            } else {
                Some(Finding::new(rule, "fix carries no code change"))
            }
        }
        JudgeRule::GuardsSatisfiable => ctx.units.iter().find_map(|unit| {
            unit.guards()
                .iter()
                .find(|g| ctx.config.evaluate(g) == GuardStatus::Refuted)
                .map(|g| {
                    Finding::new(
                        rule,
                        format!("{} in {} needs {} (disabled)", unit.symbol(), unit.file(), g),
                    )
                })
        }),
        JudgeRule::CodePathPresent => {
            let existing: Vec<(&ChangeUnit, &CodePath)> = units_with_paths(ctx)
                .filter(|(u, _)| !u.is_addition())
                .collect();
            if !existing.is_empty() && existing.iter().all(|(_, p)| p.is_absent()) {
                let names: Vec<String> = existing.iter().map(|(u, _)| u.symbol().to_string()).collect();
                Some(Finding::new(
                    rule,
                    format!("not found in target: {}", names.join(", ")),
                ))
            } else {
                None
            }
        }
        JudgeRule::AncestryConsistent => {
            if ctx.ancestry.fix_already_merged() {
                return Some(Finding::new(rule, "fix commit is already in the target history"));
            }
            let mut comparable = units_with_paths(ctx).filter(|(_, p)| p.site().is_some()).peekable();
            if comparable.peek().is_some()
                && units_with_paths(ctx).all(|(u, p)| already_fixed(u, p))
            {
                return Some(Finding::new(rule, "target already contains the fixed code"));
            }
            ctx.ancestry.missing_introducer().map(|hash| {
                Finding::new(rule, format!("introducing commit {hash} is not in the target"))
            })
        }
        JudgeRule::Determinate => {
            for unit in ctx.units {
                if let Some(g) = unit
                    .guards()
                    .iter()
                    .find(|g| ctx.config.evaluate(g) == GuardStatus::Undetermined)
                {
                    return Some(Finding::new(
                        rule,
                        format!("state of {} is unknown for {}", g, unit.symbol()),
                    ));
                }
            }
            units_with_paths(ctx)
                .find(|(_, p)| p.is_unconfirmed())
                .map(|(u, _)| {
                    Finding::new(rule, format!("could not confirm {} in target", u.symbol()))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::change_unit::{EnclosingSymbol, Guard, SymbolKind};
    use crate::domain::config_state::SymbolState;
    use crate::probe::{CommitPresence, TargetSite};

    fn unit(guard: Option<&str>) -> ChangeUnit {
        let u = ChangeUnit::new(
            "net/foo.c",
            EnclosingSymbol::new("foo_recv", SymbolKind::Function),
            "int foo_recv(void)\n{\n\treturn 0;\n}\n",
            "int foo_recv(void)\n{\n\treturn 1;\n}\n",
        );
        match guard {
            Some(g) => u.with_guards(vec![Guard::single(g)]),
            None => u,
        }
    }

    fn present(text: &str) -> CodePath {
        CodePath::Present(TargetSite {
            file: "net/foo.c".to_string(),
            symbol: EnclosingSymbol::new("foo_recv", SymbolKind::Function),
            text: text.to_string(),
            similarity: 1.0,
        })
    }

    fn verdict(
        units: &[ChangeUnit],
        config: &ConfigState,
        paths: &[CodePath],
        ancestry: &AncestryReport,
    ) -> Judgement {
        let ctx = JudgeContext {
            units,
            config,
            code_paths: paths,
            ancestry,
        };
        judge(&JudgeRuleSet::standard(), &ctx)
    }

    fn enabled(sym: &str) -> ConfigState {
        [(sym.to_string(), SymbolState::Enabled)].into_iter().collect()
    }

    // ── RequireChangeUnits ──────────────────────────────────────────────

    #[test]
    fn no_units_means_fix_commits_missing() {
        let j = verdict(&[], &ConfigState::new(), &[], &AncestryReport::default());
        assert_eq!(j.verdict, Verdict::NotApplicable(Reason::FixCommitsMissing));
    }

    #[test]
    fn whitespace_only_change_is_no_net_change() {
        let u = ChangeUnit::new(
            "a.c",
            EnclosingSymbol::new("f", SymbolKind::Function),
            "int f(void)\n{\n\treturn 0;\n}\n",
            "int f(void)\n{\n    return 0;\n}\n",
        );
        let j = verdict(&[u], &ConfigState::new(), &[CodePath::Absent], &AncestryReport::default());
        assert_eq!(j.verdict.reason(), Some(Reason::FixCommitsMissing));
    }

    // ── GuardsSatisfiable ───────────────────────────────────────────────

    #[test]
    fn disabled_guard_wins_over_later_rules() {
        let config: ConfigState = [("CONFIG_FOO".to_string(), SymbolState::Disabled)]
            .into_iter()
            .collect();
        let j = verdict(
            &[unit(Some("CONFIG_FOO"))],
            &config,
            &[CodePath::Absent],
            &AncestryReport::default(),
        );
        assert_eq!(j.verdict, Verdict::NotApplicable(Reason::ConfigNotEnabled));
        // code path absent also fired, but ranks lower
        assert_eq!(j.findings.len(), 2);
        assert_eq!(j.findings[1].rule, JudgeRule::CodePathPresent);
    }

    #[test]
    fn disjunction_needs_every_symbol_disabled() {
        let config: ConfigState = [
            ("CONFIG_A".to_string(), SymbolState::Disabled),
            ("CONFIG_B".to_string(), SymbolState::Enabled),
        ]
        .into_iter()
        .collect();
        let u = unit(None).with_guards(Guard::any_of(["CONFIG_A", "CONFIG_B"]).into_iter().collect());
        let j = verdict(&[u.clone()], &config, &[present(u.original())], &AncestryReport::default());
        assert!(j.verdict.is_applicable());
    }

    // ── CodePathPresent ─────────────────────────────────────────────────

    #[test]
    fn all_paths_absent() {
        let j = verdict(
            &[unit(Some("CONFIG_FOO"))],
            &enabled("CONFIG_FOO"),
            &[CodePath::Absent],
            &AncestryReport::default(),
        );
        assert_eq!(j.verdict.reason(), Some(Reason::CodePathAbsent));
    }

    #[test]
    fn partial_absence_is_still_applicable() {
        let units = [unit(None), unit(None)];
        let paths = [present(units[0].original()), CodePath::Absent];
        let j = verdict(&units, &ConfigState::new(), &paths, &AncestryReport::default());
        assert!(j.verdict.is_applicable());
    }

    #[test]
    fn pure_additions_need_no_code_path() {
        let u = ChangeUnit::new(
            "a.c",
            EnclosingSymbol::new("g", SymbolKind::Function),
            "",
            "int g(void)\n{\n\treturn 0;\n}\n",
        );
        let j = verdict(&[u], &ConfigState::new(), &[CodePath::Added], &AncestryReport::default());
        assert!(j.verdict.is_applicable());
    }

    // ── AncestryConsistent ──────────────────────────────────────────────

    #[test]
    fn merged_fix_is_ancestry_mismatch() {
        let u = unit(None);
        let ancestry = AncestryReport {
            fix_in_target: Some(true),
            introducing: vec![],
        };
        let j = verdict(&[u.clone()], &ConfigState::new(), &[present(u.original())], &ancestry);
        assert_eq!(j.verdict.reason(), Some(Reason::AncestryMismatch));
    }

    #[test]
    fn target_with_fixed_body_is_ancestry_mismatch() {
        let u = unit(None);
        let j = verdict(
            &[u.clone()],
            &ConfigState::new(),
            &[present(u.modified())],
            &AncestryReport::default(),
        );
        assert_eq!(j.verdict.reason(), Some(Reason::AncestryMismatch));
    }

    #[test]
    fn missing_introducer_is_ancestry_mismatch() {
        let u = unit(None);
        let ancestry = AncestryReport {
            fix_in_target: Some(false),
            introducing: vec![CommitPresence {
                hash: "abcdef1".to_string(),
                present: Some(false),
                reachable: Some(false),
            }],
        };
        let j = verdict(&[u.clone()], &ConfigState::new(), &[present(u.original())], &ancestry);
        assert_eq!(j.verdict.reason(), Some(Reason::AncestryMismatch));
        assert!(j.findings[0].detail.contains("abcdef1"));
    }

    // ── Determinate ─────────────────────────────────────────────────────

    #[test]
    fn unknown_guard_is_indeterminate() {
        let u = unit(Some("CONFIG_FOO"));
        let j = verdict(
            &[u.clone()],
            &ConfigState::new(),
            &[present(u.original())],
            &AncestryReport::default(),
        );
        assert_eq!(j.verdict.reason(), Some(Reason::Indeterminate));
    }

    #[test]
    fn unconfirmed_candidate_is_indeterminate() {
        let u = unit(None);
        let site = TargetSite {
            file: "net/foo.c".to_string(),
            symbol: EnclosingSymbol::new("foo_rx", SymbolKind::Function),
            text: String::new(),
            similarity: 0.4,
        };
        let j = verdict(
            &[u],
            &ConfigState::new(),
            &[CodePath::Unconfirmed { candidate: site }],
            &AncestryReport::default(),
        );
        assert_eq!(j.verdict.reason(), Some(Reason::Indeterminate));
    }

    // ── Applicable ──────────────────────────────────────────────────────

    #[test]
    fn enabled_and_present_is_applicable() {
        let u = unit(Some("CONFIG_FOO"));
        let j = verdict(
            &[u.clone()],
            &enabled("CONFIG_FOO"),
            &[present(u.original())],
            &AncestryReport::default(),
        );
        assert_eq!(j.verdict, Verdict::Applicable);
        assert!(j.findings.is_empty());
    }

    #[test]
    fn judgement_is_deterministic() {
        let u = unit(Some("CONFIG_FOO"));
        let paths = [present(u.original())];
        let config = enabled("CONFIG_FOO");
        let a = verdict(&[u.clone()], &config, &paths, &AncestryReport::default());
        let b = verdict(&[u], &config, &paths, &AncestryReport::default());
        assert_eq!(a, b);
    }

    #[test]
    fn empty_rule_set_is_applicable() {
        let ctx = JudgeContext {
            units: &[],
            config: &ConfigState::new(),
            code_paths: &[],
            ancestry: &AncestryReport::default(),
        };
        let j = judge(&JudgeRuleSet { rules: vec![] }, &ctx);
        assert!(j.verdict.is_applicable());
    }
}
