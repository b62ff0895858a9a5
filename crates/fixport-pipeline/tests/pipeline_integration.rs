//! Whole work items: prejudge, synthesis and validation against a real git
//! mainline and a drifted target tree.

mod common;

use std::sync::Arc;

use common::{make_mainline, make_scripts, make_target, run_git, write, AFTER, TARGET};
use fixport_core::{
    FixportError, OutcomeStage, Reason, SimilarityOracle, ValidationCondition, Verdict,
};
use fixport_pipeline::{HarnessConfig, Pipeline, PipelineConfig, Sanitizer, WorkItem};

fn pipeline(config: PipelineConfig) -> Pipeline {
    Pipeline::new(config, Arc::new(SimilarityOracle::default()))
}

// ── Prejudge ────────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_disabled_config() {
    let (mainline, fix) = make_mainline();
    let target = make_target("# CONFIG_FOO is not set\n");

    let record = pipeline(PipelineConfig::full())
        .run(&WorkItem::new(mainline.path(), target.path(), &fix))
        .await
        .unwrap();

    assert_eq!(record.outcome.verdict(), Verdict::NotApplicable(Reason::ConfigNotEnabled));
    assert_eq!(record.outcome.prejudge_result(), "false, config not enabled");
    assert!(record.outcome.patch().is_none());
    assert!(record.outcome.validation().is_none());
    assert!(!record.outcome.findings().is_empty());
}

#[tokio::test]
async fn scenario_unknown_commit() {
    let (mainline, _) = make_mainline();
    let target = make_target("CONFIG_FOO=y\n");

    let record = pipeline(PipelineConfig::full())
        .run(&WorkItem::new(mainline.path(), target.path(), "deadbeefdeadbeef"))
        .await
        .unwrap();
    assert_eq!(record.outcome.prejudge_result(), "false, fix commits missing");
}

#[tokio::test]
async fn prejudge_only_stops_at_verdict() {
    let (mainline, fix) = make_mainline();
    let target = make_target("CONFIG_FOO=y\n");

    let record = pipeline(PipelineConfig::prejudge_only())
        .run(&WorkItem::new(mainline.path(), target.path(), &fix))
        .await
        .unwrap();
    assert_eq!(record.outcome.prejudge_result(), "true, applicable");
    assert!(record.patch_diff.is_none());
}

// ── Backport and validation ─────────────────────────────────────────────

#[tokio::test]
async fn synthesized_without_harness() {
    let (mainline, fix) = make_mainline();
    let target = make_target("CONFIG_FOO=y\n");

    let record = pipeline(PipelineConfig::full())
        .run(&WorkItem::new(mainline.path(), target.path(), &fix))
        .await
        .unwrap();
    assert_eq!(record.outcome.prejudge_result(), "true, synthesized");
    assert!(record.patch_digest.as_ref().is_some_and(|d| d.len() == 64));

    let diff = record.patch_diff.unwrap();
    assert!(diff.contains("+++ b/drivers/net/foo/foo.c"));
    assert!(diff.contains("+\tif (len > sizeof(fd->buf))"));

    // synthesis alone never writes to the target
    let content = std::fs::read_to_string(target.path().join("drivers/net/foo/foo.c")).unwrap();
    assert_eq!(content, TARGET);
}

#[tokio::test]
async fn scenario_validated_with_leak_sanitizer() {
    let (mainline, fix) = make_mainline();
    let target = make_target("CONFIG_FOO=y\n");
    let scripts = make_scripts();

    let config = PipelineConfig::full()
        .with_harness(HarnessConfig::new(scripts.path()).with_sanitizer(Sanitizer::Leak));
    let record = pipeline(config)
        .run(&WorkItem::new(mainline.path(), target.path(), &fix))
        .await
        .unwrap();

    assert_eq!(record.outcome.stage(), &OutcomeStage::Validated);
    let validation = record.outcome.validation().unwrap();
    assert_eq!(validation.condition(), &ValidationCondition::Fixed, "{validation:?}");
    assert!(validation.pre_patch().unwrap().contains("ERROR: LeakSanitizer"));
    assert!(!validation.post_patch().unwrap().contains("ERROR: LeakSanitizer"));
    assert_eq!(record.outcome.prejudge_result(), "true, validated");

    let content = std::fs::read_to_string(target.path().join("drivers/net/foo/foo.c")).unwrap();
    assert_eq!(content, TARGET, "target restored after validation");
}

#[tokio::test]
async fn isolated_validation_reports_inconclusive_build() {
    let (mainline, fix) = make_mainline();
    let target = make_target("CONFIG_FOO=y\n");
    let scripts = make_scripts();

    // no sanitizer in the environment: build.sh refuses
    let config = PipelineConfig::full().with_harness(
        HarnessConfig::new(scripts.path())
            .with_expected("ERROR: LeakSanitizer")
            .isolated(),
    );
    let record = pipeline(config)
        .run(&WorkItem::new(mainline.path(), target.path(), &fix))
        .await
        .unwrap();
    assert_eq!(record.outcome.prejudge_result(), "true, validation inconclusive");
    assert_eq!(
        record.outcome.validation().unwrap().condition(),
        &ValidationCondition::BuildFailure {
            phase: "pre-patch".into(),
            exit_code: 9
        }
    );
}

// ── Target release inside the fix's own repository ──────────────────────

#[tokio::test]
async fn release_before_the_fix_is_judged_at_that_release() {
    let (repo, fix) = make_mainline();
    let release = run_git(repo.path(), &["rev-parse", "HEAD~1"]);
    // untracked, as a kernel .config usually is
    write(repo.path(), ".config", "CONFIG_FOO=y\n");
    let scripts = make_scripts();

    let config = PipelineConfig {
        target_release: Some(release.clone()),
        ..PipelineConfig::full()
            .with_harness(HarnessConfig::new(scripts.path()).with_sanitizer(Sanitizer::Leak))
    };
    let record = pipeline(config)
        .run(&WorkItem::new(repo.path(), repo.path(), &fix))
        .await
        .unwrap();

    assert_eq!(record.outcome.prejudge_result(), "true, validated");
    assert_eq!(record.target_rev.as_deref(), Some(release.as_str()));
    assert!(record
        .patch_diff
        .unwrap()
        .contains("+\tif (len > sizeof(dev->buf))"));

    // the checkout is gone and the working tree still holds the fix
    let worktrees = run_git(repo.path(), &["worktree", "list", "--porcelain"]);
    assert_eq!(worktrees.lines().filter(|l| l.starts_with("worktree ")).count(), 1);
    let content = std::fs::read_to_string(repo.path().join("drivers/net/foo/foo.c")).unwrap();
    assert_eq!(content, AFTER);
}

#[tokio::test]
async fn working_tree_at_the_fix_already_contains_it() {
    let (repo, fix) = make_mainline();
    write(repo.path(), ".config", "CONFIG_FOO=y\n");

    let record = pipeline(PipelineConfig::full())
        .run(&WorkItem::new(repo.path(), repo.path(), &fix))
        .await
        .unwrap();
    assert_eq!(record.outcome.verdict(), Verdict::NotApplicable(Reason::AncestryMismatch));
    assert!(record.target_rev.is_none());
}

#[tokio::test]
async fn unknown_release_is_an_error() {
    let (repo, fix) = make_mainline();
    let config = PipelineConfig {
        target_release: Some("v9.9".into()),
        ..PipelineConfig::full()
    };
    let err = pipeline(config)
        .run(&WorkItem::new(repo.path(), repo.path(), &fix))
        .await
        .unwrap_err();
    assert!(matches!(err, FixportError::CommitNotFound(_)), "{err}");
}

// ── Malformed input ─────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_hash_is_an_error() {
    let (mainline, _) = make_mainline();
    let target = make_target("CONFIG_FOO=y\n");
    let err = pipeline(PipelineConfig::full())
        .run(&WorkItem::new(mainline.path(), target.path(), "not-a-hash"))
        .await
        .unwrap_err();
    assert!(matches!(err, FixportError::InvalidCommitHash(_)));
}

#[tokio::test]
async fn missing_directories_are_errors() {
    let (mainline, fix) = make_mainline();
    let target = make_target("CONFIG_FOO=y\n");

    let err = pipeline(PipelineConfig::full())
        .run(&WorkItem::new(mainline.path(), "/no/such/fixport/target", &fix))
        .await
        .unwrap_err();
    assert!(matches!(err, FixportError::TargetDirMissing(_)));

    let err = pipeline(PipelineConfig::full())
        .run(&WorkItem::new(target.path(), target.path(), &fix))
        .await
        .unwrap_err();
    assert!(matches!(err, FixportError::MainlineDirMissing(_)));
}
