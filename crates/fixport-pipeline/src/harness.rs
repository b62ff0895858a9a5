//! Validation harness: reproduce, patch, rebuild, re-run.
//!
//! A backport passes when the trigger's output carries the expected
//! diagnostic before the patch and no longer carries it after. Every
//! harness failure (missing scripts, build errors, timeouts, conflicts)
//! is recorded as an inconclusive condition; nothing is retried.

use std::path::{Path, PathBuf};

use fixport_core::{
    AppliedPatch, BackportPatch, TriggerCapture, ValidationCondition, ValidationResult,
};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::error::HarnessError;
use crate::runner::{ScriptRunner, StageResult};
use crate::sanitizer::Sanitizer;
use crate::stage::{ProjectScript, StageConfig, DEFAULT_BUILD_TIMEOUT_SECS, DEFAULT_POC_TIMEOUT_SECS};
use crate::workcopy::WorkingCopy;

pub const SANITIZER_ENV: &str = "FIXPORT_SANITIZER";
pub const POC_INPUT_ENV: &str = "FIXPORT_POC_INPUT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Directory holding `build.sh`, `poc.sh` and optionally `test.sh`.
    pub scripts_dir: PathBuf,
    pub sanitizer: Option<Sanitizer>,
    /// Diagnostic substring; overrides the sanitizer's default signature.
    pub expected: Option<String>,
    pub poc_input: Option<PathBuf>,
    pub build_timeout_secs: u64,
    pub poc_timeout_secs: u64,
    /// Build in a scratch copy instead of the target tree.
    pub isolate: bool,
}

impl HarnessConfig {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            sanitizer: None,
            expected: None,
            poc_input: None,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            poc_timeout_secs: DEFAULT_POC_TIMEOUT_SECS,
            isolate: false,
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn isolated(mut self) -> Self {
        self.isolate = true;
        self
    }

    /// The substring pass/fail is decided on.
    pub fn signature(&self) -> Option<String> {
        self.expected
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.sanitizer.map(|s| s.signature().to_string()))
    }
}

/// Runs the reproduce / patch / re-run cycle against a project.
pub struct ValidationHarness {
    config: HarnessConfig,
}

impl ValidationHarness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Validate `patch` against the project at `target`.
    ///
    /// The target tree is left as it was found.
    pub async fn validate(&self, target: &Path, patch: &BackportPatch) -> ValidationResult {
        let span = info_span!("validate", target = %target.display());
        async {
            let Some(signature) = self.config.signature() else {
                warn!("no expected diagnostic or sanitizer configured");
                return ValidationResult::inconclusive(ValidationCondition::NoSignature);
            };

            let mut session = Session::default();
            let result = match self.cycle(target, patch, &signature, &mut session).await {
                Ok(condition) => condition,
                Err(e) => {
                    warn!(error = %e, "validation inconclusive");
                    e.condition()
                }
            };
            info!(condition = ?result, "validation finished");
            ValidationResult::new(result, Some(signature), session.pre, session.post)
        }
        .instrument(span)
        .await
    }

    async fn cycle(
        &self,
        target: &Path,
        patch: &BackportPatch,
        signature: &str,
        session: &mut Session,
    ) -> Result<ValidationCondition, HarnessError> {
        let scripts_dir = absolute(&self.config.scripts_dir)?;
        for script in [ProjectScript::Build, ProjectScript::Poc] {
            let path = scripts_dir.join(script.file_name());
            if !path.is_file() {
                return Err(HarnessError::MissingScript(path));
            }
        }

        let workdir = WorkingCopy::prepare(target, self.config.isolate)?;
        let cwd = workdir.path();

        self.build(&scripts_dir, cwd, "pre-patch").await?;
        let pre = self.trigger(&scripts_dir, cwd, "pre-patch").await?;
        let reproduced = pre.contains(signature);
        session.pre = Some(pre);
        if !reproduced {
            return Ok(ValidationCondition::PocNotReproducing);
        }

        let applied = patch
            .apply_to(cwd)
            .map_err(|e| HarnessError::PatchConflict(e.to_string()))?;
        info!(files = patch.files().len(), "patch applied");

        let outcome = self.patched(&scripts_dir, cwd, signature, session).await;
        restore(&workdir, &applied);
        outcome
    }

    async fn patched(
        &self,
        scripts_dir: &Path,
        cwd: &Path,
        signature: &str,
        session: &mut Session,
    ) -> Result<ValidationCondition, HarnessError> {
        self.build(scripts_dir, cwd, "post-patch").await?;

        let test = StageConfig::for_script(
            ProjectScript::Test,
            scripts_dir,
            "test",
            self.config.build_timeout_secs,
        );
        if test.script.is_file() {
            let result = ScriptRunner::execute(&self.stage_env(test), cwd).await?;
            if !result.passed() {
                return Err(HarnessError::Test(result.exit_code));
            }
        }

        let post = self.trigger(scripts_dir, cwd, "post-patch").await?;
        let still = post.contains(signature);
        session.post = Some(post);
        Ok(if still {
            ValidationCondition::StillReproduces
        } else {
            ValidationCondition::Fixed
        })
    }

    async fn build(&self, scripts_dir: &Path, cwd: &Path, phase: &str) -> Result<StageResult, HarnessError> {
        let config = StageConfig::for_script(
            ProjectScript::Build,
            scripts_dir,
            format!("{phase} build"),
            self.config.build_timeout_secs,
        );
        let result = ScriptRunner::execute(&self.stage_env(config), cwd).await?;
        if !result.passed() {
            return Err(HarnessError::Build {
                phase: phase.to_string(),
                exit_code: result.exit_code,
            });
        }
        info!(phase, duration_ms = result.duration_ms, "build ok");
        Ok(result)
    }

    /// A trigger exiting non-zero is expected when the bug fires; only its
    /// output matters.
    async fn trigger(&self, scripts_dir: &Path, cwd: &Path, phase: &str) -> Result<TriggerCapture, HarnessError> {
        let config = StageConfig::for_script(
            ProjectScript::Poc,
            scripts_dir,
            format!("{phase} poc"),
            self.config.poc_timeout_secs,
        );
        let result = ScriptRunner::execute(&self.stage_env(config), cwd).await?;
        info!(phase, exit_code = result.exit_code, "trigger ran");
        Ok(result.capture())
    }

    fn stage_env(&self, mut config: StageConfig) -> StageConfig {
        if let Some(sanitizer) = self.config.sanitizer {
            config = config.with_env(SANITIZER_ENV, sanitizer.id());
        }
        if let Some(input) = &self.config.poc_input {
            config = config.with_env(POC_INPUT_ENV, input.display().to_string());
        }
        config
    }
}

#[derive(Default)]
struct Session {
    pre: Option<TriggerCapture>,
    post: Option<TriggerCapture>,
}

/// In-place runs put the target back; scratch copies are simply dropped.
fn restore(workdir: &WorkingCopy, applied: &AppliedPatch) {
    if workdir.is_isolated() {
        return;
    }
    if let Err(e) = applied.revert() {
        warn!(error = %e, "failed to revert patch in target tree");
    }
}

fn absolute(path: &Path) -> Result<PathBuf, HarnessError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixport_core::{EditPoint, SymbolEdit, SymbolKind, ValidationStatus};

    const SOURCE: &str = "int f(void)\n{\n\treturn 0;\n}\n";

    fn patch() -> BackportPatch {
        BackportPatch::new(vec![SymbolEdit {
            file: "f.c".into(),
            point: EditPoint::Symbol { name: "f".into() },
            kind: SymbolKind::Function,
            before: SOURCE.into(),
            after: "int f(void)\n{\n\treturn 1;\n}\n".into(),
        }])
        .unwrap()
    }

    struct Project {
        target: tempfile::TempDir,
        scripts: tempfile::TempDir,
    }

    /// `poc.sh` prints the leak report while f.c still returns 0.
    fn project(build: &str) -> Project {
        let target = tempfile::tempdir().unwrap();
        let scripts = tempfile::tempdir().unwrap();
        std::fs::write(target.path().join("f.c"), SOURCE).unwrap();
        std::fs::write(scripts.path().join("build.sh"), build).unwrap();
        std::fs::write(
            scripts.path().join("poc.sh"),
            "if grep -q 'return 0' f.c; then echo '==1==ERROR: LeakSanitizer: detected memory leaks' >&2; exit 1; fi\necho clean\n",
        )
        .unwrap();
        Project { target, scripts }
    }

    fn harness(p: &Project) -> ValidationHarness {
        ValidationHarness::new(HarnessConfig::new(p.scripts.path()).with_sanitizer(Sanitizer::Leak))
    }

    // ── Outcomes ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn fixed_when_diagnostic_disappears() {
        let p = project("exit 0\n");
        let result = harness(&p).validate(p.target.path(), &patch()).await;

        assert_eq!(result.condition(), &ValidationCondition::Fixed);
        assert!(result.passed());
        assert_eq!(result.signature(), Some("ERROR: LeakSanitizer"));
        assert!(result.pre_patch().unwrap().contains("ERROR: LeakSanitizer"));
        assert!(!result.post_patch().unwrap().contains("ERROR: LeakSanitizer"));

        // target restored
        let content = std::fs::read_to_string(p.target.path().join("f.c")).unwrap();
        assert_eq!(content, SOURCE);
    }

    #[tokio::test]
    async fn still_reproducing_fails() {
        let p = project("exit 0\n");
        let config = HarnessConfig::new(p.scripts.path()).with_expected("clean");
        // "clean" only shows after the patch: pre-patch does not reproduce
        let result = ValidationHarness::new(config)
            .validate(p.target.path(), &patch())
            .await;
        assert_eq!(result.condition(), &ValidationCondition::PocNotReproducing);

        std::fs::write(p.scripts.path().join("poc.sh"), "echo 'runtime error: overflow'\n").unwrap();
        let config = HarnessConfig::new(p.scripts.path()).with_sanitizer(Sanitizer::Undefined);
        let result = ValidationHarness::new(config)
            .validate(p.target.path(), &patch())
            .await;
        assert_eq!(result.condition(), &ValidationCondition::StillReproduces);
        assert_eq!(result.status(), ValidationStatus::Fail);
    }

    #[tokio::test]
    async fn no_signature_is_inconclusive() {
        let p = project("exit 0\n");
        let result = ValidationHarness::new(HarnessConfig::new(p.scripts.path()))
            .validate(p.target.path(), &patch())
            .await;
        assert_eq!(result.condition(), &ValidationCondition::NoSignature);
        assert!(result.pre_patch().is_none());
    }

    // ── Harness failures ────────────────────────────────────────────────

    #[tokio::test]
    async fn pre_patch_build_failure_is_inconclusive() {
        let p = project("exit 2\n");
        let result = harness(&p).validate(p.target.path(), &patch()).await;
        assert_eq!(
            result.condition(),
            &ValidationCondition::BuildFailure {
                phase: "pre-patch".into(),
                exit_code: 2
            }
        );
        assert_eq!(result.status(), ValidationStatus::Inconclusive);
    }

    #[tokio::test]
    async fn post_patch_build_failure_restores_target() {
        let p = project("grep -q 'return 1' f.c && exit 4\nexit 0\n");
        let result = harness(&p).validate(p.target.path(), &patch()).await;
        assert_eq!(
            result.condition(),
            &ValidationCondition::BuildFailure {
                phase: "post-patch".into(),
                exit_code: 4
            }
        );
        let content = std::fs::read_to_string(p.target.path().join("f.c")).unwrap();
        assert_eq!(content, SOURCE);
    }

    #[tokio::test]
    async fn failing_test_script_is_inconclusive() {
        let p = project("exit 0\n");
        std::fs::write(p.scripts.path().join("test.sh"), "exit 1\n").unwrap();
        let result = harness(&p).validate(p.target.path(), &patch()).await;
        assert_eq!(result.condition(), &ValidationCondition::TestFailure { exit_code: 1 });
    }

    #[tokio::test]
    async fn conflicting_patch_is_inconclusive() {
        let p = project("exit 0\n");
        std::fs::write(
            p.target.path().join("f.c"),
            "int g(void)\n{\n\treturn 0;\n}\n",
        )
        .unwrap();
        let result = harness(&p).validate(p.target.path(), &patch()).await;
        assert!(matches!(
            result.condition(),
            ValidationCondition::PatchConflict { .. }
        ));
    }

    #[tokio::test]
    async fn missing_scripts_are_inconclusive() {
        let p = project("exit 0\n");
        std::fs::remove_file(p.scripts.path().join("poc.sh")).unwrap();
        let result = harness(&p).validate(p.target.path(), &patch()).await;
        assert!(matches!(
            result.condition(),
            ValidationCondition::HarnessError { .. }
        ));
    }

    #[tokio::test]
    async fn trigger_timeout_is_recorded() {
        let p = project("exit 0\n");
        std::fs::write(p.scripts.path().join("poc.sh"), "sleep 5\n").unwrap();
        let mut config = HarnessConfig::new(p.scripts.path()).with_sanitizer(Sanitizer::Leak);
        config.poc_timeout_secs = 1;
        let result = ValidationHarness::new(config)
            .validate(p.target.path(), &patch())
            .await;
        assert_eq!(
            result.condition(),
            &ValidationCondition::Timeout {
                stage: "pre-patch poc".into(),
                secs: 1
            }
        );
    }

    #[tokio::test]
    async fn isolated_run_never_touches_target() {
        let p = project("grep -q 'return 1' f.c && touch patched-build\nexit 0\n");
        let config = HarnessConfig::new(p.scripts.path())
            .with_sanitizer(Sanitizer::Leak)
            .isolated();
        let result = ValidationHarness::new(config)
            .validate(p.target.path(), &patch())
            .await;
        assert!(result.passed());
        assert!(!p.target.path().join("patched-build").exists());
    }

    #[test]
    fn expected_overrides_sanitizer_default() {
        let config = HarnessConfig::new("/s")
            .with_sanitizer(Sanitizer::Address)
            .with_expected("KASAN: use-after-free");
        assert_eq!(config.signature().as_deref(), Some("KASAN: use-after-free"));
        let config = HarnessConfig::new("/s").with_sanitizer(Sanitizer::Address);
        assert_eq!(config.signature().as_deref(), Some("ERROR: AddressSanitizer"));
    }
}
