//! Script execution with a time bound.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use fixport_core::TriggerCapture;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::HarnessError;
use crate::stage::StageConfig;

/// Result of a stage execution.
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// stdout followed by stderr, as a trigger capture.
    pub fn capture(&self) -> TriggerCapture {
        let mut output = self.stdout.clone();
        output.push_str(&self.stderr);
        TriggerCapture {
            exit_code: self.exit_code,
            output,
            duration_ms: self.duration_ms,
        }
    }
}

/// Runs project scripts.
pub struct ScriptRunner;

impl ScriptRunner {
    /// Run `config.script` with `bash` in `cwd`.
    ///
    /// The script leads its own process group. Exceeding the timeout kills
    /// the whole group, so nothing it started keeps writing to `cwd`, and is
    /// an error, never retried.
    pub async fn execute(config: &StageConfig, cwd: &Path) -> Result<StageResult, HarnessError> {
        if !config.script.is_file() {
            return Err(HarnessError::MissingScript(config.script.clone()));
        }
        let start = Instant::now();
        debug!(stage = %config.name, script = %config.script.display(), "stage starting");

        let mut command = Command::new("bash");
        command
            .arg(&config.script)
            .current_dir(cwd)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| HarnessError::Spawn {
            script: config.script.display().to_string(),
            source,
        })?;
        let pid = child.id();

        let output = if config.timeout_secs > 0 {
            match tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            {
                Ok(output) => output?,
                Err(_) => {
                    kill_process_group(pid);
                    warn!(stage = %config.name, secs = config.timeout_secs, "stage timed out");
                    return Err(HarnessError::Timeout {
                        stage: config.name.clone(),
                        secs: config.timeout_secs,
                    });
                }
            }
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(stage = %config.name, exit_code, duration_ms, "stage finished");

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        })
    }
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(pid, %err, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
