//! Harness stages and their configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default build timeout in seconds.
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 3600;
/// Default trigger timeout in seconds.
pub const DEFAULT_POC_TIMEOUT_SECS: u64 = 600;

/// Scripts a project supplies in its scripts directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectScript {
    /// build.sh
    Build,

    /// poc.sh
    Poc,

    /// test.sh (optional)
    Test,
}

impl ProjectScript {
    pub fn name(&self) -> &'static str {
        match self {
            ProjectScript::Build => "build",
            ProjectScript::Poc => "poc",
            ProjectScript::Test => "test",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ProjectScript::Build => "build.sh",
            ProjectScript::Poc => "poc.sh",
            ProjectScript::Test => "test.sh",
        }
    }

    pub fn is_required(&self) -> bool {
        !matches!(self, ProjectScript::Test)
    }
}

/// One concrete script invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name, e.g. `pre-patch build`.
    pub name: String,

    /// Script run with `bash`.
    pub script: PathBuf,

    /// Timeout in seconds; 0 disables the bound.
    pub timeout_secs: u64,

    /// Extra environment for the script.
    pub env: Vec<(String, String)>,
}

impl StageConfig {
    pub fn for_script(
        script: ProjectScript,
        scripts_dir: &Path,
        name: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            name: name.into(),
            script: scripts_dir.join(script.file_name()),
            timeout_secs,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_names() {
        assert_eq!(ProjectScript::Build.file_name(), "build.sh");
        assert_eq!(ProjectScript::Poc.name(), "poc");
        assert!(ProjectScript::Poc.is_required());
        assert!(!ProjectScript::Test.is_required());
    }

    #[test]
    fn test_stage_config_for_script() {
        let config = StageConfig::for_script(
            ProjectScript::Build,
            Path::new("/scripts"),
            "pre-patch build",
            DEFAULT_BUILD_TIMEOUT_SECS,
        )
        .with_env("FIXPORT_SANITIZER", "address");
        assert_eq!(config.script, PathBuf::from("/scripts/build.sh"));
        assert_eq!(config.timeout_secs, 3600);
        assert_eq!(config.env, vec![("FIXPORT_SANITIZER".into(), "address".into())]);
    }
}
