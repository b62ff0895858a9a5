//! Kernel-style `.config` manifests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::config_state::SymbolState;
use crate::domain::error::Result;
use crate::source_tree::walk_files;

/// Directory of per-architecture configs inside a target tree.
pub const CONFIG_DATA_DIR: &str = "config_data";

/// One parsed build configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigManifest {
    name: String,
    /// symbol -> raw value; `None` for `# CONFIG_X is not set`
    entries: HashMap<String, Option<String>>,
}

impl ConfigManifest {
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix("# ") {
                if let Some(symbol) = rest.strip_suffix(" is not set") {
                    if symbol.starts_with("CONFIG_") {
                        entries.insert(symbol.to_string(), None);
                    }
                }
                continue;
            }
            if let Some((symbol, value)) = line.split_once('=') {
                let symbol = symbol.trim();
                if symbol.starts_with("CONFIG_") {
                    entries.insert(symbol.to_string(), Some(value.trim().to_string()));
                }
            }
        }
        Self {
            name: name.into(),
            entries,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::parse(
            path.display().to_string(),
            &String::from_utf8_lossy(&bytes),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// State of `symbol` in this manifest; `None` when it is not mentioned.
    pub fn lookup(&self, symbol: &str) -> Option<SymbolState> {
        match self.entries.get(symbol)? {
            None => Some(SymbolState::Disabled),
            Some(v) if v == "n" || v.is_empty() => Some(SymbolState::Disabled),
            Some(_) => Some(SymbolState::Enabled),
        }
    }
}

/// Every manifest describing one target.
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    manifests: Vec<ConfigManifest>,
}

impl ManifestSet {
    pub fn new(manifests: Vec<ConfigManifest>) -> Self {
        Self { manifests }
    }

    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let manifests = paths
            .iter()
            .map(|p| ConfigManifest::load(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { manifests })
    }

    /// `.config` at the root of `target` plus every file under `config_data/`.
    pub fn discover(target: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        let dot_config = target.join(".config");
        if dot_config.is_file() {
            paths.push(dot_config);
        }
        let data_dir = target.join(CONFIG_DATA_DIR);
        if data_dir.is_dir() {
            paths.extend(walk_files(&data_dir, &|_| true)?);
        }
        Self::load(&paths)
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Enabled in any manifest wins; disabled requires every mention to
    /// disable it; no mention at all is unknown.
    pub fn resolve(&self, symbol: &str) -> SymbolState {
        let mut mentioned = false;
        for m in &self.manifests {
            match m.lookup(symbol) {
                Some(SymbolState::Enabled) => return SymbolState::Enabled,
                Some(_) => mentioned = true,
                None => {}
            }
        }
        if mentioned {
            SymbolState::Disabled
        } else {
            SymbolState::Unknown
        }
    }
}
