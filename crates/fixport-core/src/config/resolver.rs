//! Config Resolver: condition symbols -> enabled / disabled / unknown.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::debug;

use crate::config::kbuild::arch_symbol;
use crate::config::kconfig::KconfigIndex;
use crate::config::manifest::ManifestSet;
use crate::domain::config_state::{ConfigState, SymbolState};
use crate::domain::error::Result;

/// Architectures whose selector symbol every manifest for that arch defines.
const KNOWN_ARCHES: &[&str] = &[
    "x86", "arm64", "arm", "riscv", "powerpc", "loongarch", "sw_64", "s390", "mips",
];

/// Resolves condition symbols against a target's build configuration.
///
/// Resolution is a pure function of the requested symbols and the target's
/// manifests (plus its Kconfig files for symbols no manifest mentions).
#[derive(Debug)]
pub struct ConfigResolver {
    manifests: ManifestSet,
    kconfig_root: Option<PathBuf>,
    kconfig: OnceLock<KconfigIndex>,
}

impl ConfigResolver {
    pub fn new(manifests: ManifestSet) -> Self {
        Self {
            manifests,
            kconfig_root: None,
            kconfig: OnceLock::new(),
        }
    }

    /// Discover manifests inside `target` and use its Kconfig files for
    /// symbols they do not mention.
    pub fn for_target(target: &Path) -> Result<Self> {
        let manifests = ManifestSet::discover(target)?;
        debug!(count = manifests.len(), target = %target.display(), "config manifests discovered");
        Ok(Self::new(manifests).with_kconfig_root(target))
    }

    /// Use an explicit manifest list.
    pub fn with_manifests(target: &Path, paths: &[PathBuf]) -> Result<Self> {
        Ok(Self::new(ManifestSet::load(paths)?).with_kconfig_root(target))
    }

    pub fn with_kconfig_root(mut self, root: &Path) -> Self {
        self.kconfig_root = Some(root.to_path_buf());
        self
    }

    pub fn manifests(&self) -> &ManifestSet {
        &self.manifests
    }

    fn kconfig(&self) -> Option<&KconfigIndex> {
        let root = self.kconfig_root.as_ref()?;
        Some(self.kconfig.get_or_init(|| {
            KconfigIndex::load(root).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "kconfig index unavailable");
                KconfigIndex::default()
            })
        }))
    }

    fn is_arch_symbol(symbol: &str) -> bool {
        KNOWN_ARCHES.iter().any(|a| arch_symbol(a) == symbol)
    }

    pub fn resolve_one(&self, symbol: &str) -> SymbolState {
        match self.manifests.resolve(symbol) {
            SymbolState::Unknown => {}
            known => return known,
        }
        // a config for some arch always selects that arch's symbol
        if !self.manifests.is_empty() && Self::is_arch_symbol(symbol) {
            return SymbolState::Disabled;
        }
        match self.kconfig() {
            Some(index) => index.resolve(symbol, &self.manifests),
            None => SymbolState::Unknown,
        }
    }

    pub fn resolve(&self, symbols: &BTreeSet<String>) -> ConfigState {
        let state: ConfigState = symbols
            .iter()
            .map(|s| (s.clone(), self.resolve_one(s)))
            .collect();
        debug!(
            resolved = state.len(),
            unknown = state.iter().filter(|(_, v)| *v == SymbolState::Unknown).count(),
            "config symbols resolved"
        );
        state
    }
}
