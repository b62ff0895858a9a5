//! Build-configuration reasoning: manifests, Kconfig, Kbuild.

pub mod kbuild;
pub mod kconfig;
pub mod manifest;
pub mod resolver;

pub use kbuild::{arch_guard, arch_symbol, parse_makefile, Makefile, MAX_KBUILD_DEPTH};
pub use kconfig::KconfigIndex;
pub use manifest::{ConfigManifest, ManifestSet, CONFIG_DATA_DIR};
pub use resolver::ConfigResolver;
