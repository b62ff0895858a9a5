//! Resolved enablement of build-time condition symbols.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::change_unit::Guard;

/// Tri-state resolution of a single condition symbol.
///
/// `Unknown` is never folded into `Disabled`: a symbol the resolver could not
/// find says nothing about whether the code is built.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SymbolState {
    Enabled,
    Disabled,
    Unknown,
}

/// How a guard evaluates against a [`ConfigState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStatus {
    /// At least one alternative is enabled.
    Satisfied,
    /// Every alternative is disabled.
    Refuted,
    /// Nothing enabled, but at least one alternative is unknown.
    Undetermined,
}

/// Mapping from condition symbol to its resolved state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigState {
    states: BTreeMap<String, SymbolState>,
}

impl ConfigState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, state: SymbolState) {
        self.states.insert(symbol.into(), state);
    }

    /// State of `symbol`; unresolved symbols read as `Unknown`.
    pub fn get(&self, symbol: &str) -> SymbolState {
        self.states
            .get(symbol)
            .copied()
            .unwrap_or(SymbolState::Unknown)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SymbolState)> {
        self.states.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn evaluate(&self, guard: &Guard) -> GuardStatus {
        let mut any_unknown = false;
        for symbol in guard.symbols() {
            match self.get(symbol) {
                SymbolState::Enabled => return GuardStatus::Satisfied,
                SymbolState::Unknown => any_unknown = true,
                SymbolState::Disabled => {}
            }
        }
        if any_unknown {
            GuardStatus::Undetermined
        } else {
            GuardStatus::Refuted
        }
    }
}

impl FromIterator<(String, SymbolState)> for ConfigState {
    fn from_iter<T: IntoIterator<Item = (String, SymbolState)>>(iter: T) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}
