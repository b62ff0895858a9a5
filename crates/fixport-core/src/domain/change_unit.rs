//! Change units: the fix, split along symbol boundaries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of top-level construct a change lives in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolKind {
    Function,
    Struct,
    Union,
    Enum,
    Macro,
    Variable,
    /// Change outside any recognised symbol (includes, top-level declarations).
    FileScope,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Struct => "struct",
            SymbolKind::Union => "union",
            SymbolKind::Enum => "enum",
            SymbolKind::Macro => "macro",
            SymbolKind::Variable => "variable",
            SymbolKind::FileScope => "file-scope",
        }
    }
}

/// The symbol enclosing a change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnclosingSymbol {
    pub name: String,
    pub kind: SymbolKind,
}

impl EnclosingSymbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn file_scope() -> Self {
        Self::new("", SymbolKind::FileScope)
    }

    pub fn is_file_scope(&self) -> bool {
        self.kind == SymbolKind::FileScope
    }
}

impl fmt::Display for EnclosingSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_file_scope() {
            write!(f, "<file scope>")
        } else {
            write!(f, "{} {}", self.kind.as_str(), self.name)
        }
    }
}

/// A build-time condition: satisfied when any of its symbols is enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guard {
    any_of: BTreeSet<String>,
}

impl Guard {
    pub fn single(symbol: impl Into<String>) -> Self {
        Self {
            any_of: BTreeSet::from([symbol.into()]),
        }
    }

    /// Disjunction of `symbols`; `None` when there is nothing to require.
    pub fn any_of<I, S>(symbols: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let any_of: BTreeSet<String> = symbols.into_iter().map(Into::into).collect();
        if any_of.is_empty() {
            None
        } else {
            Some(Self { any_of })
        }
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.any_of.iter().map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.any_of.contains(symbol)
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.symbols().collect();
        write!(f, "{}", parts.join(" || "))
    }
}

/// Position of one raw diff hunk (1-based line numbers).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HunkSpan {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
}

/// One logical change of the fix, confined to a single enclosing symbol.
///
/// Built once by the extractor and never mutated afterwards; the builder
/// methods consume `self` so a unit cannot be altered once shared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeUnit {
    file: String,
    symbol: EnclosingSymbol,
    original: String,
    modified: String,
    guards: Vec<Guard>,
    hunks: Vec<HunkSpan>,
    anchor_after: Option<String>,
}

impl ChangeUnit {
    pub fn new(
        file: impl Into<String>,
        symbol: EnclosingSymbol,
        original: impl Into<String>,
        modified: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            symbol,
            original: original.into(),
            modified: modified.into(),
            guards: Vec::new(),
            hunks: Vec::new(),
            anchor_after: None,
        }
    }

    pub fn with_guards(mut self, guards: Vec<Guard>) -> Self {
        let mut seen = BTreeSet::new();
        self.guards = guards.into_iter().filter(|g| seen.insert(g.clone())).collect();
        self
    }

    pub fn with_hunks(mut self, hunks: Vec<HunkSpan>) -> Self {
        self.hunks = hunks;
        self
    }

    pub fn with_anchor(mut self, anchor: Option<String>) -> Self {
        self.anchor_after = anchor;
        self
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn symbol(&self) -> &EnclosingSymbol {
        &self.symbol
    }

    /// Pre-fix text of the enclosing symbol.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Post-fix text of the enclosing symbol.
    pub fn modified(&self) -> &str {
        &self.modified
    }

    /// Conjunction of guards that must all hold for the code to be built.
    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    pub fn hunks(&self) -> &[HunkSpan] {
        &self.hunks
    }

    /// Symbol that precedes this one in the fixed file.
    pub fn anchor_after(&self) -> Option<&str> {
        self.anchor_after.as_deref()
    }

    /// The symbol did not exist before the fix.
    pub fn is_addition(&self) -> bool {
        self.original.trim().is_empty()
    }

    /// The symbol is deleted by the fix.
    pub fn is_removal(&self) -> bool {
        self.modified.trim().is_empty() && !self.is_addition()
    }

    /// Anything beyond whitespace changed.
    pub fn has_net_change(&self) -> bool {
        let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().concat();
        squash(&self.original) != squash(&self.modified)
    }

    /// Every condition symbol named by any guard.
    pub fn condition_symbols(&self) -> BTreeSet<String> {
        self.guards
            .iter()
            .flat_map(|g| g.symbols().map(str::to_string))
            .collect()
    }
}
