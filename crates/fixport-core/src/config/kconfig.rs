//! Static Kconfig lookup for symbols absent from every manifest.
//!
//! A symbol no manifest mentions can still be shown to be off when one of
//! its `depends on` clauses (or an enclosing `if` block) is false under the
//! manifests. Defaults and `select` are not modelled, so this lookup only
//! ever refines `unknown` to `disabled`, never to `enabled`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::config::manifest::ManifestSet;
use crate::domain::config_state::SymbolState;
use crate::domain::error::Result;
use crate::source_tree::walk_files;

/// Dependency expressions per symbol (names without the `CONFIG_` prefix).
#[derive(Debug, Clone, Default)]
pub struct KconfigIndex {
    depends: HashMap<String, Vec<String>>,
}

fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

impl KconfigIndex {
    /// Index every `Kconfig*` file under `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let files = walk_files(root, &|p: &Path| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("Kconfig"))
                .unwrap_or(false)
        })?;
        let mut index = Self::default();
        for file in files {
            let bytes = std::fs::read(&file)?;
            index.add_source(&String::from_utf8_lossy(&bytes));
        }
        tracing::debug!(symbols = index.depends.len(), "kconfig index loaded");
        Ok(index)
    }

    pub fn parse(text: &str) -> Self {
        let mut index = Self::default();
        index.add_source(text);
        index
    }

    pub fn add_source(&mut self, text: &str) {
        let mut if_stack: Vec<String> = Vec::new();
        let mut current: Option<String> = None;
        let mut help_indent: Option<usize> = None;

        for raw in text.lines() {
            let indent = indent_of(raw);
            let line = raw.split('#').next().unwrap_or_default().trim();
            if let Some(h) = help_indent {
                if line.is_empty() || indent > h {
                    continue;
                }
                help_indent = None;
            }
            if line.is_empty() {
                continue;
            }

            let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let rest = rest.trim();
            match keyword {
                "config" | "menuconfig" => {
                    let deps = self.depends.entry(rest.to_string()).or_default();
                    deps.extend(if_stack.iter().cloned());
                    current = Some(rest.to_string());
                }
                "depends" => {
                    if let (Some(name), Some(expr)) = (&current, rest.strip_prefix("on")) {
                        self.depends
                            .entry(name.clone())
                            .or_default()
                            .push(expr.trim().to_string());
                    }
                }
                "help" | "---help---" => help_indent = Some(indent),
                "if" => {
                    if_stack.push(rest.to_string());
                    current = None;
                }
                "endif" => {
                    if_stack.pop();
                    current = None;
                }
                "menu" | "endmenu" | "choice" | "endchoice" | "comment" | "source" | "rsource"
                | "osource" | "mainmenu" => current = None,
                _ => {}
            }
        }
    }

    pub fn knows(&self, symbol: &str) -> bool {
        self.depends
            .contains_key(symbol.strip_prefix("CONFIG_").unwrap_or(symbol))
    }

    /// `Disabled` when a dependency of `symbol` is provably off, else `Unknown`.
    pub fn resolve(&self, symbol: &str, manifests: &ManifestSet) -> SymbolState {
        let mut visiting = HashSet::new();
        match self.eval_symbol(symbol.strip_prefix("CONFIG_").unwrap_or(symbol), manifests, &mut visiting, 0) {
            Tri::Off => SymbolState::Disabled,
            _ => SymbolState::Unknown,
        }
    }

    fn eval_symbol(
        &self,
        name: &str,
        manifests: &ManifestSet,
        visiting: &mut HashSet<String>,
        depth: usize,
    ) -> Tri {
        let Some(deps) = self.depends.get(name) else {
            return Tri::Unknown;
        };
        if depth > 4 || !visiting.insert(name.to_string()) {
            return Tri::Unknown;
        }
        let mut result = Tri::Unknown;
        for expr in deps {
            let tokens = tokenize(expr);
            let mut parser = ExprParser {
                tokens: &tokens,
                pos: 0,
                index: self,
                manifests,
                visiting: &mut *visiting,
                depth,
            };
            if parser.or() == Tri::Off {
                result = Tri::Off;
                break;
            }
        }
        visiting.remove(name);
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tri {
    On,
    Off,
    Unknown,
}

impl Tri {
    fn not(self) -> Tri {
        match self {
            Tri::On => Tri::Off,
            Tri::Off => Tri::On,
            Tri::Unknown => Tri::Unknown,
        }
    }

    fn and(self, other: Tri) -> Tri {
        match (self, other) {
            (Tri::Off, _) | (_, Tri::Off) => Tri::Off,
            (Tri::On, Tri::On) => Tri::On,
            _ => Tri::Unknown,
        }
    }

    fn or(self, other: Tri) -> Tri {
        match (self, other) {
            (Tri::On, _) | (_, Tri::On) => Tri::On,
            (Tri::Off, Tri::Off) => Tri::Off,
            _ => Tri::Unknown,
        }
    }
}

fn tokenize(expr: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if (c == '&' || c == '|') && chars.get(i + 1) == Some(&c) {
            tokens.push(format!("{c}{c}"));
            i += 2;
        } else if c == '!' && chars.get(i + 1) == Some(&'=') {
            tokens.push("!=".to_string());
            i += 2;
        } else if "!()=<>".contains(c) {
            tokens.push(c.to_string());
            i += 1;
        } else if c == '"' {
            let end = chars[i + 1..]
                .iter()
                .position(|&d| d == '"')
                .map_or(chars.len(), |p| i + 1 + p);
            tokens.push(chars[i + 1..end].iter().collect());
            i = end + 1;
        } else {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            if i == start {
                i += 1;
                continue;
            }
            tokens.push(chars[start..i].iter().collect());
        }
    }
    tokens
}

struct ExprParser<'a> {
    tokens: &'a [String],
    pos: usize,
    index: &'a KconfigIndex,
    manifests: &'a ManifestSet,
    visiting: &'a mut HashSet<String>,
    depth: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn or(&mut self) -> Tri {
        let mut value = self.and();
        while self.peek() == Some("||") {
            self.pos += 1;
            value = value.or(self.and());
        }
        value
    }

    fn and(&mut self) -> Tri {
        let mut value = self.not();
        while self.peek() == Some("&&") {
            self.pos += 1;
            value = value.and(self.not());
        }
        value
    }

    fn not(&mut self) -> Tri {
        if self.peek() == Some("!") {
            self.pos += 1;
            return self.not().not();
        }
        self.primary()
    }

    fn primary(&mut self) -> Tri {
        match self.peek() {
            Some("(") => {
                self.pos += 1;
                let value = self.or();
                if self.peek() == Some(")") {
                    self.pos += 1;
                }
                value
            }
            Some(_) => {
                let symbol = self.tokens[self.pos].clone();
                self.pos += 1;
                let value = self.symbol(&symbol);
                match self.peek() {
                    Some("=") | Some("!=") => {
                        let negate = self.peek() == Some("!=");
                        self.pos += 1;
                        let rhs = self.peek().unwrap_or_default().to_string();
                        self.pos += 1;
                        let cmp = match rhs.as_str() {
                            "y" | "m" => value,
                            "n" => value.not(),
                            _ => Tri::Unknown,
                        };
                        if negate {
                            cmp.not()
                        } else {
                            cmp
                        }
                    }
                    Some("<") | Some(">") => {
                        self.pos += 2;
                        Tri::Unknown
                    }
                    _ => value,
                }
            }
            None => Tri::Unknown,
        }
    }

    fn symbol(&mut self, name: &str) -> Tri {
        match name {
            "y" | "m" => return Tri::On,
            "n" => return Tri::Off,
            _ => {}
        }
        match self.manifests.resolve(&format!("CONFIG_{name}")) {
            SymbolState::Enabled => Tri::On,
            SymbolState::Disabled => Tri::Off,
            SymbolState::Unknown => {
                match self
                    .index
                    .eval_symbol(name, self.manifests, self.visiting, self.depth + 1)
                {
                    Tri::Off => Tri::Off,
                    _ => Tri::Unknown,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::manifest::ConfigManifest;

    const KCONFIG: &str = "\
config NET_FOO
\ttristate \"Foo protocol\"
\tdepends on NET && !BAR
\thelp
\t  Enable foo if you need it.
\t  depends on nothing in here

if INET
config INET_DIAG_FOO
\tbool \"diag\"
endif

config CHAINED
\tdepends on NET_FOO

config CMP
\tdepends on ARCH_X=y || ARCH_Y != n
";

    fn manifests(text: &str) -> ManifestSet {
        ManifestSet::new(vec![ConfigManifest::parse("t", text)])
    }

    #[test]
    fn depends_off_disables() {
        let idx = KconfigIndex::parse(KCONFIG);
        let m = manifests("# CONFIG_NET is not set\n");
        assert_eq!(idx.resolve("CONFIG_NET_FOO", &m), SymbolState::Disabled);

        let m = manifests("CONFIG_NET=y\nCONFIG_BAR=y\n");
        assert_eq!(idx.resolve("CONFIG_NET_FOO", &m), SymbolState::Disabled);
    }

    #[test]
    fn satisfiable_depends_stay_unknown() {
        let idx = KconfigIndex::parse(KCONFIG);
        let m = manifests("CONFIG_NET=y\n# CONFIG_BAR is not set\n");
        assert_eq!(idx.resolve("CONFIG_NET_FOO", &m), SymbolState::Unknown);
        assert_eq!(idx.resolve("CONFIG_NOT_DECLARED", &m), SymbolState::Unknown);
    }

    #[test]
    fn help_text_is_not_parsed() {
        let idx = KconfigIndex::parse(KCONFIG);
        assert_eq!(idx.depends.get("NET_FOO").map(Vec::len), Some(1));
    }

    #[test]
    fn if_blocks_and_transitive_dependencies() {
        let idx = KconfigIndex::parse(KCONFIG);
        let m = manifests("# CONFIG_INET is not set\n# CONFIG_NET is not set\n");
        assert_eq!(idx.resolve("CONFIG_INET_DIAG_FOO", &m), SymbolState::Disabled);
        assert_eq!(idx.resolve("CONFIG_CHAINED", &m), SymbolState::Disabled);
    }

    #[test]
    fn comparisons() {
        let idx = KconfigIndex::parse(KCONFIG);
        let m = manifests("# CONFIG_ARCH_X is not set\n# CONFIG_ARCH_Y is not set\n");
        assert_eq!(idx.resolve("CONFIG_CMP", &m), SymbolState::Disabled);
        let m = manifests("CONFIG_ARCH_Y=y\n");
        assert_eq!(idx.resolve("CONFIG_CMP", &m), SymbolState::Unknown);
    }
}
