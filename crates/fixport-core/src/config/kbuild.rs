//! Kbuild makefile gating.
//!
//! Answers "which config symbols must be on for this object (or directory)
//! to be built" from `obj-$(CONFIG_X) += foo.o` style assignments, composite
//! objects (`foo-y`, `foo-objs`) and `ifdef` / `ifeq` / `ifneq` blocks.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::domain::change_unit::Guard;

/// Parent directories inspected above the changed file.
pub const MAX_KBUILD_DEPTH: usize = 5;

fn assign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9_./-]+?)-(y|m|objs|\$\((CONFIG_\w+)\))\s*(?::=|\+=|=)\s*(.*)$")
            .expect("valid regex")
    })
}

fn cond_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(ifdef|ifndef|ifeq|ifneq)\b\s*(.*)$").expect("valid regex")
    })
}

fn config_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(CONFIG_\w+)").expect("valid regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ObjRule {
    /// `obj`, `lib`, ... for top-level lists; the composite name otherwise.
    target: String,
    condition: Option<String>,
    objects: Vec<String>,
    block_guards: Vec<String>,
}

impl ObjRule {
    fn is_top_level(&self) -> bool {
        matches!(self.target.as_str(), "obj" | "lib" | "core" | "drivers" | "libs")
    }
}

/// Parsed assignments of one Makefile / Kbuild file.
#[derive(Debug, Clone, Default)]
pub struct Makefile {
    rules: Vec<ObjRule>,
}

/// Positive guard opened by a makefile conditional, if any.
fn block_condition(kind: &str, args: &str) -> Option<String> {
    let symbol = config_ref_re().captures(args)?.get(1)?.as_str().to_string();
    let args = args.replace(' ', "");
    match kind {
        "ifdef" => Some(symbol),
        "ifeq" if args.contains(",y)") || args.contains(",m)") => Some(symbol),
        "ifneq" if args.ends_with(",)") || args.contains(",n)") => Some(symbol),
        _ => None,
    }
}

pub fn parse_makefile(text: &str) -> Makefile {
    let mut rules = Vec::new();
    // one entry per open conditional; `None` for blocks that imply nothing
    let mut blocks: Vec<Option<String>> = Vec::new();
    let mut logical = String::new();

    for raw in text.lines() {
        let line = raw.split('#').next().unwrap_or_default();
        if let Some(head) = line.trim_end().strip_suffix('\\') {
            logical.push_str(head);
            logical.push(' ');
            continue;
        }
        logical.push_str(line);
        let stmt = std::mem::take(&mut logical);
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }

        if let Some(caps) = cond_re().captures(stmt) {
            blocks.push(block_condition(&caps[1], &caps[2]));
            continue;
        }
        if stmt == "else" || stmt.starts_with("else ") {
            if let Some(top) = blocks.last_mut() {
                *top = None;
            }
            continue;
        }
        if stmt == "endif" {
            blocks.pop();
            continue;
        }

        if let Some(caps) = assign_re().captures(stmt) {
            let objects = caps[4]
                .split_whitespace()
                .filter(|o| o.ends_with(".o") || o.ends_with('/'))
                .map(str::to_string)
                .collect();
            rules.push(ObjRule {
                target: caps[1].to_string(),
                condition: caps.get(3).map(|m| m.as_str().to_string()),
                objects,
                block_guards: blocks.iter().flatten().cloned().collect(),
            });
        }
    }
    Makefile { rules }
}

impl Makefile {
    /// Guards for building `object` (`foo.o` or `subdir/`).
    ///
    /// `None` when the makefile never mentions it; `Some(vec![])` when it is
    /// built unconditionally.
    pub fn guards_for_object(&self, object: &str) -> Option<Vec<Guard>> {
        self.guards_inner(object, 0)
    }

    fn guards_inner(&self, object: &str, depth: usize) -> Option<Vec<Guard>> {
        if depth > 4 {
            return None;
        }
        let mut per_rule: Vec<Vec<Guard>> = Vec::new();
        for rule in self.rules.iter().filter(|r| r.objects.iter().any(|o| o == object)) {
            let mut guards: Vec<Guard> = rule
                .block_guards
                .iter()
                .chain(rule.condition.iter())
                .map(|s| Guard::single(s.as_str()))
                .collect();
            if !rule.is_top_level() {
                let composite = format!("{}.o", rule.target);
                match self.guards_inner(&composite, depth + 1) {
                    Some(outer) => guards.extend(outer),
                    None => continue,
                }
            }
            per_rule.push(guards);
        }

        if per_rule.is_empty() {
            return None;
        }
        if per_rule.iter().any(Vec::is_empty) {
            return Some(Vec::new());
        }
        // listed under several symbols: built when any of them is on
        if per_rule.len() > 1 && per_rule.iter().all(|g| g.len() == 1) {
            let symbols: BTreeSet<String> = per_rule
                .iter()
                .flat_map(|g| g[0].symbols().map(str::to_string).collect::<Vec<_>>())
                .collect();
            return Some(Guard::any_of(symbols).into_iter().collect());
        }
        let mut common = per_rule[0].clone();
        for other in &per_rule[1..] {
            common.retain(|g| other.contains(g));
        }
        Some(common)
    }
}

/// Config symbol selected by `arch/<name>/`.
pub fn arch_symbol(arch: &str) -> String {
    match arch {
        "x86" => "CONFIG_X86".to_string(),
        "arm64" => "CONFIG_ARM64".to_string(),
        "arm" => "CONFIG_ARM".to_string(),
        "riscv" => "CONFIG_RISCV".to_string(),
        "powerpc" => "CONFIG_PPC".to_string(),
        "loongarch" => "CONFIG_LOONGARCH".to_string(),
        "sw_64" => "CONFIG_SW64".to_string(),
        "s390" => "CONFIG_S390".to_string(),
        "mips" => "CONFIG_MIPS".to_string(),
        other => format!("CONFIG_{}", other.to_ascii_uppercase().replace('-', "_")),
    }
}

/// Architecture guard for paths under `arch/`.
pub fn arch_guard(path: &str) -> Option<Guard> {
    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("arch"), Some(arch), Some(_)) => Some(Guard::single(arch_symbol(arch))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAKEFILE: &str = "\
# SPDX-License-Identifier: GPL-2.0
obj-$(CONFIG_NETFILTER) += netfilter.o
obj-y += core.o
obj-$(CONFIG_NF_TABLES) += nf_tables.o
nf_tables-objs := nf_tables_core.o nf_tables_api.o \\
\tnft_chain.o
nf_tables-$(CONFIG_NFT_OBJREF) += nft_objref.o

ifdef CONFIG_NET_SCHED
obj-y += sch_api.o
else
obj-y += sch_stub.o
endif

ifneq ($(CONFIG_BPF),)
obj-$(CONFIG_INET) += bpf_glue.o
endif

obj-$(CONFIG_IPV4) += shared.o
obj-$(CONFIG_IPV6) += shared.o
obj-$(CONFIG_BRIDGE) += bridge/
";

    fn syms(guards: Vec<Guard>) -> Vec<String> {
        guards.iter().map(|g| g.to_string()).collect()
    }

    #[test]
    fn simple_and_unconditional() {
        let mk = parse_makefile(MAKEFILE);
        assert_eq!(
            syms(mk.guards_for_object("netfilter.o").unwrap()),
            vec!["CONFIG_NETFILTER"]
        );
        assert!(mk.guards_for_object("core.o").unwrap().is_empty());
        assert!(mk.guards_for_object("unknown.o").is_none());
    }

    #[test]
    fn composite_objects_inherit_parent_guard() {
        let mk = parse_makefile(MAKEFILE);
        assert_eq!(
            syms(mk.guards_for_object("nft_chain.o").unwrap()),
            vec!["CONFIG_NF_TABLES"]
        );
        assert_eq!(
            syms(mk.guards_for_object("nft_objref.o").unwrap()),
            vec!["CONFIG_NFT_OBJREF", "CONFIG_NF_TABLES"]
        );
    }

    #[test]
    fn conditional_blocks() {
        let mk = parse_makefile(MAKEFILE);
        assert_eq!(
            syms(mk.guards_for_object("sch_api.o").unwrap()),
            vec!["CONFIG_NET_SCHED"]
        );
        assert!(mk.guards_for_object("sch_stub.o").unwrap().is_empty());
        assert_eq!(
            syms(mk.guards_for_object("bpf_glue.o").unwrap()),
            vec!["CONFIG_BPF", "CONFIG_INET"]
        );
    }

    #[test]
    fn multiple_listings_form_disjunction() {
        let mk = parse_makefile(MAKEFILE);
        assert_eq!(
            syms(mk.guards_for_object("shared.o").unwrap()),
            vec!["CONFIG_IPV4 || CONFIG_IPV6"]
        );
        assert_eq!(
            syms(mk.guards_for_object("bridge/").unwrap()),
            vec!["CONFIG_BRIDGE"]
        );
    }

    #[test]
    fn arch_paths() {
        assert_eq!(
            arch_guard("arch/x86/kernel/cpu.c").unwrap().to_string(),
            "CONFIG_X86"
        );
        assert_eq!(arch_symbol("powerpc"), "CONFIG_PPC");
        assert_eq!(arch_symbol("sparc"), "CONFIG_SPARC");
        assert!(arch_guard("arch/Kconfig").is_none());
        assert!(arch_guard("net/core/sock.c").is_none());
    }
}
