//! Runtime sanitizers and the diagnostic each one prints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sanitizer {
    Address,
    Leak,
    Memory,
    Undefined,
    Thread,
    Kasan,
}

impl Sanitizer {
    /// Identifier passed to project scripts as `FIXPORT_SANITIZER`.
    pub fn id(&self) -> &'static str {
        match self {
            Sanitizer::Address => "address",
            Sanitizer::Leak => "leak",
            Sanitizer::Memory => "memory",
            Sanitizer::Undefined => "undefined",
            Sanitizer::Thread => "thread",
            Sanitizer::Kasan => "kasan",
        }
    }

    /// Substring the sanitizer prints when it fires.
    pub fn signature(&self) -> &'static str {
        match self {
            Sanitizer::Address => "ERROR: AddressSanitizer",
            Sanitizer::Leak => "ERROR: LeakSanitizer",
            Sanitizer::Memory => "WARNING: MemorySanitizer",
            Sanitizer::Undefined => "runtime error:",
            Sanitizer::Thread => "WARNING: ThreadSanitizer",
            Sanitizer::Kasan => "BUG: KASAN",
        }
    }
}

impl fmt::Display for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Sanitizer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let key = key.strip_suffix("sanitizer").unwrap_or(&key);
        match key {
            "address" | "asan" => Ok(Sanitizer::Address),
            "leak" | "lsan" => Ok(Sanitizer::Leak),
            "memory" | "msan" => Ok(Sanitizer::Memory),
            "undefined" | "undefinedbehavior" | "ubsan" => Ok(Sanitizer::Undefined),
            "thread" | "tsan" => Ok(Sanitizer::Thread),
            "kasan" => Ok(Sanitizer::Kasan),
            _ => Err(format!("unknown sanitizer: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spellings() {
        assert_eq!("asan".parse::<Sanitizer>().unwrap(), Sanitizer::Address);
        assert_eq!("LeakSanitizer".parse::<Sanitizer>().unwrap(), Sanitizer::Leak);
        assert_eq!(" UBSan ".parse::<Sanitizer>().unwrap(), Sanitizer::Undefined);
        assert_eq!("KASAN".parse::<Sanitizer>().unwrap(), Sanitizer::Kasan);
        assert!("valgrind".parse::<Sanitizer>().is_err());
    }

    #[test]
    fn signatures() {
        assert_eq!(Sanitizer::Leak.signature(), "ERROR: LeakSanitizer");
        assert_eq!(Sanitizer::Undefined.signature(), "runtime error:");
        assert_eq!(Sanitizer::Thread.id(), "thread");
    }
}
