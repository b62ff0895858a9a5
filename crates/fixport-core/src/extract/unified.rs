//! Unified diff parsing.

use regex::Regex;
use std::sync::OnceLock;

/// Extensions and names of files that carry no code.
const NON_CODE_SUFFIXES: &[&str] = &[
    ".rst", ".md", ".mdx", ".txt", ".yaml", ".yml", ".json", ".xml", ".tcl", ".pem", ".js",
    ".sha1", ".sha256", ".uuid", ".test", ".golden", "_test.go", "CHANGES", "ANNOUNCE", "NEWS",
    "MAINTAINERS", "manifest",
];

/// Whether a changed path can affect the built code.
pub fn is_code_path(path: &str) -> bool {
    if path.starts_with("Documentation/") || path.starts_with("tools/testing/") {
        return false;
    }
    !NON_CODE_SUFFIXES.iter().any(|s| path.ends_with(s))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Removed,
    Added,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkLine {
    pub kind: LineKind,
    pub text: String,
    /// 0-based line in the old file (context and removed lines).
    pub old_line: Option<usize>,
    /// 0-based line in the new file (context and added lines).
    pub new_line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    /// Function context git prints after the range header.
    pub section: String,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(|l| l.kind != LineKind::Context)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    /// `None` for newly created files.
    pub old_path: Option<String>,
    /// `None` for deleted files.
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    /// The path the change is reported under.
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }
}

fn hunk_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@ ?(.*)$").expect("valid regex")
    })
}

fn strip_prefix_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" {
        return None;
    }
    let path = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(path.to_string())
}

/// Parse a multi-file unified diff.
///
/// Binary files and headers without hunks are skipped.
pub fn parse_unified(diff: &str) -> Vec<FileDiff> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut pending_old: Option<Option<String>> = None;
    let (mut old_cursor, mut new_cursor) = (0usize, 0usize);
    // lines still owed to the open hunk, per side
    let (mut old_left, mut new_left) = (0usize, 0usize);

    for line in diff.lines() {
        if old_left > 0 || new_left > 0 {
            let Some(hunk) = current.as_mut().and_then(|f| f.hunks.last_mut()) else {
                old_left = 0;
                new_left = 0;
                continue;
            };
            let (kind, text) = match line.as_bytes().first() {
                Some(b' ') => (LineKind::Context, &line[1..]),
                Some(b'-') => (LineKind::Removed, &line[1..]),
                Some(b'+') => (LineKind::Added, &line[1..]),
                None => (LineKind::Context, ""),
                // "\ No newline at end of file"
                _ => continue,
            };
            let (old_line, new_line) = match kind {
                LineKind::Context => {
                    let pos = (Some(old_cursor), Some(new_cursor));
                    old_cursor += 1;
                    new_cursor += 1;
                    old_left = old_left.saturating_sub(1);
                    new_left = new_left.saturating_sub(1);
                    pos
                }
                LineKind::Removed => {
                    old_cursor += 1;
                    old_left = old_left.saturating_sub(1);
                    (Some(old_cursor - 1), None)
                }
                LineKind::Added => {
                    new_cursor += 1;
                    new_left = new_left.saturating_sub(1);
                    (None, Some(new_cursor - 1))
                }
            };
            hunk.lines.push(HunkLine {
                kind,
                text: text.to_string(),
                old_line,
                new_line,
            });
            continue;
        }

        if line.starts_with("diff --git ") {
            files.extend(current.take());
            pending_old = None;
        } else if let Some(rest) = line.strip_prefix("--- ") {
            files.extend(current.take());
            pending_old = Some(strip_prefix_path(rest));
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(old_path) = pending_old.take() {
                current = Some(FileDiff {
                    old_path,
                    new_path: strip_prefix_path(rest),
                    hunks: Vec::new(),
                });
            }
        } else if let Some(caps) = hunk_header().captures(line) {
            let Some(file) = current.as_mut() else {
                continue;
            };
            let num = |i: usize, default: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(default)
            };
            let hunk = Hunk {
                old_start: num(1, 0),
                old_len: num(2, 1),
                new_start: num(3, 0),
                new_len: num(4, 1),
                section: caps.get(5).map_or("", |m| m.as_str()).trim().to_string(),
                lines: Vec::new(),
            };
            // a zero-length side names the line before the hunk
            old_cursor = if hunk.old_len == 0 {
                hunk.old_start
            } else {
                hunk.old_start.saturating_sub(1)
            };
            new_cursor = if hunk.new_len == 0 {
                hunk.new_start
            } else {
                hunk.new_start.saturating_sub(1)
            };
            old_left = hunk.old_len;
            new_left = hunk.new_len;
            file.hunks.push(hunk);
        }
    }
    files.extend(current.take());
    files.retain(|f| !f.hunks.is_empty());
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "\
diff --git a/net/core/sock.c b/net/core/sock.c
index 1111111..2222222 100644
--- a/net/core/sock.c
+++ b/net/core/sock.c
@@ -10,4 +10,5 @@ int sock_setsockopt(struct socket *sock)
 \tint val;
-\tval = get();
+\tif (get_user(val, optval))
+\t\treturn -EFAULT;
 \treturn val;
 }
diff --git a/Documentation/net.rst b/Documentation/net.rst
--- a/Documentation/net.rst
+++ b/Documentation/net.rst
@@ -1 +1 @@
-old
+new
diff --git a/drivers/new.c b/drivers/new.c
new file mode 100644
--- /dev/null
+++ b/drivers/new.c
@@ -0,0 +1,2 @@
+int x;
+int y;
";

    #[test]
    fn parses_files_and_hunks() {
        let files = parse_unified(DIFF);
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].path(), "net/core/sock.c");
        let hunk = &files[0].hunks[0];
        assert_eq!(hunk.old_start, 10);
        assert_eq!(hunk.new_len, 5);
        assert_eq!(hunk.section, "int sock_setsockopt(struct socket *sock)");
        assert_eq!(hunk.lines.len(), 6);
        assert_eq!(hunk.lines[1].kind, LineKind::Removed);
        assert_eq!(hunk.lines[1].old_line, Some(10));
        assert_eq!(hunk.lines[2].new_line, Some(10));
        assert_eq!(hunk.lines[4].old_line, Some(11));
        assert_eq!(hunk.lines[4].new_line, Some(12));
    }

    #[test]
    fn new_file_has_no_old_path() {
        let files = parse_unified(DIFF);
        assert_eq!(files[2].old_path, None);
        assert_eq!(files[2].new_path.as_deref(), Some("drivers/new.c"));
        assert_eq!(files[2].hunks[0].lines[0].new_line, Some(0));
    }

    #[test]
    fn blacklist() {
        assert!(is_code_path("net/core/sock.c"));
        assert!(is_code_path("include/linux/skbuff.h"));
        assert!(is_code_path("drivers/net/Makefile"));
        assert!(!is_code_path("Documentation/net.rst"));
        assert!(!is_code_path("README.md"));
        assert!(!is_code_path("pkg/server_test.go"));
        assert!(!is_code_path("testdata/out.golden"));
    }
}
