//! Scratch mainline repository and drifted target tree shared by the
//! pipeline and batch tests.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;

pub const BEFORE: &str = "\
#include <linux/skbuff.h>

static int foo_recv(struct foo_dev *dev, struct sk_buff *skb)
{
\tint len = skb->len;

\tmemcpy(dev->buf, skb->data, len);
\treturn len;
}
";

pub const AFTER: &str = "\
#include <linux/skbuff.h>

static int foo_recv(struct foo_dev *dev, struct sk_buff *skb)
{
\tint len = skb->len;

\tif (len > sizeof(dev->buf))
\t\treturn -EMSGSIZE;
\tmemcpy(dev->buf, skb->data, len);
\treturn len;
}
";

pub const TARGET: &str = "\
#include <linux/skbuff.h>

static int foo_recv(struct foo_dev *fd, struct sk_buff *skb)
{
\tint len = skb->len;

\ttrace_foo_recv(fd, len);
\tmemcpy(fd->buf, skb->data, len);
\treturn len;
}
";

pub fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

/// Mainline repository with the fix as HEAD; returns the fix hash.
pub fn make_mainline() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    run_git(root, &["init"]);
    run_git(root, &["config", "user.name", "test-user"]);
    run_git(root, &["config", "user.email", "test@example.com"]);
    write(root, "drivers/net/foo/foo.c", BEFORE);
    write(root, "drivers/net/foo/Makefile", "obj-$(CONFIG_FOO) += foo.o\n");
    run_git(root, &["add", "."]);
    run_git(root, &["commit", "-m", "foo: add driver"]);

    write(root, "drivers/net/foo/foo.c", AFTER);
    run_git(root, &["commit", "-am", "foo: bound the receive copy"]);
    let fix = run_git(root, &["rev-parse", "HEAD"]);
    (dir, fix)
}

pub fn make_target(config: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "drivers/net/foo/foo.c", TARGET);
    write(dir.path(), ".config", config);
    dir
}

/// `poc.sh` reports a leak until the bounds check is present.
pub fn make_scripts() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "build.sh",
        "test \"$FIXPORT_SANITIZER\" = leak || exit 9\ntest -f drivers/net/foo/foo.c\n",
    );
    write(
        dir.path(),
        "poc.sh",
        "if grep -q EMSGSIZE drivers/net/foo/foo.c; then\n\techo 'no leaks'\nelse\n\techo '==7==ERROR: LeakSanitizer: detected memory leaks' >&2\n\texit 23\nfi\n",
    );
    dir
}
