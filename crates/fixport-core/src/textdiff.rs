//! Line and character alignment used for drift-tolerant matching.
//!
//! Longest Common Subsequence alignment over lines (for edit scripts and
//! unified-diff rendering) and over characters (for symbol-name similarity).

/// One step of an edit script between two line sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOp {
    /// `old[i]` aligns with `new[j]`.
    Equal(usize, usize),
    /// `old[i]` removed.
    Delete(usize),
    /// `new[j]` inserted.
    Insert(usize),
}

/// Collapse whitespace runs to a single space and trim.
pub fn normalize_ws(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// LCS alignment of two sequences under `eq`.
///
/// Returns (index_a, index_b) pairs of matching positions. Common prefix and
/// suffix are matched directly before the DP table is built.
pub fn lcs_pairs<T, F>(a: &[T], b: &[T], eq: F) -> Vec<(usize, usize)>
where
    F: Fn(&T, &T) -> bool,
{
    let mut prefix = 0;
    while prefix < a.len() && prefix < b.len() && eq(&a[prefix], &b[prefix]) {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < a.len() - prefix
        && suffix < b.len() - prefix
        && eq(&a[a.len() - 1 - suffix], &b[b.len() - 1 - suffix])
    {
        suffix += 1;
    }

    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];
    let m = mid_a.len();
    let n = mid_b.len();

    let mut pairs: Vec<(usize, usize)> = (0..prefix).map(|i| (i, i)).collect();

    if m > 0 && n > 0 {
        // dp[i][j] = LCS length of mid_a[i..] and mid_b[j..]
        let mut dp = vec![vec![0u32; n + 1]; m + 1];
        for i in (0..m).rev() {
            for j in (0..n).rev() {
                dp[i][j] = if eq(&mid_a[i], &mid_b[j]) {
                    dp[i + 1][j + 1] + 1
                } else {
                    dp[i + 1][j].max(dp[i][j + 1])
                };
            }
        }

        let (mut i, mut j) = (0, 0);
        while i < m && j < n {
            if eq(&mid_a[i], &mid_b[j]) {
                pairs.push((prefix + i, prefix + j));
                i += 1;
                j += 1;
            } else if dp[i + 1][j] >= dp[i][j + 1] {
                i += 1;
            } else {
                j += 1;
            }
        }
    }

    pairs.extend((0..suffix).map(|k| (a.len() - suffix + k, b.len() - suffix + k)));
    pairs
}

/// Edit script turning `old` into `new`, deletions before insertions within
/// each changed region.
pub fn line_ops<F>(old: &[&str], new: &[&str], eq: F) -> Vec<LineOp>
where
    F: Fn(&&str, &&str) -> bool,
{
    let pairs = lcs_pairs(old, new, eq);
    let mut ops = Vec::with_capacity(old.len() + new.len());
    let (mut i, mut j) = (0, 0);
    for (pi, pj) in pairs.into_iter().chain(std::iter::once((old.len(), new.len()))) {
        while i < pi {
            ops.push(LineOp::Delete(i));
            i += 1;
        }
        while j < pj {
            ops.push(LineOp::Insert(j));
            j += 1;
        }
        if pi < old.len() && pj < new.len() {
            ops.push(LineOp::Equal(pi, pj));
            i += 1;
            j += 1;
        }
    }
    ops
}

/// Exact-match edit script.
pub fn exact_ops(old: &[&str], new: &[&str]) -> Vec<LineOp> {
    line_ops(old, new, |a, b| a == b)
}

fn ratio(common: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        (2 * common) as f64 / total as f64
    }
}

/// Similarity of two texts in `[0, 1]`, comparing whitespace-normalised
/// non-blank lines.
pub fn line_similarity(a: &str, b: &str) -> f64 {
    let la: Vec<String> = a
        .lines()
        .map(normalize_ws)
        .filter(|l| !l.is_empty())
        .collect();
    let lb: Vec<String> = b
        .lines()
        .map(normalize_ws)
        .filter(|l| !l.is_empty())
        .collect();
    let common = lcs_pairs(&la, &lb, |x, y| x == y).len();
    ratio(common, la.len() + lb.len())
}

/// Character-level similarity in `[0, 1]`.
pub fn char_similarity(a: &str, b: &str) -> f64 {
    let ca: Vec<char> = a.chars().collect();
    let cb: Vec<char> = b.chars().collect();
    let common = lcs_pairs(&ca, &cb, |x, y| x == y).len();
    ratio(common, ca.len() + cb.len())
}

/// Render unified-diff hunks for one region.
///
/// `old_base` / `new_base` are the 0-based line offsets of the region inside
/// its file; `section` is echoed after the `@@` range header.
pub fn render_hunks(
    old: &[&str],
    new: &[&str],
    old_base: usize,
    new_base: usize,
    context: usize,
    section: &str,
) -> String {
    let ops = exact_ops(old, new);

    // running (old, new) line counters before each op
    let mut positions = Vec::with_capacity(ops.len());
    let (mut o, mut n) = (0, 0);
    for op in &ops {
        positions.push((o, n));
        match op {
            LineOp::Equal(..) => {
                o += 1;
                n += 1;
            }
            LineOp::Delete(_) => o += 1,
            LineOp::Insert(_) => n += 1,
        }
    }

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, LineOp::Equal(..)))
        .map(|(i, _)| i)
        .collect();
    let Some(&first) = changes.first() else {
        return String::new();
    };

    let mut groups: Vec<(usize, usize)> = Vec::new();
    let mut start = first.saturating_sub(context);
    let mut end = (first + context + 1).min(ops.len());
    for &c in &changes[1..] {
        if c.saturating_sub(context) <= end {
            end = (c + context + 1).min(ops.len());
        } else {
            groups.push((start, end));
            start = c.saturating_sub(context);
            end = (c + context + 1).min(ops.len());
        }
    }
    groups.push((start, end));

    let mut out = String::new();
    for (start, end) in groups {
        let slice = &ops[start..end];
        let old_len = slice
            .iter()
            .filter(|op| !matches!(op, LineOp::Insert(_)))
            .count();
        let new_len = slice
            .iter()
            .filter(|op| !matches!(op, LineOp::Delete(_)))
            .count();
        let (o, n) = positions[start];
        let old_start = old_base + o + usize::from(old_len > 0);
        let new_start = new_base + n + usize::from(new_len > 0);

        out.push_str(&format!(
            "@@ -{old_start},{old_len} +{new_start},{new_len} @@"
        ));
        if !section.is_empty() {
            out.push(' ');
            out.push_str(section);
        }
        out.push('\n');
        for op in slice {
            match *op {
                LineOp::Equal(i, _) => {
                    out.push(' ');
                    out.push_str(old[i]);
                }
                LineOp::Delete(i) => {
                    out.push('-');
                    out.push_str(old[i]);
                }
                LineOp::Insert(j) => {
                    out.push('+');
                    out.push_str(new[j]);
                }
            }
            out.push('\n');
        }
    }
    out
}
