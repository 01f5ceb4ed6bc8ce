//! Line-level diff used by the semantic analyzer.
//!
//! Computes an LCS-based line diff between two texts and walks it the way
//! the recognizers need: every added and removed line is tagged with the
//! reconstructed line number in the NEW file (removed lines carry the
//! position at which the removal is observed). A small unified-diff renderer
//! is included for `raw_diff` capture.
//!
//! # Determinism
//!
//! The diff is a pure function of its inputs. Oversized inputs (LCS table
//! above [`MAX_LCS_CELLS`]) degrade to a whole-file replace, which is still
//! deterministic and keeps the added/removed accounting exact.

/// Upper bound on the LCS table size before degrading to a full replace.
pub const MAX_LCS_CELLS: usize = 2_000_000;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One diff operation over whole lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineOp {
    /// Line present in both versions.
    Equal(String),
    /// Line only in the old version.
    Remove(String),
    /// Line only in the new version.
    Add(String),
}

/// Added/removed lines tagged with new-file line numbers (1-indexed).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffLines {
    /// `(new_file_line, text)` for every added line.
    pub added: Vec<(u32, String)>,
    /// `(new_file_line, text)` for every removed line; the line number is
    /// the position in the new file where the removal is observed.
    pub removed: Vec<(u32, String)>,
}

impl DiffLines {
    /// Total changed-line count (added + removed).
    #[must_use]
    pub fn total_changed(&self) -> u32 {
        u32::try_from(self.added.len() + self.removed.len()).unwrap_or(u32::MAX)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize CRLF and bare CR line endings to LF.
#[must_use]
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Diff computation
// ---------------------------------------------------------------------------

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.lines().collect()
    }
}

/// Compute the op sequence between two texts (line endings must already be
/// normalized by the caller).
#[must_use]
pub fn diff_ops(before: &str, after: &str) -> Vec<LineOp> {
    let old: Vec<&str> = split_lines(before);
    let new: Vec<&str> = split_lines(after);

    if old.len().saturating_mul(new.len()) > MAX_LCS_CELLS {
        // Full replace: exact accounting, no quadratic table.
        let mut ops: Vec<LineOp> = old
            .iter()
            .map(|l| LineOp::Remove((*l).to_owned()))
            .collect();
        ops.extend(new.iter().map(|l| LineOp::Add((*l).to_owned())));
        return ops;
    }

    // Classic LCS dynamic program over lines.
    let n = old.len();
    let m = new.len();
    let mut table = vec![0_u32; (n + 1) * (m + 1)];
    let idx = |i: usize, j: usize| i * (m + 1) + j;

    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[idx(i, j)] = if old[i] == new[j] {
                table[idx(i + 1, j + 1)] + 1
            } else {
                table[idx(i + 1, j)].max(table[idx(i, j + 1)])
            };
        }
    }

    let mut ops = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(LineOp::Equal(old[i].to_owned()));
            i += 1;
            j += 1;
        } else if table[idx(i + 1, j)] >= table[idx(i, j + 1)] {
            ops.push(LineOp::Remove(old[i].to_owned()));
            i += 1;
        } else {
            ops.push(LineOp::Add(new[j].to_owned()));
            j += 1;
        }
    }
    ops.extend(old[i..].iter().map(|l| LineOp::Remove((*l).to_owned())));
    ops.extend(new[j..].iter().map(|l| LineOp::Add((*l).to_owned())));
    ops
}

/// Walk the op sequence and tag added/removed lines with new-file line
/// numbers.
#[must_use]
pub fn diff_lines(before: &str, after: &str) -> DiffLines {
    let mut out = DiffLines::default();
    let mut new_line: u32 = 1;
    for op in diff_ops(before, after) {
        match op {
            LineOp::Equal(_) => new_line += 1,
            LineOp::Add(text) => {
                out.added.push((new_line, text));
                new_line += 1;
            }
            LineOp::Remove(text) => {
                out.removed.push((new_line, text));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Unified rendering
// ---------------------------------------------------------------------------

const CONTEXT: usize = 3;

/// Render a unified diff (3 lines of context) for `raw_diff` capture.
///
/// Returns an empty string when the inputs are identical.
#[must_use]
pub fn render_unified(before: &str, after: &str, label: &str) -> String {
    let ops = diff_ops(before, after);
    if !ops
        .iter()
        .any(|op| matches!(op, LineOp::Add(_) | LineOp::Remove(_)))
    {
        return String::new();
    }

    // Mark ops within CONTEXT of any change.
    let mut keep = vec![false; ops.len()];
    for (i, op) in ops.iter().enumerate() {
        if !matches!(op, LineOp::Equal(_)) {
            let lo = i.saturating_sub(CONTEXT);
            let hi = (i + CONTEXT + 1).min(ops.len());
            for flag in &mut keep[lo..hi] {
                *flag = true;
            }
        }
    }

    let mut out = format!("--- a/{label}\n+++ b/{label}\n");
    let mut old_line: usize = 1;
    let mut new_line: usize = 1;
    let mut i = 0;
    while i < ops.len() {
        if !keep[i] {
            if let LineOp::Equal(_) = ops[i] {
                old_line += 1;
                new_line += 1;
            }
            i += 1;
            continue;
        }
        // Start of a hunk: gather the contiguous kept run.
        let start = i;
        let mut end = i;
        while end < ops.len() && keep[end] {
            end += 1;
        }
        let old_start = old_line;
        let new_start = new_line;
        let mut body = String::new();
        let mut old_count = 0_usize;
        let mut new_count = 0_usize;
        for op in &ops[start..end] {
            match op {
                LineOp::Equal(text) => {
                    body.push(' ');
                    body.push_str(text);
                    body.push('\n');
                    old_count += 1;
                    new_count += 1;
                    old_line += 1;
                    new_line += 1;
                }
                LineOp::Remove(text) => {
                    body.push('-');
                    body.push_str(text);
                    body.push('\n');
                    old_count += 1;
                    old_line += 1;
                }
                LineOp::Add(text) => {
                    body.push('+');
                    body.push_str(text);
                    body.push('\n');
                    new_count += 1;
                    new_line += 1;
                }
            }
        }
        out.push_str(&format!(
            "@@ -{old_start},{old_count} +{new_start},{new_count} @@\n"
        ));
        out.push_str(&body);
        i = end;
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
