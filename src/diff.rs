//! Line-level diff computation
//!
//! Produces the raw block diff consumed by [`crate::hunk`]. The algorithm
//! trims the common prefix and suffix, finds the Longest Common Subsequence
//! of the remaining lines with dynamic programming, and groups the result
//! into maximal [`DiffPart`] blocks. Between two unchanged blocks, removed
//! lines always come before added lines.
//!
//! The LCS table is quadratic in the size of the changed region. Past
//! [`MAX_LCS_CELLS`] the region is reported as one removed block followed by
//! one added block instead.
//!
//! ## Examples
//!
//! ```rust
//! use forkpoint::diff::{compute_line_diff, has_changes};
//!
//! let parts = compute_line_diff("a\nb\nc\n", "a\nX\nc\n");
//! assert_eq!(parts.len(), 4);
//! assert!(parts[1].removed && parts[2].added);
//! assert!(has_changes(&parts));
//! ```

use crate::types::DiffPart;
use tracing::warn;

/// Largest LCS table (old lines x new lines) computed before falling back to
/// a whole-region replacement
pub const MAX_LCS_CELLS: usize = 16_000_000;

/// A single line operation before grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeOp {
    Keep(usize),   // old_line_idx
    Delete(usize), // old_line_idx
    Insert(usize), // new_line_idx
}

/// Compute the block diff between two texts
///
/// Lines are split with `str::lines`, so a trailing newline never produces
/// an empty final line. Every line in a block's `value` ends with `\n`.
pub fn compute_line_diff(old: &str, new: &str) -> Vec<DiffPart> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    if old_lines.is_empty() && new_lines.is_empty() {
        return Vec::new();
    }

    let prefix = old_lines
        .iter()
        .zip(&new_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old_lines.len().min(new_lines.len()) - prefix;
    let suffix = old_lines
        .iter()
        .rev()
        .zip(new_lines.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old_lines[prefix..old_lines.len() - suffix];
    let new_mid = &new_lines[prefix..new_lines.len() - suffix];

    let mut ops: Vec<ChangeOp> = (0..prefix).map(ChangeOp::Keep).collect();
    for op in compute_changes(old_mid, new_mid) {
        ops.push(match op {
            ChangeOp::Keep(i) => ChangeOp::Keep(prefix + i),
            ChangeOp::Delete(i) => ChangeOp::Delete(prefix + i),
            ChangeOp::Insert(j) => ChangeOp::Insert(prefix + j),
        });
    }
    let old_tail = old_lines.len() - suffix;
    ops.extend((old_tail..old_lines.len()).map(ChangeOp::Keep));

    group_blocks(&ops, &old_lines, &new_lines)
}

/// Whether any block adds or removes lines
pub fn has_changes(parts: &[DiffPart]) -> bool {
    parts.iter().any(DiffPart::is_change)
}

fn compute_changes(old_lines: &[&str], new_lines: &[&str]) -> Vec<ChangeOp> {
    if old_lines.is_empty() {
        return (0..new_lines.len()).map(ChangeOp::Insert).collect();
    }
    if new_lines.is_empty() {
        return (0..old_lines.len()).map(ChangeOp::Delete).collect();
    }

    if old_lines.len().saturating_mul(new_lines.len()) > MAX_LCS_CELLS {
        warn!(
            "Changed region too large to align ({} x {} lines); diffing as a full replacement",
            old_lines.len(),
            new_lines.len()
        );
        return (0..old_lines.len())
            .map(ChangeOp::Delete)
            .chain((0..new_lines.len()).map(ChangeOp::Insert))
            .collect();
    }

    let lcs = compute_lcs(old_lines, new_lines);
    lcs_to_changes(&lcs, old_lines.len(), new_lines.len())
}

/// Longest common subsequence as (old_idx, new_idx) pairs
fn compute_lcs(old_lines: &[&str], new_lines: &[&str]) -> Vec<(usize, usize)> {
    let m = old_lines.len();
    let n = new_lines.len();

    let mut dp = vec![vec![0u32; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if old_lines[i - 1] == new_lines[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    let mut lcs = Vec::new();
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if old_lines[i - 1] == new_lines[j - 1] {
            lcs.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] > dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }

    lcs.reverse();
    lcs
}

fn lcs_to_changes(lcs: &[(usize, usize)], old_len: usize, new_len: usize) -> Vec<ChangeOp> {
    let mut changes = Vec::with_capacity(old_len.max(new_len));
    let (mut old_idx, mut new_idx) = (0, 0);

    for &(lcs_old, lcs_new) in lcs {
        changes.extend((old_idx..lcs_old).map(ChangeOp::Delete));
        changes.extend((new_idx..lcs_new).map(ChangeOp::Insert));
        changes.push(ChangeOp::Keep(lcs_old));
        old_idx = lcs_old + 1;
        new_idx = lcs_new + 1;
    }
    changes.extend((old_idx..old_len).map(ChangeOp::Delete));
    changes.extend((new_idx..new_len).map(ChangeOp::Insert));

    changes
}

/// Merge runs of same-kind operations into blocks
///
/// Within a run of changes, deletions are collected before insertions so a
/// replaced region always reads as one removed block followed by one added
/// block.
fn group_blocks(ops: &[ChangeOp], old_lines: &[&str], new_lines: &[&str]) -> Vec<DiffPart> {
    let mut parts = Vec::new();
    let mut kept = String::new();
    let mut removed = String::new();
    let mut added = String::new();

    let flush_changes = |parts: &mut Vec<DiffPart>, removed: &mut String, added: &mut String| {
        if !removed.is_empty() {
            parts.push(DiffPart::removed(std::mem::take(removed)));
        }
        if !added.is_empty() {
            parts.push(DiffPart::added(std::mem::take(added)));
        }
    };

    for op in ops {
        match *op {
            ChangeOp::Keep(i) => {
                flush_changes(&mut parts, &mut removed, &mut added);
                push_line(&mut kept, old_lines[i]);
            }
            ChangeOp::Delete(i) => {
                if !kept.is_empty() {
                    parts.push(DiffPart::unchanged(std::mem::take(&mut kept)));
                }
                push_line(&mut removed, old_lines[i]);
            }
            ChangeOp::Insert(j) => {
                if !kept.is_empty() {
                    parts.push(DiffPart::unchanged(std::mem::take(&mut kept)));
                }
                push_line(&mut added, new_lines[j]);
            }
        }
    }

    flush_changes(&mut parts, &mut removed, &mut added);
    if !kept.is_empty() {
        parts.push(DiffPart::unchanged(kept));
    }
    parts
}

fn push_line(block: &mut String, line: &str) {
    block.push_str(line);
    block.push('\n');
}
