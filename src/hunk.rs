//! Hunk construction from block diffs
//!
//! Turns the raw [`DiffPart`] blocks produced by [`crate::diff`] into
//! context-bounded [`Hunk`]s suitable for review, and clamps oversized hunks
//! so a single checkpoint never carries an unbounded patch.
//!
//! ## Context handling
//!
//! Unchanged blocks are never emitted on their own. The first
//! `context_lines` lines of an unchanged block close the hunk before it as
//! trailing context, and its last `context_lines` lines open the next hunk as
//! leading context. A block shorter than `context_lines` serves as both, so
//! two hunks separated by a short unchanged run may share lines.
//!
//! ## Examples
//!
//! ```rust
//! use forkpoint::diff::compute_line_diff;
//! use forkpoint::hunk::{build_hunks, clamp};
//!
//! let parts = compute_line_diff("a\nb\nc\n", "a\nX\nc\n");
//! let hunks = build_hunks(&parts, 1);
//! assert_eq!(hunks.len(), 1);
//! assert_eq!(hunks[0].old_start, 1);
//!
//! let clamped = clamp(hunks[0].clone(), 100);
//! assert_eq!(clamped, hunks[0]);
//! ```

use crate::types::{DiffPart, Hunk, HunkLine, LineKind};
use std::fmt::Write;
use tracing::warn;

/// Hunk under construction
struct OpenHunk {
    old_start: usize,
    new_start: usize,
    lines: Vec<HunkLine>,
}

impl OpenHunk {
    fn build(self) -> Option<Hunk> {
        if self.lines.iter().all(|l| l.kind == LineKind::Context) {
            return None;
        }
        Some(Hunk { old_start: self.old_start, new_start: self.new_start, lines: self.lines })
    }
}

/// Build hunks from a block diff
///
/// `parts` must not contain a block with both `added` and `removed` set.
/// Such input is a programming error: it panics in debug builds and yields
/// no hunks (with a warning) in release builds.
pub fn build_hunks(parts: &[DiffPart], context_lines: usize) -> Vec<Hunk> {
    if let Some(bad) = parts.iter().position(|p| p.added && p.removed) {
        debug_assert!(false, "diff part {} is both added and removed", bad);
        warn!("Malformed diff part {} (both added and removed); no hunks built", bad);
        return Vec::new();
    }

    let mut hunks = Vec::new();
    let mut current: Option<OpenHunk> = None;
    // Leading context candidates from the most recent unchanged block
    let mut leading: Vec<HunkLine> = Vec::new();
    let mut old_line = 1;
    let mut new_line = 1;

    for part in parts {
        let lines = part.lines();

        if part.removed {
            let hunk = current.get_or_insert_with(|| open_hunk(&mut leading, old_line, new_line));
            for text in lines {
                hunk.lines.push(HunkLine::delete(text, old_line));
                old_line += 1;
            }
        } else if part.added {
            let hunk = current.get_or_insert_with(|| open_hunk(&mut leading, old_line, new_line));
            for text in lines {
                hunk.lines.push(HunkLine::add(text, new_line));
                new_line += 1;
            }
        } else {
            let numbered: Vec<HunkLine> = lines
                .iter()
                .enumerate()
                .map(|(i, text)| HunkLine::context(*text, old_line + i, new_line + i))
                .collect();

            if let Some(mut hunk) = current.take() {
                hunk.lines.extend(numbered.iter().take(context_lines).cloned());
                hunks.extend(hunk.build());
            }

            let skip = numbered.len().saturating_sub(context_lines);
            leading = numbered.into_iter().skip(skip).collect();

            old_line += lines.len();
            new_line += lines.len();
        }
    }

    if let Some(hunk) = current.take() {
        hunks.extend(hunk.build());
    }
    hunks
}

fn open_hunk(leading: &mut Vec<HunkLine>, old_line: usize, new_line: usize) -> OpenHunk {
    let lines = std::mem::take(leading);
    let (old_start, new_start) = match lines.first() {
        Some(first) => (
            first.old_line_no.unwrap_or(old_line),
            first.new_line_no.unwrap_or(new_line),
        ),
        None => (old_line, new_line),
    };
    OpenHunk { old_start, new_start, lines }
}

/// Bound a hunk to at most `max_lines + 1` lines
///
/// Oversized hunks keep their first and last `max_lines / 2` lines with a
/// single elision line between them.
pub fn clamp(hunk: Hunk, max_lines: usize) -> Hunk {
    if hunk.lines.len() <= max_lines {
        return hunk;
    }

    let half = max_lines / 2;
    let total = hunk.lines.len();
    let mut lines = Vec::with_capacity(half * 2 + 1);
    lines.extend_from_slice(&hunk.lines[..half]);
    lines.push(HunkLine::elision());
    lines.extend_from_slice(&hunk.lines[total - half..]);

    Hunk { lines, ..hunk }
}

/// Render hunks as unified-diff text
pub fn render_unified(hunks: &[Hunk]) -> String {
    let mut out = String::new();
    for hunk in hunks {
        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@",
            hunk.old_start,
            hunk.old_len(),
            hunk.new_start,
            hunk.new_len()
        );
        for line in &hunk.lines {
            let marker = match line.kind {
                LineKind::Context => ' ',
                LineKind::Add => '+',
                LineKind::Delete => '-',
            };
            let _ = writeln!(out, "{}{}", marker, line.text);
        }
    }
    out
}

/// Count (added, deleted) lines across hunks
pub fn count_changes(hunks: &[Hunk]) -> (usize, usize) {
    hunks
        .iter()
        .flat_map(|h| &h.lines)
        .fold((0, 0), |(added, deleted), line| match line.kind {
            LineKind::Add => (added + 1, deleted),
            LineKind::Delete => (added, deleted + 1),
            LineKind::Context => (added, deleted),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_line_diff;

    fn hunks_for(old: &str, new: &str, context: usize) -> Vec<Hunk> {
        build_hunks(&compute_line_diff(old, new), context)
    }

    #[test]
    fn test_single_replacement_with_context() {
        let hunks = hunks_for("a\nb\nc\n", "a\nX\nc\n", 1);
        assert_eq!(hunks.len(), 1);

        let hunk = &hunks[0];
        assert_eq!(hunk.old_start, 1);
        assert_eq!(hunk.new_start, 1);
        assert_eq!(
            hunk.lines,
            vec![
                HunkLine::context("a", 1, 1),
                HunkLine::delete("b", 2),
                HunkLine::add("X", 2),
                HunkLine::context("c", 3, 3),
            ]
        );
    }

    #[test]
    fn test_no_hunks_for_identical_or_empty() {
        assert!(build_hunks(&[], 2).is_empty());
        assert!(hunks_for("same\ntext\n", "same\ntext\n", 2).is_empty());
    }

    #[test]
    fn test_leading_context_limited() {
        let old = "1\n2\n3\n4\n5\n";
        let new = "1\n2\n3\n4\nFIVE\n";
        let hunks = hunks_for(old, new, 2);
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].old_start, 3);
        assert_eq!(hunks[0].new_start, 3);
        assert_eq!(hunks[0].lines.len(), 4);
        assert_eq!(hunks[0].lines.last().map(|l| l.text.as_str()), Some("FIVE"));
    }

    #[test]
    fn test_separate_hunks_share_short_context() {
        let old = "a\nb\nc\n";
        let new = "A\nb\nC\n";
        let hunks = hunks_for(old, new, 2);
        assert_eq!(hunks.len(), 2);
        // "b" closes the first hunk and opens the second
        assert_eq!(hunks[0].lines.last(), Some(&HunkLine::context("b", 2, 2)));
        assert_eq!(hunks[1].lines.first(), Some(&HunkLine::context("b", 2, 2)));
        assert_eq!(hunks[1].old_start, 2);
    }

    #[test]
    fn test_line_numbers_after_insertion() {
        let hunks = hunks_for("a\nb\nc\nd\ne\nf\ng\n", "a\nNEW\nb\nc\nd\ne\nf\ng!\n", 1);
        assert_eq!(hunks.len(), 2);
        let last = &hunks[1];
        assert_eq!(last.old_start, 6);
        assert_eq!(last.new_start, 7);
        assert_eq!(last.lines[1], HunkLine::delete("g", 7));
        assert_eq!(last.lines[2], HunkLine::add("g!", 8));
    }

    #[test]
    fn test_clamp() {
        let parts = vec![DiffPart::added((0..10).map(|i| format!("{}\n", i)).collect::<String>())];
        let hunk = build_hunks(&parts, 2).remove(0);
        let clamped = clamp(hunk.clone(), 4);

        assert_eq!(clamped.lines.len(), 5);
        assert_eq!(clamped.lines[..2], hunk.lines[..2]);
        assert!(clamped.lines[2].is_elision());
        assert_eq!(clamped.lines[3..], hunk.lines[8..]);

        assert_eq!(clamp(hunk.clone(), 100), hunk);
    }

    #[test]
    fn test_render_and_count() {
        let hunks = hunks_for("a\nb\nc\n", "a\nX\nc\n", 1);
        assert_eq!(render_unified(&hunks), "@@ -1,3 +1,3 @@\n a\n-b\n+X\n c\n");
        assert_eq!(count_changes(&hunks), (1, 1));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "both added and removed")]
    fn test_malformed_part_panics_in_debug() {
        let bad = DiffPart { value: "x\n".to_string(), added: true, removed: true };
        build_hunks(&[bad], 2);
    }
}
