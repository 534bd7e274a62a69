//! Property-based testing for Forkpoint
//!
//! Uses proptest to check diff, hunk and graph invariants over randomly
//! generated texts and edit sequences.

use ::forkpoint::hunk::count_changes;
use ::forkpoint::*;
use proptest::prelude::*;

/// Generate a text of short lines drawn from a small alphabet so edits collide
fn text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[abc]{0,3}", 0..30).prop_map(|lines| {
        lines.into_iter().map(|l| format!("{}\n", l)).collect()
    })
}

/// Generate a hunk line
fn hunk_line_strategy() -> impl Strategy<Value = HunkLine> {
    (0..3u8, "[a-z]{0,8}", 1..500usize).prop_map(|(kind, text, n)| match kind {
        0 => HunkLine::context(text, n, n),
        1 => HunkLine::add(text, n),
        _ => HunkLine::delete(text, n),
    })
}

/// Count lines in changed parts of a block diff
fn changed_lines(parts: &[DiffPart]) -> (usize, usize) {
    parts.iter().fold((0, 0), |(added, removed), part| {
        let n = part.lines().len();
        match (part.added, part.removed) {
            (true, _) => (added + n, removed),
            (_, true) => (added, removed + n),
            _ => (added, removed),
        }
    })
}

/// Rebuild one side of a diff from its parts
fn side(parts: &[DiffPart], new: bool) -> String {
    parts
        .iter()
        .filter(|p| if new { !p.removed } else { !p.added })
        .map(|p| p.value.as_str())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_identical_texts_have_no_hunks(text in text_strategy(), ctx in 0..5usize) {
        let parts = compute_line_diff(&text, &text);
        prop_assert!(!diff::has_changes(&parts));
        prop_assert!(build_hunks(&parts, ctx).is_empty());
    }

    #[test]
    fn prop_diff_reconstructs_both_sides(old in text_strategy(), new in text_strategy()) {
        let parts = compute_line_diff(&old, &new);
        prop_assert_eq!(side(&parts, false), old);
        prop_assert_eq!(side(&parts, true), new);
        prop_assert!(parts.iter().all(|p| !(p.added && p.removed)));
    }

    #[test]
    fn prop_every_change_lands_in_one_hunk(
        old in text_strategy(),
        new in text_strategy(),
        ctx in 0..4usize,
    ) {
        let parts = compute_line_diff(&old, &new);
        let hunks = build_hunks(&parts, ctx);

        prop_assert_eq!(count_changes(&hunks), changed_lines(&parts));
        for hunk in &hunks {
            prop_assert!(hunk.lines.iter().any(|l| l.kind != LineKind::Context));
            prop_assert!(hunk.old_start >= 1 && hunk.new_start >= 1);
        }
    }

    #[test]
    fn prop_clamp_bounds_and_preserves_ends(
        lines in prop::collection::vec(hunk_line_strategy(), 0..200),
        max in 2..60usize,
    ) {
        let hunk = Hunk { old_start: 1, new_start: 1, lines: lines.clone() };
        let clamped = clamp(hunk.clone(), max);

        prop_assert!(clamped.lines.len() <= max + 1);
        if lines.len() <= max {
            prop_assert_eq!(clamped, hunk);
        } else {
            let half = max / 2;
            prop_assert_eq!(&clamped.lines[..half], &lines[..half]);
            prop_assert_eq!(&clamped.lines[clamped.lines.len() - half..], &lines[lines.len() - half..]);
            prop_assert!(clamped.lines[half].is_elision());
        }
    }

    #[test]
    fn prop_graph_ids_strictly_increase(parents in prop::collection::vec(any::<prop::sample::Index>(), 1..40)) {
        let mut graph = CheckpointGraph::new("root");
        let mut ids = vec![ROOT_ID];

        for pick in parents {
            let parent = *pick.get(&ids);
            let id = graph.create_child(parent, "node", "", "").unwrap();
            prop_assert!(id > *ids.iter().max().unwrap());
            ids.push(id);
        }

        prop_assert_eq!(graph.node_count(), ids.len() as u64);
        prop_assert_eq!(graph.nodes().filter(|n| n.parent.is_none()).count(), 1);
        prop_assert_eq!(graph.root(), ROOT_ID);
        prop_assert!(CheckpointGraph::from_snapshot(graph.snapshot()).is_ok());
    }
}
