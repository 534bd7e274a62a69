//! Integration tests for Forkpoint
//!
//! Exercises whole debugging sessions: checkpoints on one branch, forks
//! after a restore, the change detector, summaries and session transfer.

use super::{DebugHarness, RecordingSummary, StalledSummary};
use ::forkpoint::*;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_linear_checkpoints_stay_on_main() {
    let mut h = DebugHarness::new("print('v0')\n");
    let first = h.edit_and_run("print('v1')\n").await;
    let second = h.edit_and_run("print('v2')\n").await;

    let graph = h.session.graph();
    assert_eq!(graph.get(first).unwrap().branch_id, "main");
    assert_eq!(graph.get(second).unwrap().branch_id, "main");
    assert_eq!(graph.get(second).unwrap().parent, Some(first));
    assert_eq!(graph.active_node(), second);

    let repo = h.session.repository();
    assert_eq!(h.session.store().list_branches(repo).unwrap(), vec!["main".to_string()]);
    let tip = h.session.store().branch_tip(repo, "main").unwrap();
    assert_eq!(tip.as_deref(), Some(graph.get(second).unwrap().commit_id.as_str()));
}

#[tokio::test]
async fn test_restore_round_trip_is_byte_identical() {
    let mut h = DebugHarness::new("def f():\n    return 0\n");
    let first = h.edit_and_run("def f():\n    return 1\n").await;
    let second = h.edit_and_run("def f():\n    return [1, 2]\n\nprint(f())\n").await;
    let at_second = h.read();

    h.session.restore(first).unwrap();
    assert_eq!(h.read(), b"def f():\n    return 1\n");
    assert_eq!(h.session.graph().active_node(), first);

    h.session.restore(second).unwrap();
    assert_eq!(h.read(), at_second);
    assert_eq!(h.session.graph().active_node(), second);
}

#[tokio::test]
async fn test_second_child_forks_exactly_one_branch() {
    let mut h = DebugHarness::new("x = 0\n");
    let first = h.edit_and_run("x = 1\n").await;
    let first_commit = h.session.graph().get(first).unwrap().commit_id.clone();

    h.session.restore(ROOT_ID).unwrap();
    let before = h.session.store().list_branches(h.session.repository()).unwrap();
    let second = h.edit_and_run("x = 2\n").await;
    let after = h.session.store().list_branches(h.session.repository()).unwrap();

    assert_eq!(after.len(), before.len() + 1);
    let graph = h.session.graph();
    let fork = &graph.get(second).unwrap().branch_id;
    assert!(fork.starts_with("main.2-"), "unexpected fork name {}", fork);
    assert!(after.contains(fork));

    // The first child keeps its branch and commit
    assert_eq!(graph.get(first).unwrap().branch_id, "main");
    let tip = h.session.store().branch_tip(h.session.repository(), "main").unwrap();
    assert_eq!(tip, Some(first_commit));
    assert_eq!(graph.get(ROOT_ID).unwrap().children, vec![first, second]);
}

#[tokio::test]
async fn test_fork_of_fork_uses_base_name() {
    let mut h = DebugHarness::new("x = 0\n");
    h.edit_and_run("x = 1\n").await;
    h.session.restore(ROOT_ID).unwrap();
    let fork = h.edit_and_run("x = 2\n").await;

    h.edit_and_run("x = 3\n").await;
    h.session.restore(fork).unwrap();
    let nested = h.edit_and_run("x = 4\n").await;

    let branch = &h.session.graph().get(nested).unwrap().branch_id;
    assert!(branch.starts_with("main.2-"), "unexpected nested fork name {}", branch);
    assert_ne!(branch, &h.session.graph().get(fork).unwrap().branch_id);
}

#[tokio::test]
async fn test_continuing_from_restored_tip_reuses_branch() {
    let mut h = DebugHarness::new("x = 0\n");
    let first = h.edit_and_run("x = 1\n").await;
    h.session.restore(ROOT_ID).unwrap();
    h.session.restore(first).unwrap();

    let next = h.edit_and_run("x = 5\n").await;
    assert_eq!(h.session.graph().get(next).unwrap().branch_id, "main");
    assert_eq!(h.session.store().list_branches(h.session.repository()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_restore_keeps_untracked_files_and_stashes_edits() {
    let mut h = DebugHarness::new("a = 1\n");
    let first = h.edit_and_run("a = 2\n").await;
    fs::write(h.dir.path().join("notes.txt"), "scratch\n").unwrap();
    h.write("a = 3  # unsaved idea\n");

    h.session.restore(ROOT_ID).unwrap();

    assert_eq!(h.read(), b"a = 1\n");
    assert_eq!(fs::read_to_string(h.dir.path().join("notes.txt")).unwrap(), "scratch\n");

    let stashes = h.session.store().list_stashes(h.session.repository()).unwrap();
    assert_eq!(stashes.len(), 1);
    assert_eq!(stashes[0].reason, "before restoring checkpoint 0");
    assert_eq!(stashes[0].branch, "main");
    assert!(stashes[0].files.contains_key("main.py"));
    assert!(h.session.graph().get(first).unwrap().visible);
}

#[tokio::test]
async fn test_hidden_checkpoint_cannot_be_restored() {
    let mut h = DebugHarness::new("a = 1\n");
    let first = h.edit_and_run("a = 2\n").await;
    h.session.restore(ROOT_ID).unwrap();
    h.session.set_visible(first, false).unwrap();

    assert!(matches!(h.session.restore(first), Err(ForkpointError::NodeHidden(_))));
    assert!(h.session.graph().tree_rows(false).iter().all(|r| r.node.id != first));

    h.session.set_visible(first, true).unwrap();
    h.session.restore(first).unwrap();
    assert_eq!(h.read(), b"a = 2\n");
}

#[tokio::test]
async fn test_checkpoint_records_hunks_and_output() {
    let mut h = DebugHarness::new("a\nb\nc\n");
    let id = h.edit_and_run("a\nX\nc\n").await;

    let node = h.session.graph().get(id).unwrap();
    assert_eq!(node.run_output, "a\nX\nc\n");
    assert_eq!(node.diffs.len(), 1);
    let kinds: Vec<LineKind> = node.diffs[0].lines.iter().map(|l| l.kind).collect();
    assert_eq!(
        kinds,
        vec![LineKind::Context, LineKind::Delete, LineKind::Add, LineKind::Context]
    );
    assert_eq!(node.text, "Changed 1 line (+1 -1)");
}

#[tokio::test]
async fn test_summary_service_receives_unified_diff() {
    let service = Arc::new(RecordingSummary::default());
    let mut h = DebugHarness::with_builder("print('v0')\n", |b| b.summary_service(service.clone()));
    let id = h.edit_and_run("print('v1')\n").await;

    assert_eq!(h.session.graph().get(id).unwrap().text, "Summary #1");
    let requests = service.requests.lock();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].contains("@@ -1,1 +1,1 @@"));
    assert!(requests[0].contains("-print('v0')"));
    assert!(requests[0].contains("+print('v1')"));
}

#[tokio::test]
async fn test_stalled_summary_falls_back() {
    let mut h = DebugHarness::with_builder("x = 0\n", |b| {
        b.summary_service(Arc::new(StalledSummary)).summary_timeout(Duration::from_millis(50))
    });
    let id = h.edit_and_run("x = 1\n").await;

    let node = h.session.graph().get(id).unwrap();
    assert_eq!(node.text, FALLBACK_SUMMARY);
    assert!(!node.commit_id.is_empty());
    assert_eq!(h.session.graph().active_node(), id);
}

#[tokio::test]
async fn test_events_follow_checkpoint_lifecycle() {
    let mut h = DebugHarness::new("x = 0\n");
    let mut events = h.session.subscribe();
    let id = h.edit_and_run("x = 1\n").await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen[0], GraphEvent::NodeCreated { id: created, parent: Some(0), .. } if created == id));
    assert!(matches!(seen[1], GraphEvent::CommitAttached { .. }));
    assert!(matches!(seen[2], GraphEvent::SummaryUpdated { .. }));
    assert!(matches!(seen[3], GraphEvent::ActiveChanged { id: active, previous: 0 } if active == id));
}

#[tokio::test]
async fn test_two_triggers_without_edit_create_one_checkpoint() {
    let h = DebugHarness::new("print('v0')\n");
    let tracked = h.tracked();
    h.write("print('v1')\n");

    let session = h.session.into_shared();
    let editor = Arc::new(StaticEditor::new(tracked.clone()));
    let (mut detector, handle) = ChangeDetector::new(session.clone(), editor, Duration::from_millis(10));

    handle.file_saved(tracked.clone());
    handle.executed();
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::Checkpointed(1));

    handle.file_saved(tracked.clone());
    handle.executed();
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::Unchanged);
    assert_eq!(detector.pending(), PendingTrigger::default());

    assert_eq!(session.lock().await.graph().node_count(), 2);
}

#[tokio::test]
async fn test_execution_without_save_is_discarded() {
    let h = DebugHarness::new("print('v0')\n");
    let tracked = h.tracked();
    h.write("print('v1')\n");

    let session = h.session.into_shared();
    let editor = Arc::new(StaticEditor::new(tracked.clone()));
    let (mut detector, handle) = ChangeDetector::new(session.clone(), editor, Duration::from_millis(10));

    handle.executed();
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::DiscardedExecution);

    // The discarded execution does not pair with a later save
    handle.file_saved(tracked);
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::Idle);
    assert_eq!(session.lock().await.graph().node_count(), 1);
}

#[tokio::test]
async fn test_restore_completed_cancels_save() {
    let h = DebugHarness::new("print('v0')\n");
    let tracked = h.tracked();
    h.write("print('v1')\n");

    let session = h.session.into_shared();
    let editor = Arc::new(StaticEditor::new(tracked.clone()));
    let (mut detector, handle) = ChangeDetector::new(session, editor, Duration::from_millis(10));

    handle.file_saved(tracked);
    handle.restore_completed();
    handle.executed();
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::DiscardedExecution);
}

#[tokio::test]
async fn test_detector_rejects_unsupported_file() {
    let h = DebugHarness::new("print('v0')\n");
    let notes = h.dir.path().join("notes.txt");
    fs::write(&notes, "not python\n").unwrap();

    let mut events = h.session.subscribe();
    let session = h.session.into_shared();
    let (mut detector, handle) =
        ChangeDetector::new(session.clone(), Arc::new(StaticEditor::new(notes.clone())), Duration::from_millis(10));

    handle.file_saved(notes);
    handle.executed();
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::Rejected);
    assert_eq!(detector.pending(), PendingTrigger::default());

    let notice = events.try_recv().unwrap();
    assert!(matches!(notice, GraphEvent::Notice { level: NoticeLevel::Error, .. }));
    assert_eq!(session.lock().await.graph().node_count(), 1);
}

#[tokio::test]
async fn test_detector_without_active_file() {
    let h = DebugHarness::new("print('v0')\n");
    let tracked = h.tracked();
    let session = h.session.into_shared();
    let (mut detector, handle) =
        ChangeDetector::new(session, Arc::new(StaticEditor::none()), Duration::from_millis(10));

    handle.file_saved(tracked);
    handle.executed();
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::Rejected);
}

#[tokio::test]
async fn test_saving_another_file_does_not_arm_trigger() {
    let h = DebugHarness::new("print('v0')\n");
    let tracked = h.tracked();
    let notes = h.dir.path().join("notes.txt");
    fs::write(&notes, "todo\n").unwrap();
    h.write("print('v1')\n");

    let session = h.session.into_shared();
    let (mut detector, handle) =
        ChangeDetector::new(session.clone(), Arc::new(StaticEditor::new(tracked)), Duration::from_millis(10));

    handle.file_saved(notes);
    handle.executed();
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::DiscardedExecution);
    assert_eq!(detector.pending(), PendingTrigger::default());
    assert_eq!(session.lock().await.graph().node_count(), 1);
}

#[tokio::test]
async fn test_newline_only_edit_is_unchanged() {
    let h = DebugHarness::new("print('v0')");
    let tracked = h.tracked();
    h.write("print('v0')\n");

    let session = h.session.into_shared();
    let (mut detector, handle) = ChangeDetector::new(
        session.clone(),
        Arc::new(StaticEditor::new(tracked.clone())),
        Duration::from_millis(10),
    );

    handle.file_saved(tracked);
    handle.executed();
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::Unchanged);
    assert_eq!(session.lock().await.graph().node_count(), 1);
}

#[tokio::test]
async fn test_restore_in_same_process_cancels_its_save() {
    let mut h = DebugHarness::new("print('v0')\n");
    h.edit_and_run("print('v1')\n").await;
    let tracked = h.tracked();

    let session = h.session.into_shared();
    let (mut detector, handle) = ChangeDetector::new(
        session.clone(),
        Arc::new(StaticEditor::new(tracked.clone())),
        Duration::from_millis(10),
    );

    // The editor reports the restore's own write as a save
    session.lock().await.restore(ROOT_ID).unwrap();
    handle.file_saved(tracked);
    handle.executed();
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::DiscardedExecution);

    let session = session.lock().await;
    assert_eq!(session.graph().node_count(), 2);
    assert_eq!(session.graph().active_node(), ROOT_ID);
}

#[tokio::test]
async fn test_restore_from_another_session_is_not_an_edit() {
    let mut h = DebugHarness::new("print('v0')\n");
    let first = h.edit_and_run("print('v1')\n").await;
    assert_eq!(first, 1);
    let tracked = h.tracked();
    let DebugHarness { dir, session } = h;

    let session = session.into_shared();
    let (mut detector, handle) = ChangeDetector::new(
        session.clone(),
        Arc::new(StaticEditor::new(tracked.clone())),
        Duration::from_millis(10),
    );

    // e.g. `forkpoint restore 0` while `forkpoint watch` is running
    let mut other = Session::open(dir.path()).unwrap();
    other.restore(ROOT_ID).unwrap();
    assert_eq!(fs::read_to_string(&tracked).unwrap(), "print('v0')\n");

    handle.file_saved(tracked.clone());
    handle.executed();
    assert_eq!(detector.tick().await.unwrap(), TickOutcome::Unchanged);

    let on_disk = CheckpointGraph::load(&other.config().graph_path()).unwrap();
    assert_eq!(on_disk.node_count(), 2);
    assert_eq!(on_disk.active_node(), ROOT_ID);
    assert_eq!(session.lock().await.graph().active_node(), ROOT_ID);

    // The next real edit hangs off the restored node
    fs::write(&tracked, "print('v2')\n").unwrap();
    handle.file_saved(tracked);
    handle.executed();
    let id = match detector.tick().await.unwrap() {
        TickOutcome::Checkpointed(id) => id,
        outcome => panic!("expected a checkpoint, got {:?}", outcome),
    };
    assert_eq!(session.lock().await.graph().get(id).unwrap().parent, Some(ROOT_ID));
}

#[tokio::test]
async fn test_detector_loop_stops_on_shutdown() {
    let h = DebugHarness::new("print('v0')\n");
    let tracked = h.tracked();
    h.write("print('v1')\n");

    let session = h.session.into_shared();
    let (detector, handle) = ChangeDetector::new(
        session.clone(),
        Arc::new(StaticEditor::new(tracked.clone())),
        Duration::from_millis(10),
    );
    handle.file_saved(tracked);
    handle.executed();

    detector.run(tokio::time::sleep(Duration::from_millis(200))).await;
    assert_eq!(session.lock().await.graph().node_count(), 2);
    assert!(!handle.executed(), "queue should close once the detector is dropped");
}

#[tokio::test]
async fn test_export_import_reproduces_session() {
    let mut source = DebugHarness::new("v = 0\n");
    source.edit_and_run("v = 1\n").await;
    source.session.restore(ROOT_ID).unwrap();
    source.edit_and_run("v = 2\n").await;
    let expected_content = source.read();

    let export_dir = TempDir::new().unwrap();
    source.session.export(export_dir.path()).unwrap();
    assert!(export_dir.path().join("graph.json").is_file());
    assert!(export_dir.path().join("store/HEAD").is_file());
    assert!(export_dir.path().join("main.py").is_file());

    let mut target = DebugHarness::new("unrelated = True\n");
    target.session.import(export_dir.path()).unwrap();

    let (src, dst) = (source.session.graph(), target.session.graph());
    assert_eq!(dst.active_node(), src.active_node());
    assert_eq!(dst.node_count(), src.node_count());
    let texts = |g: &CheckpointGraph| g.nodes().map(|n| n.text.clone()).collect::<Vec<_>>();
    assert_eq!(texts(dst), texts(src));
    assert_eq!(target.read(), expected_content);

    // The imported history is usable
    target.session.restore(1).unwrap();
    assert_eq!(target.read(), b"v = 1\n");
}

#[tokio::test]
async fn test_import_rejects_invalid_export() {
    let mut h = DebugHarness::new("v = 0\n");
    h.edit_and_run("v = 1\n").await;

    let bogus = TempDir::new().unwrap();
    fs::write(bogus.path().join("graph.json"), r#"{"root":3,"nodeCount":1,"activeNode":3,"nodes":{}}"#).unwrap();

    assert!(h.session.import(bogus.path()).is_err());
    // Local state untouched
    assert_eq!(h.session.graph().node_count(), 2);
    assert_eq!(h.read(), b"v = 1\n");
}

#[tokio::test]
async fn test_reopen_continues_session() {
    let mut h = DebugHarness::new("n = 0\n");
    h.edit_and_run("n = 1\n").await;

    let reopened = SessionBuilder::new(h.dir.path(), "ignored.py")
        .runner(Arc::new(super::EchoRunner))
        .open()
        .unwrap();
    h.session = reopened;

    let next = h.edit_and_run("n = 2\n").await;
    assert_eq!(next, 2);
    assert_eq!(h.session.config().tracked_file, std::path::PathBuf::from("main.py"));
    assert_eq!(h.session.graph().get(next).unwrap().parent, Some(1));
}

#[tokio::test]
async fn test_diff_between_checkpoints() {
    let mut h = DebugHarness::new("a\nb\nc\n");
    h.edit_and_run("a\nB\nc\n").await;
    let last = h.edit_and_run("a\nB\nc\nd\n").await;

    let hunks = h.session.diff_nodes(ROOT_ID, last).unwrap();
    let rendered = render_unified(&hunks);
    assert!(rendered.contains("-b"));
    assert!(rendered.contains("+B"));
    assert!(rendered.contains("+d"));
    assert!(h.session.diff_nodes(last, last).unwrap().is_empty());
}
