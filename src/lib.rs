//! # Forkpoint - Branching checkpoints for debugging sessions
//!
//! Forkpoint records every run of the file you are debugging as a checkpoint
//! and arranges those checkpoints into a tree. Going back to an earlier
//! checkpoint and trying something different forks a new branch instead of
//! discarding what came after, so every attempt stays reachable.
//!
//! ## Overview
//!
//! - Each checkpoint is backed by a commit in a small, content-addressed
//!   version store living next to the working directory
//! - The first child of a checkpoint continues its parent's branch; every
//!   later child gets a branch of its own
//! - Checkpoints carry the line diff against their parent, clamped into
//!   hunks, plus a one-line summary
//! - Restoring a checkpoint stashes uncommitted edits first and leaves
//!   untracked files alone
//! - A change detector creates checkpoints when the tracked file is saved
//!   and run
//!
//! ## Architecture
//!
//! - **Diff engine** ([`diff`], [`hunk`]): line-level LCS diff and hunk
//!   construction with context lines and clamping
//! - **Version store** ([`version_store`]): branches, commits, checkout and
//!   stashes over a sharded object store with optional LZ4 compression
//! - **Checkpoint graph** ([`graph`]): the node tree, its invariants and the
//!   event stream a presentation layer subscribes to
//! - **Session** ([`session`]): orchestration of checkpoint, restore and
//!   export/import on top of the store and the graph
//! - **Detector** ([`detector`]): signal queue and tick loop deciding when a
//!   checkpoint is due
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use forkpoint::{SessionBuilder, ChangeDetector, StaticEditor};
//! use std::sync::Arc;
//!
//! # async fn example() -> forkpoint::Result<()> {
//! let session = SessionBuilder::new("./project", "main.py")
//!     .init("Debugging main.py")?
//!     .into_shared();
//!
//! let editor = Arc::new(StaticEditor::new("./project/main.py"));
//! let (detector, handle) =
//!     ChangeDetector::new(session.clone(), editor, std::time::Duration::from_secs(1));
//!
//! // Editor and terminal integrations report what happened
//! handle.file_saved("./project/main.py");
//! handle.executed();
//!
//! detector.run(tokio::time::sleep(std::time::Duration::from_secs(60))).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, ForkpointError>`. Precondition errors
//! (no active file, wrong file type, no workspace) are surfaced as notices and
//! never retried; version-store errors leave the affected node pending.
//!
//! ## Module Organization
//!
//! - [`session`]: the main entry point
//! - [`graph`]: checkpoint tree and events
//! - [`version_store`]: commit history
//! - [`diff`] and [`hunk`]: change computation
//! - [`runner`] and [`summary`]: collaborators for running and describing
//! - [`detector`]: automatic checkpoint triggering
//! - [`types`]: shared data structures
//! - [`error`]: error types

// Public API modules
pub mod compression;
pub mod detector;
pub mod diff;
pub mod error;
pub mod graph;
pub mod hunk;
pub mod runner;
pub mod session;
pub mod summary;
pub mod types;
pub mod version_store;

// Internal modules
mod file_tracking;
mod store;
mod utils;

// Re-export main types for convenience
pub use compression::{CompressionEngine, CompressionStrategy};
pub use detector::{
    decide, should_checkpoint, ChangeDetector, DetectorHandle, EditorContext, LastSeenStore,
    save_concerns, PendingTrigger, Signal, StaticEditor, TickAction, TickOutcome,
};
pub use diff::compute_line_diff;
pub use error::{ForkpointError, Result};
pub use graph::{CheckpointGraph, GraphStats, TreeRow, ROOT_ID};
pub use hunk::{build_hunks, clamp, render_unified};
pub use runner::{truncate_output, CommandRunner, ScriptRunner};
pub use session::{fork_branch_name, Session, SessionBuilder, SharedSession};
pub use summary::{summarize_with_timeout, SummaryService, FALLBACK_SUMMARY};
pub use types::*;
pub use utils::format_bytes;
pub use version_store::{StashEntry, VersionStore};
