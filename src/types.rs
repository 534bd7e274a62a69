//! Core data types used throughout the Forkpoint library
//!
//! This module contains the data structures shared between the diff engine,
//! the version store, the checkpoint graph and the change detector.
//!
//! ## Overview
//!
//! - **Checkpoint graph**: `CheckpointNode`, `GraphSnapshot`, `GraphEvent`
//! - **Diffs**: `DiffPart`, `Hunk`, `HunkLine`, `LineKind`
//! - **Version store**: `RepositoryHandle`, `CommitInfo`, `EmptyCommitPolicy`
//! - **Script runs**: `RunOutput`, `OutputLimits`
//! - **Configuration**: `ForkpointConfig`
//!
//! ## Examples
//!
//! ```rust
//! use forkpoint::types::{CheckpointNode, NodeState};
//!
//! let node = CheckpointNode::new(3, Some(0), "Fix off-by-one".to_string());
//! assert_eq!(node.state(), NodeState::Pending);
//! assert!(node.visible);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kind of a single line inside a hunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Unchanged line shown for orientation
    Context,
    /// Line present only in the new text
    Add,
    /// Line present only in the old text
    Delete,
}

/// One line of a hunk with its position on each side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HunkLine {
    /// Line kind
    pub kind: LineKind,
    /// Line content without its terminator
    pub text: String,
    /// 1-based line number in the old text (context and delete lines)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_line_no: Option<usize>,
    /// 1-based line number in the new text (context and add lines)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_line_no: Option<usize>,
}

impl HunkLine {
    /// Unchanged line present on both sides
    pub fn context(text: impl Into<String>, old_line_no: usize, new_line_no: usize) -> Self {
        Self {
            kind: LineKind::Context,
            text: text.into(),
            old_line_no: Some(old_line_no),
            new_line_no: Some(new_line_no),
        }
    }

    /// Line added in the new text
    pub fn add(text: impl Into<String>, new_line_no: usize) -> Self {
        Self {
            kind: LineKind::Add,
            text: text.into(),
            old_line_no: None,
            new_line_no: Some(new_line_no),
        }
    }

    /// Line removed from the old text
    pub fn delete(text: impl Into<String>, old_line_no: usize) -> Self {
        Self {
            kind: LineKind::Delete,
            text: text.into(),
            old_line_no: Some(old_line_no),
            new_line_no: None,
        }
    }

    /// Elision marker inserted by clamping
    pub fn elision() -> Self {
        Self {
            kind: LineKind::Context,
            text: "…".to_string(),
            old_line_no: None,
            new_line_no: None,
        }
    }

    /// Whether this line is an elision marker
    pub fn is_elision(&self) -> bool {
        self.kind == LineKind::Context && self.old_line_no.is_none() && self.new_line_no.is_none()
    }
}

/// A contiguous, context-bounded region of a diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    /// 1-based line in the old text where the hunk begins
    pub old_start: usize,
    /// 1-based line in the new text where the hunk begins
    pub new_start: usize,
    /// Lines in display order
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Number of old-side lines covered by the hunk
    pub fn old_len(&self) -> usize {
        self.lines.iter().filter(|l| l.old_line_no.is_some()).count()
    }

    /// Number of new-side lines covered by the hunk
    pub fn new_len(&self) -> usize {
        self.lines.iter().filter(|l| l.new_line_no.is_some()).count()
    }
}

/// A block of a line-level diff
///
/// An unchanged block has both flags false. `value` holds the block's lines,
/// each terminated by `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffPart {
    /// Block text
    pub value: String,
    /// Lines only in the new text
    pub added: bool,
    /// Lines only in the old text
    pub removed: bool,
}

impl DiffPart {
    /// Unchanged block
    pub fn unchanged(value: impl Into<String>) -> Self {
        Self { value: value.into(), added: false, removed: false }
    }

    /// Added block
    pub fn added(value: impl Into<String>) -> Self {
        Self { value: value.into(), added: true, removed: false }
    }

    /// Removed block
    pub fn removed(value: impl Into<String>) -> Self {
        Self { value: value.into(), added: false, removed: true }
    }

    /// Whether the block changes anything
    pub fn is_change(&self) -> bool {
        self.added || self.removed
    }

    /// Lines of the block; a trailing terminator does not yield an empty line
    pub fn lines(&self) -> Vec<&str> {
        self.value.lines().collect()
    }
}

/// Commit state of a checkpoint node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Created, no commit attached yet
    Pending,
    /// Commit attached; terminal
    Committed,
}

/// A checkpoint in the debugging tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointNode {
    /// Unique, monotonically assigned id
    pub id: u64,
    /// Human-readable label or summary
    pub text: String,
    /// Snapshot id; empty until the first commit
    #[serde(default)]
    pub commit_id: String,
    /// Branch the snapshot lives on
    #[serde(default)]
    pub branch_id: String,
    /// Parent node (None only for the root)
    #[serde(default)]
    pub parent: Option<u64>,
    /// Children in creation order
    #[serde(default)]
    pub children: Vec<u64>,
    /// Soft-delete flag
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Hunks from the parent checkpoint to this one
    #[serde(default)]
    pub diffs: Vec<Hunk>,
    /// Truncated standard output of the producing run
    #[serde(default)]
    pub run_output: String,
    /// Truncated standard error of the producing run
    #[serde(default)]
    pub run_error: String,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Presentation-only expansion flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded: Option<bool>,
    /// Presentation-only layout data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<serde_json::Value>,
}

fn default_visible() -> bool {
    true
}

impl CheckpointNode {
    /// Create a pending, visible node
    pub fn new(id: u64, parent: Option<u64>, text: String) -> Self {
        Self {
            id,
            text,
            commit_id: String::new(),
            branch_id: String::new(),
            parent,
            children: Vec::new(),
            visible: true,
            diffs: Vec::new(),
            run_output: String::new(),
            run_error: String::new(),
            created_at: Utc::now(),
            expanded: None,
            layout: None,
        }
    }

    /// Current commit state
    pub fn state(&self) -> NodeState {
        if self.commit_id.is_empty() {
            NodeState::Pending
        } else {
            NodeState::Committed
        }
    }

    /// Whether this node is the root
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether this node's history has forked
    pub fn is_fork_point(&self) -> bool {
        self.children.len() > 1
    }
}

/// Persisted form of the checkpoint graph
///
/// The snapshot alone is enough to rebuild the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    /// Root node id
    pub root: u64,
    /// Number of ids allocated so far
    pub node_count: u64,
    /// Active node id
    pub active_node: u64,
    /// All nodes by id
    pub nodes: BTreeMap<u64, CheckpointNode>,
}

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Informational
    Info,
    /// Something was skipped
    Warning,
    /// An operation failed
    Error,
}

/// Events published for a presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphEvent {
    /// A node was added to the graph
    NodeCreated {
        /// New node id
        id: u64,
        /// Parent id
        parent: Option<u64>,
        /// Initial label
        text: String,
    },
    /// The active node changed
    ActiveChanged {
        /// New active node
        id: u64,
        /// Previously active node
        previous: u64,
    },
    /// A node was attached to its commit
    CommitAttached {
        /// Node id
        id: u64,
        /// Commit id
        commit_id: String,
        /// Branch name
        branch_id: String,
    },
    /// A node's summary and hunks were rebuilt
    SummaryUpdated {
        /// Node id
        id: u64,
        /// New label
        text: String,
        /// New hunks
        diffs: Vec<Hunk>,
    },
    /// Files were restored to a node; the writes are not user edits
    Restored {
        /// Restored node
        id: u64,
    },
    /// A node was hidden or shown
    VisibilityChanged {
        /// Node id
        id: u64,
        /// New visibility
        visible: bool,
    },
    /// Message for the user
    Notice {
        /// Severity
        level: NoticeLevel,
        /// Text
        message: String,
    },
}

/// Explicit pair of directories every version-store call operates on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryHandle {
    /// Directory holding the live working files
    pub working_dir: PathBuf,
    /// Directory holding the commit history
    pub store_dir: PathBuf,
}

impl RepositoryHandle {
    /// Create a handle
    pub fn new(working_dir: impl Into<PathBuf>, store_dir: impl Into<PathBuf>) -> Self {
        Self { working_dir: working_dir.into(), store_dir: store_dir.into() }
    }

    /// Absolute path of a working-tree file given its relative path
    pub fn working_path(&self, relative: &Path) -> PathBuf {
        self.working_dir.join(relative)
    }
}

/// Public view of a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Commit id (SHA-256 hex)
    pub id: String,
    /// Parent commit id
    pub parent: Option<String>,
    /// Commit message
    pub message: String,
    /// Author name
    pub author: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Number of files in the committed tree
    pub file_count: usize,
}

impl CommitInfo {
    /// First eight characters of the id
    pub fn short_id(&self) -> &str {
        crate::utils::short_id(&self.id)
    }
}

/// Whether commits with no staged changes are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyCommitPolicy {
    /// Record empty commits (checkpoint bookkeeping)
    #[default]
    Allow,
    /// Fail with `NothingToCommit`
    Reject,
}

/// Captured result of one script run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,
    /// Terminating signal, if any
    pub signal: Option<i32>,
}

impl RunOutput {
    /// Whether the run exited with status 0
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Truncation limits applied to captured output before it reaches the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLimits {
    /// Lines of stdout kept from the start
    pub stdout_head_lines: usize,
    /// Lines of stderr kept from the start
    pub stderr_head_lines: usize,
    /// Lines of stderr kept from the end
    pub stderr_tail_lines: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            stdout_head_lines: 50,
            stderr_head_lines: 20,
            stderr_tail_lines: 20,
        }
    }
}

/// Configuration for a Forkpoint session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkpointConfig {
    /// Directory holding the working files
    pub working_dir: PathBuf,
    /// Directory holding session state (graph, last-seen map, store)
    pub state_dir: PathBuf,
    /// The file being debugged, relative to `working_dir`
    pub tracked_file: PathBuf,
    /// Extension a file must have to create checkpoints
    pub tracked_extension: String,
    /// Program used to run the tracked file
    pub interpreter: String,
    /// Author recorded on commits
    pub author: String,
    /// Branch created by `init`
    pub default_branch: String,
    /// Detector polling interval
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Bound on the summary service call
    #[serde(with = "duration_millis")]
    pub summary_timeout: Duration,
    /// Context lines around each hunk
    pub context_lines: usize,
    /// Maximum lines per hunk before clamping
    pub max_hunk_lines: usize,
    /// Whether empty commits are recorded
    pub empty_commits: EmptyCommitPolicy,
    /// Truncation of captured output
    pub output_limits: OutputLimits,
    /// Extra ignore patterns (glob syntax)
    pub ignore_patterns: Vec<String>,
    /// Compression strategy name ("none" or "fast")
    pub compression_strategy: String,
    /// Forkpoint version that wrote this config
    pub version: String,
}

impl ForkpointConfig {
    /// Default configuration for a working directory and tracked file
    pub fn new(working_dir: PathBuf, tracked_file: PathBuf) -> Self {
        let state_dir = working_dir.join(STATE_DIR_NAME);
        Self {
            working_dir,
            state_dir,
            tracked_file,
            tracked_extension: "py".to_string(),
            interpreter: "python3".to_string(),
            author: default_author(),
            default_branch: "main".to_string(),
            poll_interval: Duration::from_secs(1),
            summary_timeout: Duration::from_secs(10),
            context_lines: 2,
            max_hunk_lines: 100,
            empty_commits: EmptyCommitPolicy::Allow,
            output_limits: OutputLimits::default(),
            ignore_patterns: Vec::new(),
            compression_strategy: "fast".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Handle for version-store calls
    pub fn repository(&self) -> RepositoryHandle {
        RepositoryHandle::new(self.working_dir.clone(), self.store_dir())
    }

    /// Version store location
    pub fn store_dir(&self) -> PathBuf {
        self.state_dir.join("store")
    }

    /// Graph snapshot location
    pub fn graph_path(&self) -> PathBuf {
        self.state_dir.join("graph.json")
    }

    /// Last-seen content map location
    pub fn last_seen_path(&self) -> PathBuf {
        self.state_dir.join("last_seen.json")
    }

    /// Config file location
    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.json")
    }

    /// Absolute path of the tracked file
    pub fn tracked_path(&self) -> PathBuf {
        self.working_dir.join(&self.tracked_file)
    }
}

/// Name of the per-workspace state directory
pub const STATE_DIR_NAME: &str = ".forkpoint";

fn default_author() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "forkpoint".to_string());
    let host = hostname::get()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}@{}", user, host)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
