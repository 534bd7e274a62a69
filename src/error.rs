//! Error types for Forkpoint
//!
//! This module defines every error that can surface from the checkpoint
//! engine. Errors fall into a few families that callers treat differently:
//!
//! - **Precondition errors** (no active file, wrong file type, no workspace)
//!   are reported to the user and never retried automatically.
//! - **Version-store errors** (branch collision, checkout or commit failure)
//!   are logged; the affected graph node stays pending.
//! - **Restore failures** are reported separately because they may leave the
//!   working tree in a partially restored state.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Forkpoint library
pub type Result<T> = std::result::Result<T, ForkpointError>;

/// Main error type for all Forkpoint operations
#[derive(Debug, Error)]
pub enum ForkpointError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Gitignore-aware walk error from the ignore crate
    #[error("Directory scan error: {0}")]
    Scan(#[from] ignore::Error),

    /// Ignore pattern could not be compiled
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// No file is currently active in the editor
    #[error("No active file to checkpoint")]
    NoActiveFile,

    /// The active file is not of the tracked type
    #[error("Unsupported file {path:?}: expected a .{expected} file")]
    UnsupportedFile {
        /// Path of the rejected file
        path: PathBuf,
        /// Extension the session tracks
        expected: String,
    },

    /// No workspace/session has been opened
    #[error("No workspace is open: {0:?}")]
    NoWorkspace(PathBuf),

    /// Version store initialized twice without a reset
    #[error("Version store already initialized at {0:?}")]
    AlreadyInitialized(PathBuf),

    /// Version store missing
    #[error("Version store not initialized at {0:?}")]
    NotInitialized(PathBuf),

    /// Commit requested with no staged changes under a rejecting policy
    #[error("Nothing to commit")]
    NothingToCommit,

    /// Branch name already in use
    #[error("Branch already exists: {0}")]
    BranchExists(String),

    /// Branch name is not a single path segment
    #[error("Invalid branch name: {0:?}")]
    InvalidBranchName(String),

    /// Branch, commit id or prefix could not be resolved
    #[error("Reference not found: {0}")]
    RefNotFound(String),

    /// Commit prefix matches more than one commit
    #[error("Ambiguous reference {prefix}: matches {count} commits")]
    AmbiguousRef {
        /// The prefix that was looked up
        prefix: String,
        /// Number of commits it matched
        count: usize,
    },

    /// Non-forced checkout over a dirty working tree
    #[error("Uncommitted changes in {0:?}")]
    UncommittedChanges(PathBuf),

    /// Object not found in content-addressable storage
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Stored object failed its hash check
    #[error("Corrupt object {hash}: content hashes to {actual}")]
    CorruptObject {
        /// Expected hash (the object key)
        hash: String,
        /// Hash of the content actually read
        actual: String,
    },

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression errors
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Node id not present in the graph
    #[error("Checkpoint node not found: {0}")]
    NodeNotFound(u64),

    /// Operation requires a visible node
    #[error("Checkpoint node {0} is hidden")]
    NodeHidden(u64),

    /// Node already points at a different commit
    #[error("Checkpoint node {node} is already committed as {existing}")]
    CommitAlreadyAttached {
        /// Node id
        node: u64,
        /// Commit the node already points at
        existing: String,
    },

    /// Graph snapshot violates a structural invariant
    #[error("Invalid checkpoint graph: {0}")]
    InvalidGraph(String),

    /// Restore operation failed; the working tree may be partially restored
    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    /// Script runner failed to produce output
    #[error("Script runner error: {0}")]
    Runner(String),

    /// Summary service failed
    #[error("Summary service error: {0}")]
    Summary(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForkpointError {
    /// Create a runner error with a custom message
    pub fn runner(msg: impl Into<String>) -> Self {
        ForkpointError::Runner(msg.into())
    }

    /// Create a summary error with a custom message
    pub fn summary(msg: impl Into<String>) -> Self {
        ForkpointError::Summary(msg.into())
    }

    /// Create a restore error with a custom message
    pub fn restore(msg: impl Into<String>) -> Self {
        ForkpointError::RestoreFailed(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        ForkpointError::Internal(msg.into())
    }

    /// Errors caused by a missing precondition rather than a failure
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ForkpointError::NoActiveFile
                | ForkpointError::UnsupportedFile { .. }
                | ForkpointError::NoWorkspace(_)
        )
    }

    /// Errors raised by the version store
    pub fn is_version_store(&self) -> bool {
        matches!(
            self,
            ForkpointError::AlreadyInitialized(_)
                | ForkpointError::NotInitialized(_)
                | ForkpointError::NothingToCommit
                | ForkpointError::BranchExists(_)
                | ForkpointError::InvalidBranchName(_)
                | ForkpointError::RefNotFound(_)
                | ForkpointError::AmbiguousRef { .. }
                | ForkpointError::UncommittedChanges(_)
                | ForkpointError::ObjectNotFound(_)
                | ForkpointError::CorruptObject { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            ForkpointError::NoActiveFile => {
                "No file is open. Open the file you are debugging and save it again.".to_string()
            }
            ForkpointError::UnsupportedFile { path, expected } => {
                format!(
                    "{:?} is not tracked. Only .{} files create checkpoints.",
                    path, expected
                )
            }
            ForkpointError::NoWorkspace(path) => {
                format!("No session found at {:?}. Run 'forkpoint init' first.", path)
            }
            ForkpointError::NodeNotFound(id) => {
                format!("Checkpoint {} not found. Use 'forkpoint tree' to list checkpoints.", id)
            }
            ForkpointError::RestoreFailed(msg) => {
                format!(
                    "Restore failed: {}. The working tree may be partially restored; \
                     inspect your files before editing further.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }
}
