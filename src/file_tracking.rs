//! Working-directory scanning
//!
//! The `FileTracker` decides which files under the working directory belong
//! to a snapshot. It walks the tree with the `ignore` crate, so `.gitignore`
//! files are respected, then applies the session's own glob patterns. The
//! session state directory (`.forkpoint`) and `.git` are never tracked.
//!
//! ```rust,ignore
//! use crate::file_tracking::FileTracker;
//! use std::path::PathBuf;
//!
//! let tracker = FileTracker::new(PathBuf::from("./project"))
//!     .with_ignore_patterns(vec!["*.log".to_string(), "__pycache__/**".to_string()]);
//! let files = tracker.scan()?;
//! ```

use crate::error::Result;
use crate::types::STATE_DIR_NAME;
use crate::utils;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{WalkBuilder, WalkState};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// A file selected for tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// Path relative to the working directory
    pub relative: PathBuf,
    /// Forward-slash key used in commit trees
    pub key: String,
    /// Size in bytes at scan time
    pub size: u64,
}

/// Scans a working directory for trackable files
#[derive(Debug, Clone)]
pub struct FileTracker {
    /// Root directory to track
    root_path: PathBuf,
    /// Custom ignore patterns (glob syntax, relative to the root)
    ignore_patterns: Vec<String>,
    /// Directories never tracked, in addition to the built-in ones
    excluded_dirs: Vec<PathBuf>,
    /// Maximum file size to track in bytes (0 = unlimited)
    max_file_size: u64,
    /// Number of walker threads
    parallel_workers: usize,
}

impl FileTracker {
    /// Create a new file tracker with default settings
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            ignore_patterns: Vec::new(),
            excluded_dirs: Vec::new(),
            max_file_size: 0,
            parallel_workers: num_cpus::get(),
        }
    }

    /// Set custom ignore patterns
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Exclude an additional directory (absolute path)
    ///
    /// Used when the version store lives inside the working directory at a
    /// non-default location.
    pub fn with_excluded_dir(mut self, dir: PathBuf) -> Self {
        self.excluded_dirs.push(dir);
        self
    }

    /// Set maximum file size limit (0 = unlimited)
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Scan the working directory
    ///
    /// Returns tracked files sorted by key.
    pub fn scan(&self) -> Result<Vec<TrackedFile>> {
        let start = Instant::now();
        let patterns = self.build_globset()?;

        let mut builder = WalkBuilder::new(&self.root_path);
        builder
            .follow_links(false)
            .hidden(false)
            .parents(false)
            .ignore(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .threads(self.parallel_workers);

        let root = self.root_path.clone();
        let excluded = self.excluded_dirs.clone();
        builder.filter_entry(move |entry| {
            let name = entry.file_name();
            if entry.depth() > 0 && (name == STATE_DIR_NAME || name == ".git") {
                return false;
            }
            !excluded.iter().any(|dir| entry.path().starts_with(dir) && entry.path() != root)
        });

        let found: Arc<Mutex<Vec<(PathBuf, u64)>>> = Arc::new(Mutex::new(Vec::new()));
        let walk_error: Arc<Mutex<Option<ignore::Error>>> = Arc::new(Mutex::new(None));

        builder.build_parallel().run(|| {
            let found = Arc::clone(&found);
            let walk_error = Arc::clone(&walk_error);

            Box::new(move |entry_result| {
                let entry = match entry_result {
                    Ok(entry) => entry,
                    Err(e) => {
                        walk_error.lock().get_or_insert(e);
                        return WalkState::Quit;
                    }
                };
                let is_file = entry.file_type().map(|ft| ft.is_file()).unwrap_or(false);
                if !is_file {
                    return WalkState::Continue;
                }
                match entry.metadata() {
                    Ok(meta) => found.lock().push((entry.into_path(), meta.len())),
                    Err(e) => {
                        walk_error.lock().get_or_insert(e);
                        return WalkState::Quit;
                    }
                }
                WalkState::Continue
            })
        });

        if let Some(e) = walk_error.lock().take() {
            return Err(e.into());
        }

        let found = std::mem::take(&mut *found.lock());
        let mut files = Vec::with_capacity(found.len());
        for (path, size) in found {
            let relative = utils::make_relative(&path, &self.root_path)?;
            if patterns.is_match(&relative) {
                trace!("Ignoring {:?} (pattern)", relative);
                continue;
            }

            if self.max_file_size > 0 && size > self.max_file_size {
                debug!("Skipping {:?}: {} bytes exceeds limit", relative, size);
                continue;
            }

            let key = utils::path_key(&relative);
            files.push(TrackedFile { relative, key, size });
        }

        files.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(
            "Scanned {:?}: {} files in {}ms",
            self.root_path,
            files.len(),
            start.elapsed().as_millis()
        );
        Ok(files)
    }

    fn build_globset(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.ignore_patterns {
            let pattern = pattern.trim_end_matches('/');
            builder.add(Glob::new(pattern)?);
            // "dir" also matches everything below it
            builder.add(Glob::new(&format!("{}/**", pattern))?);
        }
        Ok(builder.build()?)
    }
}
