//! Session orchestration
//!
//! A [`Session`] ties the pieces together for one working directory: the
//! version store holding the history, the checkpoint graph describing it,
//! the script runner and the optional summary service. It implements the
//! multi-step operations that must keep graph and history consistent:
//!
//! - **Root creation**: resets the history and commits the starting state.
//! - **Checkpointing**: creates a pending child of the active node, commits
//!   it (forking a new branch when the parent already has a child), then
//!   summarizes the change.
//! - **Restore**: makes the working tree show a checkpoint without losing
//!   uncommitted work.
//! - **Export/import**: moves a whole session between directories.
//!
//! ```rust,no_run
//! use forkpoint::SessionBuilder;
//!
//! # async fn example() -> forkpoint::Result<()> {
//! let mut session = SessionBuilder::new("./project", "main.py")
//!     .ignore_patterns(vec!["__pycache__/".to_string()])
//!     .init("Debugging main.py")?;
//!
//! let id = session.run_and_checkpoint().await?;
//! session.restore(0)?;
//! println!("checkpoint {} created, back at the root", id);
//! # Ok(())
//! # }
//! ```

use crate::compression::CompressionStrategy;
use crate::detector::LastSeenStore;
use crate::diff::compute_line_diff;
use crate::error::{ForkpointError, Result};
use crate::file_tracking::{FileTracker, TrackedFile};
use crate::graph::CheckpointGraph;
use crate::hunk::{build_hunks, clamp, render_unified};
use crate::runner::{truncate_output, CommandRunner, ScriptRunner};
use crate::summary::{local_summary, summarize_with_timeout, SummaryService};
use crate::types::{
    CheckpointNode, EmptyCommitPolicy, ForkpointConfig, GraphEvent, GraphSnapshot, Hunk,
    NoticeLevel, OutputLimits, RepositoryHandle, RunOutput,
};
use crate::utils;
use crate::version_store::VersionStore;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// A session shared between the detector and other callers
pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

/// Branch name for a forked child
///
/// The base is the parent branch up to its first `.`, so forks of forks stay
/// short; the random suffix keeps names unique across sessions sharing a
/// store.
pub fn fork_branch_name(parent_branch: &str, child_number: usize) -> String {
    let base = parent_branch.split('.').next().unwrap_or(parent_branch);
    format!("{}.{}-{}", base, child_number, uuid::Uuid::new_v4().simple())
}

/// Checkpoint engine for one working directory
pub struct Session {
    config: ForkpointConfig,
    repo: RepositoryHandle,
    store: VersionStore,
    graph: CheckpointGraph,
    last_seen: LastSeenStore,
    runner: Arc<dyn ScriptRunner>,
    summarizer: Option<Arc<dyn SummaryService>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("repo", &self.repo)
            .field("store", &self.store)
            .field("graph", &self.graph)
            .field("summarizer", &self.summarizer.is_some())
            .finish()
    }
}

impl Session {
    /// Open an existing session in `working_dir` with default collaborators
    pub fn open(working_dir: impl Into<PathBuf>) -> Result<Self> {
        let working_dir = working_dir.into();
        let config = ForkpointConfig::new(working_dir, PathBuf::new());
        SessionBuilder::from_config(config).open()
    }

    /// Wrap the session for sharing with a detector
    pub fn into_shared(self) -> SharedSession {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Session configuration
    pub fn config(&self) -> &ForkpointConfig {
        &self.config
    }

    /// Directories every version-store call operates on
    pub fn repository(&self) -> &RepositoryHandle {
        &self.repo
    }

    /// The version store
    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// The checkpoint graph
    pub fn graph(&self) -> &CheckpointGraph {
        &self.graph
    }

    /// Per-file last-seen content
    pub fn last_seen(&self) -> &LastSeenStore {
        &self.last_seen
    }

    /// Mutable access to the last-seen content
    pub fn last_seen_mut(&mut self) -> &mut LastSeenStore {
        &mut self.last_seen
    }

    /// Subscribe to graph events
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.graph.subscribe()
    }

    /// Publish a user-facing notice
    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.graph.notify(level, message);
    }

    /// Reset the history and graph to a single committed root
    #[instrument(skip(self))]
    pub fn create_root(&mut self, text: &str) -> Result<u64> {
        self.store.reset(&self.repo)?;
        self.store.init(&self.repo)?;
        let staged = self.store.snapshot_all(&self.repo)?;
        let commit = self.store.commit(&self.repo, text, &self.config.author)?;
        let branch = self.store.current_branch(&self.repo)?;

        let root = self.graph.create_root(text);
        self.graph.attach_commit(root, &commit, &branch)?;

        let tracked = self.config.tracked_path();
        if let Ok(content) = fs::read(&tracked) {
            self.last_seen.set(&tracked, String::from_utf8_lossy(&content).into_owned());
            self.last_seen.save()?;
        }
        self.save_graph()?;

        info!("Session rooted at {} ({} files)", utils::short_id(&commit), staged);
        Ok(root)
    }

    /// Check that `active` is a file this session checkpoints
    pub fn check_active_file(&self, active: Option<PathBuf>) -> Result<PathBuf> {
        let path = active.ok_or(ForkpointError::NoActiveFile)?;
        let expected = self.config.tracked_extension.trim_start_matches('.');
        if path.extension().and_then(|e| e.to_str()) != Some(expected) {
            return Err(ForkpointError::UnsupportedFile { path, expected: expected.to_string() });
        }
        if !path.starts_with(&self.config.working_dir) {
            return Err(ForkpointError::NoWorkspace(path));
        }
        if !path.is_file() {
            return Err(ForkpointError::NoActiveFile);
        }
        Ok(path)
    }

    /// Run a script with the configured runner
    pub async fn run_script(&self, path: &Path) -> Result<RunOutput> {
        self.runner.run(path).await
    }

    /// Run the tracked file and checkpoint the result
    #[instrument(skip(self))]
    pub async fn run_and_checkpoint(&mut self) -> Result<u64> {
        let path = self.check_active_file(Some(self.config.tracked_path()))?;
        let output = self.run_script(&path).await?;

        let content = fs::read(&path)?;
        self.last_seen.set(&path, String::from_utf8_lossy(&content).into_owned());
        self.last_seen.save()?;

        self.checkpoint(&path, &output).await
    }

    /// Create, commit and summarize a checkpoint under the active node
    ///
    /// A failed commit leaves the new node pending and the active node
    /// unchanged; the failure is published as a notice rather than returned.
    #[instrument(skip(self, output))]
    pub async fn checkpoint(&mut self, file: &Path, output: &RunOutput) -> Result<u64> {
        let (stdout, stderr) = truncate_output(output, &self.config.output_limits);
        let parent = self.graph.active_node();
        let label = format!("Checkpoint {}", self.graph.node_count());
        let id = self.graph.create_child(parent, label, stdout, stderr)?;
        self.save_graph()?;

        if let Err(e) = self.commit_node(id) {
            error!("Failed to commit checkpoint {}: {}", id, e);
            self.graph.notify(
                NoticeLevel::Error,
                format!("Checkpoint {} was not committed: {}", id, e.user_message()),
            );
            self.save_graph()?;
            return Ok(id);
        }

        let key = utils::path_key(&utils::make_relative(file, &self.config.working_dir)?);
        let parent_commit = self.graph.get(parent)?.commit_id.clone();
        let commit = self.graph.get(id)?.commit_id.clone();
        match self.summarize(&parent_commit, &commit, &key).await {
            Ok((text, hunks)) => self.graph.update_summary(id, text, hunks)?,
            Err(e) => warn!("Could not summarize checkpoint {}: {}", id, e),
        }

        self.graph.set_active(id)?;
        self.save_graph()?;
        info!("Checkpoint {} created under {}", id, parent);
        Ok(id)
    }

    /// Commit a pending node on the right branch
    fn commit_node(&mut self, id: u64) -> Result<()> {
        let node = self.graph.get(id)?.clone();
        let parent_id = node
            .parent
            .ok_or_else(|| ForkpointError::internal(format!("checkpoint {} has no parent", id)))?;
        let parent = self.graph.get(parent_id)?.clone();
        if parent.commit_id.is_empty() {
            return Err(ForkpointError::internal(format!(
                "parent checkpoint {} was never committed",
                parent_id
            )));
        }

        let child_index = parent.children.iter().position(|c| *c == id).unwrap_or(0);
        let tip = self.store.branch_tip(&self.repo, &parent.branch_id)?;
        let needs_fork = child_index > 0 || tip.as_deref() != Some(parent.commit_id.as_str());

        let branch = if needs_fork {
            let name = fork_branch_name(&parent.branch_id, child_index + 1);
            self.store.branch_at(&self.repo, &name, &parent.commit_id)?;
            self.switch_preserving(&name)?;
            debug!("Forked {} from checkpoint {}", name, parent_id);
            name
        } else {
            if self.store.current_branch(&self.repo)? != parent.branch_id {
                self.switch_preserving(&parent.branch_id)?;
            }
            parent.branch_id.clone()
        };

        self.store.snapshot_all(&self.repo)?;
        let commit = self.store.commit(&self.repo, &node.text, &self.config.author)?;
        self.graph.attach_commit(id, &commit, &branch)
    }

    /// Move HEAD to `reference` while keeping every working file as it is
    fn switch_preserving(&self, reference: &str) -> Result<()> {
        let backup = self.read_working_files()?;
        self.store.checkout(&self.repo, reference, true)?;
        self.write_back(&backup, &HashSet::new())
    }

    /// Pick up graph and last-seen changes written by another process
    ///
    /// Returns whether the active node moved, which happens when a restore
    /// ran against the same working directory elsewhere.
    pub fn reload(&mut self) -> Result<bool> {
        let previous = self.graph.active_node();
        let graph_path = self.config.graph_path();
        if graph_path.is_file() {
            let snapshot = CheckpointGraph::read_snapshot(&graph_path)?;
            if snapshot != self.graph.snapshot() {
                debug!("Graph changed on disk; reloading {:?}", graph_path);
                self.graph.replace(snapshot)?;
            }
        }
        self.last_seen = LastSeenStore::load(self.config.last_seen_path())?;

        let moved = self.graph.active_node() != previous;
        if moved {
            info!("Checkpoint {} was restored elsewhere", self.graph.active_node());
        }
        Ok(moved)
    }

    /// Make the working tree show checkpoint `id` and make it active
    ///
    /// Uncommitted edits to tracked files are stashed in the store first, and
    /// files the checkpoint does not track are written back after checkout.
    #[instrument(skip(self))]
    pub fn restore(&mut self, id: u64) -> Result<()> {
        let node = self.graph.get(id)?.clone();
        if !node.visible {
            return Err(ForkpointError::NodeHidden(id));
        }
        if node.commit_id.is_empty() {
            return Err(ForkpointError::restore(format!("checkpoint {} has no commit", id)));
        }

        if let Err(e) = self.restore_files(&node) {
            error!("Restore of checkpoint {} failed: {}", id, e);
            let err = ForkpointError::restore(e.to_string());
            self.graph.notify(NoticeLevel::Error, err.user_message());
            return Err(err);
        }

        let tracked = self.config.tracked_path();
        if let Ok(content) = fs::read(&tracked) {
            self.last_seen.set(&tracked, String::from_utf8_lossy(&content).into_owned());
            self.last_seen.save()?;
        }

        self.graph.set_active(id)?;
        self.save_graph()?;
        self.graph.announce_restore(id);
        info!("Restored checkpoint {}", id);
        Ok(())
    }

    fn restore_files(&self, node: &CheckpointNode) -> Result<()> {
        let backup = self.read_working_files()?;
        if self.store.is_dirty(&self.repo)? {
            let reason = format!("before restoring checkpoint {}", node.id);
            if let Some(stash) = self.store.stash(&self.repo, &reason)? {
                info!("Uncommitted edits saved as stash {}", stash);
            }
        }

        self.store.checkout(&self.repo, &node.branch_id, true)?;
        self.store.checkout(&self.repo, &node.commit_id, true)?;

        let tracked: HashSet<String> =
            self.store.list_files(&self.repo, &node.commit_id)?.into_iter().collect();
        self.write_back(&backup, &tracked)
    }

    /// Hunks and summary text for a file between two commits
    pub async fn summarize(
        &self,
        parent_commit: &str,
        new_commit: &str,
        path: &str,
    ) -> Result<(String, Vec<Hunk>)> {
        let hunks = self.file_hunks(parent_commit, new_commit, path)?;
        if hunks.is_empty() {
            return Ok((local_summary(&hunks), hunks));
        }

        let text = match &self.summarizer {
            Some(service) => {
                summarize_with_timeout(
                    service.as_ref(),
                    &render_unified(&hunks),
                    self.config.summary_timeout,
                )
                .await
            }
            None => local_summary(&hunks),
        };
        Ok((text, hunks))
    }

    /// Hunks for the tracked file between two checkpoints
    pub fn diff_nodes(&self, from: u64, to: u64) -> Result<Vec<Hunk>> {
        let from_commit = self.committed(from)?;
        let to_commit = self.committed(to)?;
        self.file_hunks(&from_commit, &to_commit, &self.tracked_key())
    }

    fn file_hunks(&self, old_commit: &str, new_commit: &str, path: &str) -> Result<Vec<Hunk>> {
        let old = self.read_blob_or_empty(old_commit, path)?;
        let new = self.read_blob_or_empty(new_commit, path)?;
        let parts = compute_line_diff(&old, &new);
        Ok(build_hunks(&parts, self.config.context_lines)
            .into_iter()
            .map(|h| clamp(h, self.config.max_hunk_lines))
            .collect())
    }

    fn read_blob_or_empty(&self, commit: &str, path: &str) -> Result<String> {
        match self.store.read_blob(&self.repo, commit, path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(ForkpointError::RefNotFound(_)) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    fn committed(&self, id: u64) -> Result<String> {
        let node = self.graph.get(id)?;
        if node.commit_id.is_empty() {
            return Err(ForkpointError::RefNotFound(format!("checkpoint {}", id)));
        }
        Ok(node.commit_id.clone())
    }

    /// Hide or show a checkpoint
    pub fn set_visible(&mut self, id: u64, visible: bool) -> Result<()> {
        self.graph.set_visible(id, visible)?;
        self.save_graph()
    }

    /// Copy the store, graph and tracked file under `dest`
    #[instrument(skip(self))]
    pub fn export(&self, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)?;

        let store_dest = dest.join("store");
        if store_dest.exists() {
            fs::remove_dir_all(&store_dest)?;
        }
        let copied = utils::copy_dir_recursive(&self.repo.store_dir, &store_dest)?;
        self.graph.save(&dest.join("graph.json"))?;

        let tracked = self.config.tracked_path();
        if let Some(name) = tracked.file_name().filter(|_| tracked.is_file()) {
            fs::copy(&tracked, dest.join(name))?;
        }

        info!("Exported session to {:?} ({} store files)", dest, copied);
        Ok(())
    }

    /// Replace the store and graph with an export, then restore its active node
    #[instrument(skip(self))]
    pub fn import(&mut self, src: &Path) -> Result<()> {
        let snapshot: GraphSnapshot = serde_json::from_slice(&fs::read(src.join("graph.json"))?)?;
        // Validate before anything local is touched
        CheckpointGraph::from_snapshot(snapshot.clone())?;

        let store_src = src.join("store");
        if !store_src.join("HEAD").is_file() {
            return Err(ForkpointError::NotInitialized(store_src));
        }

        self.store.reset(&self.repo)?;
        utils::copy_dir_recursive(&store_src, &self.repo.store_dir)?;
        self.graph.replace(snapshot)?;
        self.save_graph()?;

        let active = self.graph.active_node();
        self.restore(active)?;
        info!("Imported session from {:?}; active checkpoint {}", src, active);
        Ok(())
    }

    /// Persist the graph snapshot
    pub fn save_graph(&self) -> Result<()> {
        self.graph.save(&self.config.graph_path())
    }

    /// Tree key of the tracked file
    pub fn tracked_key(&self) -> String {
        utils::path_key(&self.config.tracked_file)
    }

    fn tracker(&self) -> FileTracker {
        let mut tracker = FileTracker::new(self.repo.working_dir.clone())
            .with_ignore_patterns(self.config.ignore_patterns.clone());
        if self.config.state_dir.starts_with(&self.repo.working_dir) {
            tracker = tracker.with_excluded_dir(self.config.state_dir.clone());
        }
        tracker
    }

    fn read_working_files(&self) -> Result<Vec<(TrackedFile, Vec<u8>)>> {
        self.tracker()
            .scan()?
            .into_iter()
            .map(|file| {
                let content = fs::read(self.repo.working_path(&file.relative))?;
                Ok((file, content))
            })
            .collect()
    }

    /// Write backed-up files whose key is not in `skip`, where they differ
    fn write_back(&self, backup: &[(TrackedFile, Vec<u8>)], skip: &HashSet<String>) -> Result<()> {
        let mut written = 0;
        for (file, content) in backup.iter().filter(|(f, _)| !skip.contains(&f.key)) {
            let path = self.repo.working_path(&file.relative);
            if fs::read(&path).ok().as_deref() == Some(content.as_slice()) {
                continue;
            }
            utils::atomic_write(&path, content)?;
            written += 1;
        }
        debug!("Wrote back {} files", written);
        Ok(())
    }
}

/// Builder for configuring and creating sessions
///
/// ```rust,no_run
/// use forkpoint::SessionBuilder;
/// use std::time::Duration;
///
/// # fn main() -> forkpoint::Result<()> {
/// let session = SessionBuilder::new("./project", "solve.py")
///     .interpreter("python3")
///     .summary_timeout(Duration::from_secs(5))
///     .context_lines(3)
///     .init("Debugging solve.py")?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    config: ForkpointConfig,
    runner: Option<Arc<dyn ScriptRunner>>,
    summarizer: Option<Arc<dyn SummaryService>>,
}

impl SessionBuilder {
    /// Start from defaults for a working directory and tracked file
    pub fn new(working_dir: impl Into<PathBuf>, tracked_file: impl Into<PathBuf>) -> Self {
        Self::from_config(ForkpointConfig::new(working_dir.into(), tracked_file.into()))
    }

    /// Start from an explicit configuration
    pub fn from_config(config: ForkpointConfig) -> Self {
        Self { config, runner: None, summarizer: None }
    }

    /// Where session state lives (default `<working_dir>/.forkpoint`)
    pub fn state_dir(mut self, dir: PathBuf) -> Self {
        self.config.state_dir = dir;
        self
    }

    /// Extension a file must have to create checkpoints
    pub fn tracked_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.tracked_extension = ext.into();
        self
    }

    /// Program used by the default runner
    pub fn interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.config.interpreter = interpreter.into();
        self
    }

    /// Author recorded on commits
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.config.author = author.into();
        self
    }

    /// Branch the history starts on
    pub fn default_branch(mut self, name: impl Into<String>) -> Self {
        self.config.default_branch = name.into();
        self
    }

    /// Detector polling interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Bound on each summary service call
    pub fn summary_timeout(mut self, timeout: Duration) -> Self {
        self.config.summary_timeout = timeout;
        self
    }

    /// Context lines around each hunk
    pub fn context_lines(mut self, lines: usize) -> Self {
        self.config.context_lines = lines;
        self
    }

    /// Maximum lines per hunk before clamping
    pub fn max_hunk_lines(mut self, lines: usize) -> Self {
        self.config.max_hunk_lines = lines;
        self
    }

    /// Whether commits without changes are recorded
    pub fn empty_commits(mut self, policy: EmptyCommitPolicy) -> Self {
        self.config.empty_commits = policy;
        self
    }

    /// Truncation applied to captured output
    pub fn output_limits(mut self, limits: OutputLimits) -> Self {
        self.config.output_limits = limits;
        self
    }

    /// Glob patterns excluded from snapshots
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.ignore_patterns = patterns;
        self
    }

    /// Compression for stored objects
    pub fn compression_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.config.compression_strategy = strategy.as_str().to_string();
        self
    }

    /// Replace the default command runner
    pub fn runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Attach a summary service
    pub fn summary_service(mut self, service: Arc<dyn SummaryService>) -> Self {
        self.summarizer = Some(service);
        self
    }

    /// Configuration as currently built
    pub fn config(&self) -> &ForkpointConfig {
        &self.config
    }

    /// Create a new session with a committed root
    #[instrument(skip(self), fields(working_dir = ?self.config.working_dir))]
    pub fn init(self, root_text: &str) -> Result<Session> {
        let config = self.config.clone();
        if !config.working_dir.is_dir() {
            return Err(ForkpointError::NoWorkspace(config.working_dir));
        }
        if config.tracked_file.as_os_str().is_empty() || config.tracked_file.is_absolute() {
            return Err(ForkpointError::InvalidConfiguration(format!(
                "tracked file must be a relative path, got {:?}",
                config.tracked_file
            )));
        }
        if config.config_path().exists() {
            return Err(ForkpointError::AlreadyInitialized(config.state_dir));
        }

        fs::create_dir_all(&config.state_dir)?;
        utils::atomic_write(&config.config_path(), &serde_json::to_vec_pretty(&config)?)?;

        let mut session = self.build(config)?;
        session.create_root(root_text)?;
        Ok(session)
    }

    /// Open an existing session
    ///
    /// The persisted configuration replaces the builder's settings; the
    /// builder's runner and summary service are kept.
    #[instrument(skip(self), fields(state_dir = ?self.config.state_dir))]
    pub fn open(self) -> Result<Session> {
        let config_path = self.config.config_path();
        if !config_path.is_file() {
            return Err(ForkpointError::NoWorkspace(self.config.working_dir.clone()));
        }
        let config: ForkpointConfig = serde_json::from_slice(&fs::read(&config_path)?)?;
        let mut session = self.build(config)?;

        let graph_path = session.config.graph_path();
        if graph_path.is_file() {
            session.graph = CheckpointGraph::load(&graph_path)?;
        } else {
            warn!("No graph at {:?}; starting from an empty root", graph_path);
        }
        debug!("Opened session with {} checkpoints", session.graph.node_count());
        Ok(session)
    }

    fn build(self, config: ForkpointConfig) -> Result<Session> {
        let compression: CompressionStrategy = config.compression_strategy.parse()?;
        let store = VersionStore::new()
            .with_default_branch(config.default_branch.clone())
            .with_empty_commits(config.empty_commits)
            .with_compression(compression)
            .with_ignore_patterns(config.ignore_patterns.clone());

        let runner = self.runner.unwrap_or_else(|| -> Arc<dyn ScriptRunner> {
            Arc::new(
                CommandRunner::new(config.interpreter.clone())
                    .with_working_dir(config.working_dir.clone()),
            )
        });
        let last_seen = LastSeenStore::load(config.last_seen_path())?;

        Ok(Session {
            repo: config.repository(),
            graph: CheckpointGraph::new(format!("Debugging {}", config.tracked_file.display())),
            store,
            last_seen,
            runner,
            summarizer: self.summarizer,
            config,
        })
    }
}
