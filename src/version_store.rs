//! Branching commit history for a working directory
//!
//! The version store persists every checkpoint as an immutable commit on a
//! named branch, independently of the live working files. It is a small,
//! purpose-built history: linear commits, branch pointers, a detached HEAD
//! and forced checkouts. There is no merge, rebase or conflict resolution.
//!
//! ## Layout
//!
//! ```text
//! store_dir/
//! ├── metadata.json       # format version, creation time, default branch
//! ├── HEAD                # "ref: <branch>" or a detached commit id
//! ├── index.json          # staged tree (path -> blob hash)
//! ├── refs/heads/<name>   # branch pointers
//! ├── commits/<id>.json   # immutable commit records
//! ├── stash/<id>.json     # recovery snapshots of uncommitted edits
//! └── objects/            # see crate::store
//! ```
//!
//! Every operation takes an explicit [`RepositoryHandle`], and operations on
//! the same working directory are serialized through a per-directory lock.

use crate::compression::{CompressionEngine, CompressionStrategy};
use crate::error::{ForkpointError, Result};
use crate::file_tracking::FileTracker;
use crate::store::ObjectStore;
use crate::types::{CommitInfo, EmptyCommitPolicy, RepositoryHandle};
use crate::utils;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// On-disk format version written to `metadata.json`
const FORMAT_VERSION: u32 = 1;

/// Staged or committed tree: forward-slash path -> blob hash
pub type Tree = BTreeMap<String, String>;

/// Store-wide metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreMetadata {
    format_version: u32,
    created_at: DateTime<Utc>,
    default_branch: String,
    forkpoint_version: String,
}

/// Immutable commit record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitRecord {
    id: String,
    parent: Option<String>,
    message: String,
    author: String,
    timestamp: DateTime<Utc>,
    tree: Tree,
}

impl CommitRecord {
    fn info(&self) -> CommitInfo {
        CommitInfo {
            id: self.id.clone(),
            parent: self.parent.clone(),
            message: self.message.clone(),
            author: self.author.clone(),
            timestamp: self.timestamp,
            file_count: self.tree.len(),
        }
    }
}

/// Where HEAD points
#[derive(Debug, Clone, PartialEq, Eq)]
enum Head {
    /// On a branch (which may not have a commit yet)
    Branch(String),
    /// Detached at a commit
    Detached(String),
}

/// A recovery snapshot of the working tree taken before a destructive operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashEntry {
    /// Stash id
    pub id: String,
    /// Why the stash was taken
    pub reason: String,
    /// When it was taken
    pub created_at: DateTime<Utc>,
    /// Branch checked out at the time ("HEAD" when detached)
    pub branch: String,
    /// HEAD commit at the time
    pub head: Option<String>,
    /// Working tree contents
    pub files: Tree,
}

impl StashEntry {
    /// First eight characters of the id
    pub fn short_id(&self) -> &str {
        utils::short_id(&self.id)
    }
}

/// Branching, content-addressed commit history
pub struct VersionStore {
    /// Branch HEAD points at after `init`
    default_branch: String,
    /// Whether commits without changes are recorded
    empty_commits: EmptyCommitPolicy,
    /// Compression applied to new objects
    compression: CompressionStrategy,
    /// Extra ignore patterns applied when scanning working directories
    ignore_patterns: Vec<String>,
    /// Per-working-directory operation locks
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    /// Open object stores by store directory
    objects: DashMap<PathBuf, Arc<ObjectStore>>,
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("default_branch", &self.default_branch)
            .field("empty_commits", &self.empty_commits)
            .field("compression", &self.compression)
            .field("ignore_patterns", &self.ignore_patterns)
            .finish()
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionStore {
    /// Create a version store with default settings
    pub fn new() -> Self {
        Self {
            default_branch: "main".to_string(),
            empty_commits: EmptyCommitPolicy::Allow,
            compression: CompressionStrategy::Fast,
            ignore_patterns: Vec::new(),
            locks: DashMap::new(),
            objects: DashMap::new(),
        }
    }

    /// Set the branch created by `init`
    pub fn with_default_branch(mut self, name: impl Into<String>) -> Self {
        self.default_branch = name.into();
        self
    }

    /// Set the empty-commit policy
    pub fn with_empty_commits(mut self, policy: EmptyCommitPolicy) -> Self {
        self.empty_commits = policy;
        self
    }

    /// Set the compression strategy for new objects
    pub fn with_compression(mut self, strategy: CompressionStrategy) -> Self {
        self.compression = strategy;
        self
    }

    /// Set ignore patterns applied when scanning the working directory
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Whether a history exists at `repo.store_dir`
    pub fn is_initialized(&self, repo: &RepositoryHandle) -> bool {
        repo.store_dir.join("HEAD").is_file()
    }

    /// Create an empty history with HEAD on the default branch
    #[instrument(skip(self))]
    pub fn init(&self, repo: &RepositoryHandle) -> Result<()> {
        let lock = self.lock_for(repo);
        let _guard = lock.lock();

        if self.is_initialized(repo) {
            return Err(ForkpointError::AlreadyInitialized(repo.store_dir.clone()));
        }
        validate_branch_name(&self.default_branch)?;

        for dir in ["refs/heads", "commits", "stash", "objects"] {
            fs::create_dir_all(repo.store_dir.join(dir))?;
        }

        let metadata = StoreMetadata {
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
            default_branch: self.default_branch.clone(),
            forkpoint_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        write_json(&repo.store_dir.join("metadata.json"), &metadata)?;
        write_json(&repo.store_dir.join("index.json"), &Tree::new())?;
        write_head(repo, &Head::Branch(self.default_branch.clone()))?;

        info!("Initialized version store at {:?}", repo.store_dir);
        Ok(())
    }

    /// Remove the history entirely
    #[instrument(skip(self))]
    pub fn reset(&self, repo: &RepositoryHandle) -> Result<()> {
        let lock = self.lock_for(repo);
        let _guard = lock.lock();

        self.objects.remove(&repo.store_dir);
        if repo.store_dir.exists() {
            fs::remove_dir_all(&repo.store_dir)?;
            info!("Removed version store at {:?}", repo.store_dir);
        }
        Ok(())
    }

    /// Stage every tracked file under the working directory
    ///
    /// The index is replaced by the scan, so deleted files are staged as
    /// deletions. Returns the number of files staged.
    #[instrument(skip(self))]
    pub fn snapshot_all(&self, repo: &RepositoryHandle) -> Result<usize> {
        let lock = self.lock_for(repo);
        let _guard = lock.lock();
        self.ensure_initialized(repo)?;

        let objects = self.object_store(repo)?;
        let files = self.tracker(repo).scan()?;

        let staged = files
            .par_iter()
            .map(|file| -> Result<(String, String)> {
                let content = fs::read(repo.working_path(&file.relative))?;
                let hash = objects.store(&content)?;
                Ok((file.key.clone(), hash))
            })
            .collect::<Result<Vec<_>>>()?;

        let tree: Tree = staged.into_iter().collect();
        let count = tree.len();
        write_json(&repo.store_dir.join("index.json"), &tree)?;

        debug!("Staged {} files", count);
        Ok(count)
    }

    /// Commit the staged tree on the current branch (or detached HEAD)
    #[instrument(skip(self))]
    pub fn commit(&self, repo: &RepositoryHandle, message: &str, author: &str) -> Result<String> {
        let lock = self.lock_for(repo);
        let _guard = lock.lock();
        self.ensure_initialized(repo)?;

        let tree: Tree = read_json(&repo.store_dir.join("index.json"))?;
        let head = read_head(repo)?;
        let parent = resolve_head(repo, &head)?;

        if self.empty_commits == EmptyCommitPolicy::Reject {
            let parent_tree = match &parent {
                Some(id) => load_commit(repo, id)?.tree,
                None => Tree::new(),
            };
            if parent_tree == tree {
                return Err(ForkpointError::NothingToCommit);
            }
        }

        let timestamp = Utc::now();
        let tree_json = serde_json::to_vec(&tree)?;
        let stamp = timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let id = utils::hash_fields([
            parent.as_deref().unwrap_or("").as_bytes(),
            message.as_bytes(),
            author.as_bytes(),
            stamp.as_bytes(),
            tree_json.as_slice(),
        ]);

        let record = CommitRecord {
            id: id.clone(),
            parent,
            message: message.to_string(),
            author: author.to_string(),
            timestamp,
            tree,
        };
        write_json(&commit_path(repo, &id), &record)?;

        match head {
            Head::Branch(name) => {
                utils::atomic_write(&branch_path(repo, &name), format!("{}\n", id).as_bytes())?;
                info!("Committed {} on {} ({} files)", utils::short_id(&id), name, record.tree.len());
            }
            Head::Detached(_) => {
                write_head(repo, &Head::Detached(id.clone()))?;
                info!("Committed {} on detached HEAD", utils::short_id(&id));
            }
        }
        Ok(id)
    }

    /// Create a branch at the current commit
    #[instrument(skip(self))]
    pub fn branch(&self, repo: &RepositoryHandle, name: &str) -> Result<()> {
        let lock = self.lock_for(repo);
        let _guard = lock.lock();
        self.ensure_initialized(repo)?;

        let head = read_head(repo)?;
        let commit = resolve_head(repo, &head)?
            .ok_or_else(|| ForkpointError::RefNotFound("HEAD".to_string()))?;
        create_branch(repo, name, &commit)
    }

    /// Create a branch at a specific commit
    #[instrument(skip(self))]
    pub fn branch_at(&self, repo: &RepositoryHandle, name: &str, reference: &str) -> Result<()> {
        let lock = self.lock_for(repo);
        let _guard = lock.lock();
        self.ensure_initialized(repo)?;

        let commit = resolve_commit(repo, reference)?;
        create_branch(repo, name, &commit)
    }

    /// Make the working tree match `reference`
    ///
    /// `reference` may be a branch name, a full commit id or a unique commit
    /// prefix. Files tracked by the old HEAD but absent from the target are
    /// removed; untracked files are left alone. Without `force`, a working
    /// tree that differs from HEAD is refused.
    #[instrument(skip(self))]
    pub fn checkout(&self, repo: &RepositoryHandle, reference: &str, force: bool) -> Result<()> {
        let lock = self.lock_for(repo);
        let _guard = lock.lock();
        self.ensure_initialized(repo)?;

        let old_head = read_head(repo)?;
        let old_tree = match resolve_head(repo, &old_head)? {
            Some(id) => load_commit(repo, &id)?.tree,
            None => Tree::new(),
        };

        if !force && self.working_tree(repo)? != old_tree {
            return Err(ForkpointError::UncommittedChanges(repo.working_dir.clone()));
        }

        let (new_head, target) = if branch_path(repo, reference).is_file() {
            let id = read_branch(repo, reference)?;
            (Head::Branch(reference.to_string()), id)
        } else if reference == current_branch_name(&old_head) {
            // Unborn current branch: nothing to check out
            return Ok(());
        } else {
            let id = resolve_commit(repo, reference)?;
            (Head::Detached(id.clone()), id)
        };

        let target_tree = load_commit(repo, &target)?.tree;
        let objects = self.object_store(repo)?;

        let mut removed = 0;
        for key in old_tree.keys().filter(|k| !target_tree.contains_key(*k)) {
            let Some(path) = key_to_path(repo, key) else { continue };
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
                let mut parent = path.parent();
                while let Some(dir) = parent {
                    if dir == repo.working_dir || !utils::remove_dir_if_empty(dir)? {
                        break;
                    }
                    parent = dir.parent();
                }
            }
        }

        let mut written = 0;
        for (key, hash) in &target_tree {
            let Some(path) = key_to_path(repo, key) else {
                warn!("Skipping unsafe tree path {:?}", key);
                continue;
            };
            if let Ok(current) = fs::read(&path) {
                if utils::hash_data(&current) == *hash {
                    continue;
                }
            }
            let content = objects.load(hash)?;
            utils::atomic_write(&path, &content)?;
            written += 1;
        }

        write_json(&repo.store_dir.join("index.json"), &target_tree)?;
        write_head(repo, &new_head)?;

        info!(
            "Checked out {} ({}): {} written, {} removed",
            reference,
            utils::short_id(&target),
            written,
            removed
        );
        Ok(())
    }

    /// Name of the checked-out branch, or `"HEAD"` when detached
    pub fn current_branch(&self, repo: &RepositoryHandle) -> Result<String> {
        self.ensure_initialized(repo)?;
        Ok(current_branch_name(&read_head(repo)?).to_string())
    }

    /// Commit HEAD points at, if any
    pub fn head_commit(&self, repo: &RepositoryHandle) -> Result<Option<String>> {
        self.ensure_initialized(repo)?;
        resolve_head(repo, &read_head(repo)?)
    }

    /// Commit a branch points at, if the branch exists
    pub fn branch_tip(&self, repo: &RepositoryHandle, name: &str) -> Result<Option<String>> {
        self.ensure_initialized(repo)?;
        if validate_branch_name(name).is_err() || !branch_path(repo, name).is_file() {
            return Ok(None);
        }
        read_branch(repo, name).map(Some)
    }

    /// All branch names, sorted
    pub fn list_branches(&self, repo: &RepositoryHandle) -> Result<Vec<String>> {
        self.ensure_initialized(repo)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(repo.store_dir.join("refs/heads"))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// History reachable from HEAD, most recent first
    pub fn log(&self, repo: &RepositoryHandle) -> Result<Vec<CommitInfo>> {
        self.ensure_initialized(repo)?;
        let mut history = Vec::new();
        let mut next = resolve_head(repo, &read_head(repo)?)?;
        while let Some(id) = next {
            let record = load_commit(repo, &id)?;
            next = record.parent.clone();
            history.push(record.info());
        }
        Ok(history)
    }

    /// Look up a single commit
    pub fn commit_info(&self, repo: &RepositoryHandle, reference: &str) -> Result<CommitInfo> {
        self.ensure_initialized(repo)?;
        let id = resolve_commit(repo, reference)?;
        Ok(load_commit(repo, &id)?.info())
    }

    /// Paths tracked by a commit
    pub fn list_files(&self, repo: &RepositoryHandle, commit_id: &str) -> Result<Vec<String>> {
        self.ensure_initialized(repo)?;
        let id = resolve_commit(repo, commit_id)?;
        Ok(load_commit(repo, &id)?.tree.into_keys().collect())
    }

    /// Read one file as of a historical commit
    pub fn read_blob(&self, repo: &RepositoryHandle, commit_id: &str, path: &str) -> Result<Vec<u8>> {
        self.ensure_initialized(repo)?;
        let id = resolve_commit(repo, commit_id)?;
        let record = load_commit(repo, &id)?;
        let hash = record
            .tree
            .get(path)
            .ok_or_else(|| ForkpointError::RefNotFound(format!("{}:{}", utils::short_id(&id), path)))?;
        self.object_store(repo)?.load(hash)
    }

    /// Whether the working tree differs from HEAD
    pub fn is_dirty(&self, repo: &RepositoryHandle) -> Result<bool> {
        let lock = self.lock_for(repo);
        let _guard = lock.lock();
        self.ensure_initialized(repo)?;

        let head_tree = match resolve_head(repo, &read_head(repo)?)? {
            Some(id) => load_commit(repo, &id)?.tree,
            None => Tree::new(),
        };
        Ok(self.working_tree(repo)? != head_tree)
    }

    /// Record the working tree as a recovery snapshot
    ///
    /// Returns `None` when the working tree matches HEAD.
    #[instrument(skip(self))]
    pub fn stash(&self, repo: &RepositoryHandle, reason: &str) -> Result<Option<String>> {
        let lock = self.lock_for(repo);
        let _guard = lock.lock();
        self.ensure_initialized(repo)?;

        let head = read_head(repo)?;
        let head_commit = resolve_head(repo, &head)?;
        let head_tree = match &head_commit {
            Some(id) => load_commit(repo, id)?.tree,
            None => Tree::new(),
        };

        let objects = self.object_store(repo)?;
        let mut files = Tree::new();
        for file in self.tracker(repo).scan()? {
            let content = fs::read(repo.working_path(&file.relative))?;
            files.insert(file.key, objects.store(&content)?);
        }
        if files == head_tree {
            trace!("Working tree clean, nothing to stash");
            return Ok(None);
        }

        let entry = StashEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            reason: reason.to_string(),
            created_at: Utc::now(),
            branch: current_branch_name(&head).to_string(),
            head: head_commit,
            files,
        };
        write_json(&repo.store_dir.join("stash").join(format!("{}.json", entry.id)), &entry)?;

        info!("Stashed working tree as {} ({})", utils::short_id(&entry.id), reason);
        Ok(Some(entry.id))
    }

    /// Recovery snapshots, most recent first
    pub fn list_stashes(&self, repo: &RepositoryHandle) -> Result<Vec<StashEntry>> {
        self.ensure_initialized(repo)?;
        let dir = repo.store_dir.join("stash");
        let mut entries = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "json") {
                    entries.push(read_json::<StashEntry>(&path)?);
                }
            }
        }
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    fn ensure_initialized(&self, repo: &RepositoryHandle) -> Result<()> {
        if self.is_initialized(repo) {
            Ok(())
        } else {
            Err(ForkpointError::NotInitialized(repo.store_dir.clone()))
        }
    }

    fn lock_for(&self, repo: &RepositoryHandle) -> Arc<Mutex<()>> {
        self.locks
            .entry(repo.working_dir.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn object_store(&self, repo: &RepositoryHandle) -> Result<Arc<ObjectStore>> {
        if let Some(store) = self.objects.get(&repo.store_dir) {
            return Ok(store.clone());
        }
        let store = Arc::new(ObjectStore::open(
            repo.store_dir.join("objects"),
            CompressionEngine::new(self.compression),
        )?);
        self.objects.insert(repo.store_dir.clone(), store.clone());
        Ok(store)
    }

    fn tracker(&self, repo: &RepositoryHandle) -> FileTracker {
        let mut tracker = FileTracker::new(repo.working_dir.clone())
            .with_ignore_patterns(self.ignore_patterns.clone());
        if repo.store_dir.starts_with(&repo.working_dir) {
            tracker = tracker.with_excluded_dir(repo.store_dir.clone());
        }
        tracker
    }

    /// Hash the working tree without storing anything
    fn working_tree(&self, repo: &RepositoryHandle) -> Result<Tree> {
        self.tracker(repo)
            .scan()?
            .par_iter()
            .map(|file| -> Result<(String, String)> {
                let content = fs::read(repo.working_path(&file.relative))?;
                Ok((file.key.clone(), utils::hash_data(&content)))
            })
            .collect()
    }
}

fn validate_branch_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name == "HEAD"
        || name.contains(['/', '\\'])
        || name.chars().any(|c| c.is_control() || c.is_whitespace());
    if invalid {
        return Err(ForkpointError::InvalidBranchName(name.to_string()));
    }
    Ok(())
}

fn create_branch(repo: &RepositoryHandle, name: &str, commit: &str) -> Result<()> {
    validate_branch_name(name)?;
    let path = branch_path(repo, name);
    if path.exists() {
        return Err(ForkpointError::BranchExists(name.to_string()));
    }
    utils::atomic_write(&path, format!("{}\n", commit).as_bytes())?;
    info!("Created branch {} at {}", name, utils::short_id(commit));
    Ok(())
}

fn branch_path(repo: &RepositoryHandle, name: &str) -> PathBuf {
    repo.store_dir.join("refs/heads").join(name)
}

fn commit_path(repo: &RepositoryHandle, id: &str) -> PathBuf {
    repo.store_dir.join("commits").join(format!("{}.json", id))
}

fn read_branch(repo: &RepositoryHandle, name: &str) -> Result<String> {
    let id = fs::read_to_string(branch_path(repo, name))?.trim().to_string();
    if !utils::is_full_id(&id) {
        warn!("Branch {} points at malformed id {:?}", name, id);
        return Err(ForkpointError::RefNotFound(name.to_string()));
    }
    Ok(id)
}

fn read_head(repo: &RepositoryHandle) -> Result<Head> {
    let raw = fs::read_to_string(repo.store_dir.join("HEAD"))?;
    let raw = raw.trim();
    Ok(match raw.strip_prefix("ref: ") {
        Some(branch) => Head::Branch(branch.to_string()),
        None if utils::is_full_id(raw) => Head::Detached(raw.to_string()),
        None => return Err(ForkpointError::RefNotFound(format!("HEAD ({:?})", raw))),
    })
}

fn write_head(repo: &RepositoryHandle, head: &Head) -> Result<()> {
    let content = match head {
        Head::Branch(name) => format!("ref: {}\n", name),
        Head::Detached(id) => format!("{}\n", id),
    };
    utils::atomic_write(&repo.store_dir.join("HEAD"), content.as_bytes())
}

fn current_branch_name(head: &Head) -> &str {
    match head {
        Head::Branch(name) => name,
        Head::Detached(_) => "HEAD",
    }
}

/// Commit HEAD resolves to; `None` on an unborn branch
fn resolve_head(repo: &RepositoryHandle, head: &Head) -> Result<Option<String>> {
    match head {
        Head::Branch(name) if branch_path(repo, name).is_file() => read_branch(repo, name).map(Some),
        Head::Branch(_) => Ok(None),
        Head::Detached(id) => Ok(Some(id.clone())),
    }
}

/// Resolve a branch name, full commit id or unique prefix to a commit id
fn resolve_commit(repo: &RepositoryHandle, reference: &str) -> Result<String> {
    if validate_branch_name(reference).is_ok() && branch_path(repo, reference).is_file() {
        return read_branch(repo, reference);
    }
    if !reference.chars().all(|c| c.is_ascii_hexdigit()) || reference.len() < 4 {
        return Err(ForkpointError::RefNotFound(reference.to_string()));
    }
    if commit_path(repo, reference).is_file() {
        return Ok(reference.to_string());
    }

    let mut matches = Vec::new();
    for entry in fs::read_dir(repo.store_dir.join("commits"))? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if let Some(id) = name.strip_suffix(".json") {
            if id.starts_with(reference) {
                matches.push(id.to_string());
            }
        }
    }

    match matches.len() {
        0 => Err(ForkpointError::RefNotFound(reference.to_string())),
        1 => Ok(matches.remove(0)),
        count => Err(ForkpointError::AmbiguousRef { prefix: reference.to_string(), count }),
    }
}

fn load_commit(repo: &RepositoryHandle, id: &str) -> Result<CommitRecord> {
    let path = commit_path(repo, id);
    if !path.is_file() {
        return Err(ForkpointError::RefNotFound(id.to_string()));
    }
    read_json(&path)
}

/// Map a tree key back to a working-tree path, rejecting escapes
fn key_to_path(repo: &RepositoryHandle, key: &str) -> Option<PathBuf> {
    let mut path = repo.working_dir.clone();
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    utils::atomic_write(path, &serde_json::to_vec_pretty(value)?)
}
