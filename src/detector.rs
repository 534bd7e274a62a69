//! Change detection
//!
//! The detector decides when a checkpoint should be created. Editors and
//! terminals report what happened through a [`DetectorHandle`]; signals queue
//! up on an unbounded channel and are folded into a [`PendingTrigger`] once
//! per tick. The decision itself is a pure function of that trigger, so the
//! timing (the tick loop) and the policy ([`decide`], [`should_checkpoint`])
//! can be tested separately.
//!
//! A checkpoint is created when the active file was saved *and* executed
//! since the last tick, and a line diff against the last content seen for
//! that path has at least one added or removed line. An execution without a
//! save is discarded, as are saves of other files.
//!
//! Restores must not look like edits. A restore in the same process is
//! announced on the graph's event channel and cancels pending saves; a
//! restore run by another process is picked up by reloading the session
//! from disk before each evaluation.

use crate::diff::{compute_line_diff, has_changes};
use crate::error::{ForkpointError, Result};
use crate::session::SharedSession;
use crate::types::{GraphEvent, NoticeLevel};
use crate::utils;
use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Something the editor or terminal observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A file was saved
    FileSaved(PathBuf),
    /// The tracked file was run
    Executed,
    /// A restore finished writing files; its saves are not user edits
    RestoreCompleted,
}

/// Sending half of the detector's signal queue
#[derive(Debug, Clone)]
pub struct DetectorHandle {
    tx: mpsc::UnboundedSender<Signal>,
}

impl DetectorHandle {
    /// Queue a signal; returns false once the detector has stopped
    pub fn send(&self, signal: Signal) -> bool {
        self.tx.send(signal).is_ok()
    }

    /// Report a file save
    pub fn file_saved(&self, path: impl Into<PathBuf>) -> bool {
        self.send(Signal::FileSaved(path.into()))
    }

    /// Report an execution
    pub fn executed(&self) -> bool {
        self.send(Signal::Executed)
    }

    /// Report a finished restore
    pub fn restore_completed(&self) -> bool {
        self.send(Signal::RestoreCompleted)
    }
}

/// Signals accumulated since the last evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingTrigger {
    /// A save was observed
    pub file_changed: bool,
    /// An execution was observed
    pub executed: bool,
}

impl PendingTrigger {
    /// Fold one signal into the trigger
    pub fn apply(&mut self, signal: &Signal) {
        match signal {
            Signal::FileSaved(_) => self.file_changed = true,
            Signal::Executed => self.executed = true,
            Signal::RestoreCompleted => self.file_changed = false,
        }
    }

    /// Forget everything
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// What a tick should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing to do
    Idle,
    /// Execution without a save; drop it
    DiscardExecution,
    /// Save and execution both seen; evaluate the file
    Evaluate,
}

/// Decide what to do with the accumulated trigger
pub fn decide(trigger: &PendingTrigger) -> TickAction {
    match (trigger.file_changed, trigger.executed) {
        (true, true) => TickAction::Evaluate,
        (false, true) => TickAction::DiscardExecution,
        _ => TickAction::Idle,
    }
}

/// Whether a save of `saved` concerns the file being debugged
///
/// With no active file every save counts, so the evaluation can report the
/// missing file.
pub fn save_concerns(saved: &Path, active: Option<&Path>) -> bool {
    let Some(active) = active else { return true };
    if saved == active {
        return true;
    }
    match (fs::canonicalize(saved), fs::canonicalize(active)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Whether an evaluated file warrants a checkpoint
pub fn should_checkpoint(first_seen: bool, has_changes: bool) -> bool {
    first_seen || has_changes
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No trigger was pending
    Idle,
    /// An execution without a save was dropped
    DiscardedExecution,
    /// The active file failed a precondition
    Rejected,
    /// The file matched its last-seen content
    Unchanged,
    /// A checkpoint was created
    Checkpointed(u64),
}

/// Source of the file the user is currently editing
pub trait EditorContext: Send + Sync {
    /// Absolute path of the active file, if any
    fn active_file(&self) -> Option<PathBuf>;
}

/// Editor context that always reports the same file
#[derive(Debug, Clone, Default)]
pub struct StaticEditor {
    file: Option<PathBuf>,
}

impl StaticEditor {
    /// Report `file` as active
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: Some(file.into()) }
    }

    /// Report no active file
    pub fn none() -> Self {
        Self { file: None }
    }
}

impl EditorContext for StaticEditor {
    fn active_file(&self) -> Option<PathBuf> {
        self.file.clone()
    }
}

/// Last content seen per file, persisted as a JSON map keyed by absolute path
#[derive(Debug, Clone)]
pub struct LastSeenStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl LastSeenStore {
    /// Load the map at `path`; a missing file yields an empty map
    pub fn load(path: PathBuf) -> Result<Self> {
        let entries = if path.is_file() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Content last seen for `file`
    pub fn get(&self, file: &Path) -> Option<&str> {
        self.entries.get(&key(file)).map(String::as_str)
    }

    /// Record content for `file`
    pub fn set(&mut self, file: &Path, content: String) {
        self.entries.insert(key(file), content);
    }

    /// Number of files tracked
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no file has been seen
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the map to disk
    pub fn save(&self) -> Result<()> {
        utils::atomic_write(&self.path, &serde_json::to_vec_pretty(&self.entries)?)
    }
}

fn key(file: &Path) -> String {
    file.to_string_lossy().into_owned()
}

/// Turns save and execution signals into checkpoints
pub struct ChangeDetector {
    session: SharedSession,
    editor: Arc<dyn EditorContext>,
    rx: mpsc::UnboundedReceiver<Signal>,
    events: Option<broadcast::Receiver<GraphEvent>>,
    trigger: PendingTrigger,
    poll_interval: Duration,
}

impl ChangeDetector {
    /// Create a detector and the handle used to feed it
    pub fn new(
        session: SharedSession,
        editor: Arc<dyn EditorContext>,
        poll_interval: Duration,
    ) -> (Self, DetectorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = session.try_lock().ok().map(|s| s.subscribe());
        let detector = Self {
            session,
            editor,
            rx,
            events,
            trigger: PendingTrigger::default(),
            poll_interval,
        };
        (detector, DetectorHandle { tx })
    }

    /// Trigger as of the last drain
    pub fn pending(&self) -> PendingTrigger {
        self.trigger
    }

    async fn drain(&mut self) {
        let active = self.editor.active_file();
        while let Ok(signal) = self.rx.try_recv() {
            if let Signal::FileSaved(path) = &signal {
                if !save_concerns(path, active.as_deref()) {
                    trace!("Ignoring save of {:?}", path);
                    continue;
                }
            }
            trace!("Signal {:?}", signal);
            self.trigger.apply(&signal);
        }

        // Restores go last so they cancel the saves their own writes caused
        if self.events.is_none() {
            self.events = Some(self.session.lock().await.subscribe());
        }
        let Some(events) = self.events.as_mut() else { return };
        loop {
            match events.try_recv() {
                Ok(GraphEvent::Restored { id }) => {
                    debug!("Checkpoint {} restored; pending save cancelled", id);
                    self.trigger.apply(&Signal::RestoreCompleted);
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => warn!("Missed {} graph events", skipped),
                Err(_) => break,
            }
        }
    }

    /// Process queued signals once
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.drain().await;
        match decide(&self.trigger) {
            TickAction::Idle => Ok(TickOutcome::Idle),
            TickAction::DiscardExecution => {
                debug!("Execution without a save; ignoring");
                self.trigger.executed = false;
                Ok(TickOutcome::DiscardedExecution)
            }
            TickAction::Evaluate => {
                let outcome = self.evaluate().await;
                self.trigger.clear();
                outcome
            }
        }
    }

    async fn evaluate(&mut self) -> Result<TickOutcome> {
        let mut session = self.session.lock().await;
        session.reload()?;

        let file = match session.check_active_file(self.editor.active_file()) {
            Ok(file) => file,
            Err(e) if e.is_precondition() => {
                warn!("Skipping checkpoint: {}", e);
                session.notify(NoticeLevel::Error, e.user_message());
                return Ok(TickOutcome::Rejected);
            }
            Err(e) => return Err(e),
        };

        let content = String::from_utf8_lossy(&fs::read(&file)?).into_owned();
        let previous = session.last_seen().get(&file).map(str::to_owned);
        let changed = previous
            .as_deref()
            .is_some_and(|prev| has_changes(&compute_line_diff(prev, &content)));
        session.last_seen_mut().set(&file, content);
        session.last_seen().save()?;

        if !should_checkpoint(previous.is_none(), changed) {
            debug!("{:?} unchanged since last run", file);
            return Ok(TickOutcome::Unchanged);
        }

        let output = session.run_script(&file).await.map_err(|e| {
            session.notify(NoticeLevel::Error, format!("Could not run {:?}: {}", file, e));
            e
        })?;
        let id = session.checkpoint(&file, &output).await?;
        Ok(TickOutcome::Checkpointed(id))
    }

    /// Tick every poll interval until `shutdown` resolves
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "Change detector started (every {})",
            humantime::format_duration(self.poll_interval)
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Change detector stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(TickOutcome::Checkpointed(id)) => info!("Created checkpoint {}", id),
                        Ok(_) => {}
                        Err(ForkpointError::Io(e)) => warn!("Tick skipped: {}", e),
                        Err(e) => error!("Tick failed: {}", e),
                    }
                }
            }
        }
    }
}
