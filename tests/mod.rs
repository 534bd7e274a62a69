//! Main test module for Forkpoint
//!
//! This module includes all test suites:
//! - Integration tests for checkpoint, fork, restore and transfer scenarios
//! - Property-based tests for diff, hunk and graph invariants

pub mod integration;
pub mod property;

use ::forkpoint::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Runner that "executes" a script by echoing its source
pub struct EchoRunner;

#[async_trait]
impl ScriptRunner for EchoRunner {
    async fn run(&self, path: &Path) -> Result<RunOutput> {
        Ok(RunOutput {
            stdout: fs::read_to_string(path)?,
            stderr: String::new(),
            exit_code: Some(0),
            signal: None,
        })
    }
}

/// Summary service that records every diff it is asked about
#[derive(Default)]
pub struct RecordingSummary {
    pub requests: Mutex<Vec<String>>,
}

#[async_trait]
impl SummaryService for RecordingSummary {
    async fn summarize(&self, diff_text: &str) -> Result<String> {
        self.requests.lock().push(diff_text.to_string());
        Ok(format!("Summary #{}", self.requests.lock().len()))
    }
}

/// Summary service that never answers in time
pub struct StalledSummary;

#[async_trait]
impl SummaryService for StalledSummary {
    async fn summarize(&self, _diff_text: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("late".to_string())
    }
}

/// A session over a temporary directory tracking `main.py`
pub struct DebugHarness {
    pub dir: TempDir,
    pub session: Session,
}

impl DebugHarness {
    /// New session whose root holds `initial` as main.py
    pub fn new(initial: &str) -> Self {
        Self::with_builder(initial, |b| b)
    }

    /// Same as `new`, with extra builder configuration
    pub fn with_builder(initial: &str, configure: impl FnOnce(SessionBuilder) -> SessionBuilder) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.py"), initial).unwrap();

        let builder = SessionBuilder::new(dir.path(), "main.py")
            .runner(Arc::new(EchoRunner))
            .author("tester");
        let session = configure(builder).init("Debugging main.py").unwrap();
        Self { dir, session }
    }

    /// Path of the tracked file
    pub fn tracked(&self) -> PathBuf {
        self.dir.path().join("main.py")
    }

    /// Overwrite the tracked file
    pub fn write(&self, content: &str) {
        fs::write(self.tracked(), content).unwrap();
    }

    /// Current content of the tracked file
    pub fn read(&self) -> Vec<u8> {
        fs::read(self.tracked()).unwrap()
    }

    /// Write `content` and checkpoint it under the active node
    pub async fn edit_and_run(&mut self, content: &str) -> u64 {
        self.write(content);
        self.session.run_and_checkpoint().await.unwrap()
    }
}
