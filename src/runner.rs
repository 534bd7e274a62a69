//! Script execution
//!
//! Running the tracked file is a black box to the checkpoint engine: a
//! [`ScriptRunner`] takes a path and returns captured output. The default
//! [`CommandRunner`] spawns the configured interpreter with `tokio::process`.
//!
//! Captured output is truncated before it reaches the graph. Standard output
//! keeps its head plus an omission count; standard error keeps head and tail,
//! since tracebacks end with the interesting part.

use crate::error::{ForkpointError, Result};
use crate::types::{OutputLimits, RunOutput};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Runs the tracked file and captures its output
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run the file at `path` once
    async fn run(&self, path: &Path) -> Result<RunOutput>;
}

/// Runs a file with an interpreter, e.g. `python3 main.py`
#[derive(Debug, Clone)]
pub struct CommandRunner {
    interpreter: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandRunner {
    /// Create a runner for an interpreter
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Arguments placed before the script path
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Directory the script runs in (defaults to the script's directory)
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    /// Kill the script if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl ScriptRunner for CommandRunner {
    #[instrument(skip(self), fields(interpreter = %self.interpreter))]
    async fn run(&self, path: &Path) -> Result<RunOutput> {
        let dir = self
            .working_dir
            .clone()
            .or_else(|| path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.args)
            .arg(path)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    ForkpointError::runner(format!(
                        "{:?} did not finish within {}",
                        path,
                        humantime::format_duration(limit)
                    ))
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| {
            ForkpointError::runner(format!(
                "failed to start {} in {:?}: {}",
                self.interpreter, dir, e
            ))
        })?;

        let result = RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            signal: exit_signal(&output.status),
        };

        if !result.succeeded() {
            warn!("{:?} exited with {:?} (signal {:?})", path, result.exit_code, result.signal);
        }
        debug!(
            "Ran {:?} in {}ms: {} bytes stdout, {} bytes stderr",
            path,
            start.elapsed().as_millis(),
            result.stdout.len(),
            result.stderr.len()
        );
        Ok(result)
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Apply output limits, returning (stdout, stderr) ready for the graph
pub fn truncate_output(output: &RunOutput, limits: &OutputLimits) -> (String, String) {
    (
        truncate_stdout(&output.stdout, limits.stdout_head_lines),
        truncate_stderr(&output.stderr, limits.stderr_head_lines, limits.stderr_tail_lines),
    )
}

/// Keep the first `head` lines and note how many were dropped
pub fn truncate_stdout(text: &str, head: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= head {
        return text.to_string();
    }

    let mut out = lines[..head].join("\n");
    if head > 0 {
        out.push('\n');
    }
    out.push_str(&format!("... ({} more lines omitted)", lines.len() - head));
    out
}

/// Keep the first `head` and last `tail` lines
pub fn truncate_stderr(text: &str, head: usize, tail: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= head + tail {
        return text.to_string();
    }

    let omitted = lines.len() - head - tail;
    let mut parts: Vec<String> = lines[..head].iter().map(|l| l.to_string()).collect();
    parts.push(format!("... ({} lines omitted) ...", omitted));
    parts.extend(lines[lines.len() - tail..].iter().map(|l| l.to_string()));
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_keeps_head() {
        let text: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
        let out = truncate_stdout(&text, 3);
        assert_eq!(out, "line 1\nline 2\nline 3\n... (7 more lines omitted)");
        assert_eq!(truncate_stdout("short\n", 3), "short\n");
    }

    #[test]
    fn test_stderr_keeps_head_and_tail() {
        let text: String = (1..=10).map(|i| format!("e{}\n", i)).collect();
        let out = truncate_stderr(&text, 2, 2);
        assert_eq!(out, "e1\ne2\n... (6 lines omitted) ...\ne9\ne10");
    }

    #[test]
    fn test_truncate_output_uses_limits() {
        let output = RunOutput {
            stdout: "a\n".repeat(60),
            stderr: "b\n".repeat(10),
            exit_code: Some(1),
            signal: None,
        };
        let (stdout, stderr) = truncate_output(&output, &OutputLimits::default());
        assert!(stdout.ends_with("(10 more lines omitted)"));
        assert_eq!(stderr, output.stderr);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_captures_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("script.sh");
        std::fs::write(&script, "echo out\necho err >&2\nexit 3\n").unwrap();

        let output = CommandRunner::new("sh").run(&script).await.unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.succeeded());
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("main.py");
        std::fs::write(&script, "print(1)\n").unwrap();

        let result = CommandRunner::new("forkpoint-no-such-interpreter").run(&script).await;
        assert!(matches!(result, Err(ForkpointError::Runner(_))));
    }
}
