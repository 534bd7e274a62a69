//! # Forkpoint CLI - Branching checkpoints for debugging
//!
//! Command-line front end for the Forkpoint library.
//!
//! ## Usage
//! ```bash
//! # Start a session for main.py in the current directory
//! forkpoint init main.py
//!
//! # Run the file and record a checkpoint
//! forkpoint run
//!
//! # Show the checkpoint tree
//! forkpoint tree
//!
//! # Go back to checkpoint 2 and try something else
//! forkpoint restore 2
//!
//! # Checkpoint automatically whenever the file is saved
//! forkpoint watch
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use forkpoint::{
    ChangeDetector, CompressionStrategy, DetectorHandle, GraphEvent, Hunk, LineKind, NoticeLevel,
    Session, SessionBuilder, StaticEditor,
};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Forkpoint CLI - branching checkpoints for iterative debugging
#[derive(Parser)]
#[command(name = "forkpoint")]
#[command(version)]
#[command(about = "Record every run of the file you are debugging as a branching checkpoint tree")]
#[command(long_about = None)]
struct Cli {
    /// Working directory (defaults to current)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session for a file
    Init {
        /// File to debug, relative to the working directory
        file: PathBuf,

        /// Label of the root checkpoint
        #[arg(short, long)]
        message: Option<String>,

        /// Interpreter used to run the file
        #[arg(long, default_value = "python3")]
        interpreter: String,

        /// Extension of files that create checkpoints
        #[arg(long, default_value = "py")]
        extension: String,

        /// Ignore patterns (glob syntax)
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Compression of stored objects
        #[arg(long, value_enum, default_value = "fast")]
        compression: CompressionMode,

        /// Context lines around each hunk
        #[arg(long, default_value_t = 2)]
        context: usize,
    },

    /// Show the checkpoint tree
    Tree {
        /// Include hidden checkpoints
        #[arg(short, long)]
        all: bool,
    },

    /// Show commit history of the current branch
    Log {
        /// Limit number of commits shown
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Run the tracked file and record a checkpoint
    Run,

    /// Record a checkpoint whenever the tracked file is saved
    Watch {
        /// Polling interval in milliseconds
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Restore the working tree to a checkpoint
    Restore {
        /// Checkpoint id
        id: u64,
    },

    /// Show the tracked file's changes between two checkpoints
    Diff {
        /// Older checkpoint
        from: u64,
        /// Newer checkpoint (defaults to the active one)
        to: Option<u64>,
    },

    /// Show checkpoint details
    Info {
        /// Checkpoint id (defaults to the active one)
        id: Option<u64>,
    },

    /// Hide a checkpoint from the tree
    Hide {
        /// Checkpoint id
        id: u64,
    },

    /// Show a hidden checkpoint again
    Show {
        /// Checkpoint id
        id: u64,
    },

    /// Show session status
    Status,

    /// Copy the session to a directory
    Export {
        /// Destination directory
        dest: PathBuf,
    },

    /// Replace the session with an export
    Import {
        /// Directory written by `export`
        src: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CompressionMode {
    None,
    Fast,
}

impl From<CompressionMode> for CompressionStrategy {
    fn from(mode: CompressionMode) -> Self {
        match mode {
            CompressionMode::None => CompressionStrategy::None,
            CompressionMode::Fast => CompressionStrategy::Fast,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("forkpoint=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        let message = match e.downcast_ref::<forkpoint::ForkpointError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
async fn run(cli: Cli) -> anyhow::Result<()> {
    let path = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let root = std::fs::canonicalize(&path)
        .with_context(|| format!("working directory {} not found", path.display()))?;

    match cli.command {
        Commands::Init { file, message, interpreter, extension, ignore, compression, context } => {
            cmd_init(root, file, message, interpreter, extension, ignore, compression, context)
        }
        Commands::Tree { all } => cmd_tree(&root, all),
        Commands::Log { limit } => cmd_log(&root, limit),
        Commands::Run => cmd_run(&root).await,
        Commands::Watch { interval } => cmd_watch(&root, interval).await,
        Commands::Restore { id } => cmd_restore(&root, id),
        Commands::Diff { from, to } => cmd_diff(&root, from, to),
        Commands::Info { id } => cmd_info(&root, id),
        Commands::Hide { id } => cmd_visibility(&root, id, false),
        Commands::Show { id } => cmd_visibility(&root, id, true),
        Commands::Status => cmd_status(&root),
        Commands::Export { dest } => cmd_export(&root, &dest),
        Commands::Import { src } => cmd_import(&root, &src),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_init(
    root: PathBuf,
    file: PathBuf,
    message: Option<String>,
    interpreter: String,
    extension: String,
    ignore: Vec<String>,
    compression: CompressionMode,
    context: usize,
) -> anyhow::Result<()> {
    println!("{}", "Initializing Forkpoint...".blue().bold());

    let text = message.unwrap_or_else(|| format!("Debugging {}", file.display()));
    let session = SessionBuilder::new(root.clone(), file.clone())
        .interpreter(interpreter)
        .tracked_extension(extension)
        .ignore_patterns(ignore)
        .compression_strategy(compression.into())
        .context_lines(context)
        .init(&text)?;

    let branch = session.store().current_branch(session.repository())?;
    println!("{} Session started for {}", "✓".green().bold(), file.display().to_string().cyan());
    println!("  Root: {}", root.display().to_string().cyan());
    println!("  State: {}", session.config().state_dir.display().to_string().cyan());
    println!("  Branch: {}", branch.cyan());
    println!("\nNext steps:");
    println!("  - Record a checkpoint: {}", "forkpoint run".yellow());
    println!("  - Checkpoint on every save: {}", "forkpoint watch".yellow());
    Ok(())
}

fn cmd_tree(root: &Path, all: bool) -> anyhow::Result<()> {
    let session = Session::open(root)?;
    let graph = session.graph();
    let default_branch = &session.config().default_branch;

    println!("{}", "Checkpoints:".blue().bold());
    println!();
    for row in graph.tree_rows(all) {
        let node = row.node;
        let marker = if row.is_active { "*".green().bold() } else { "○".normal() };
        let mut line = format!(
            "{}{} {} {}",
            row.prefix.dimmed(),
            marker,
            node.id.to_string().yellow(),
            node.text
        );
        if !node.branch_id.is_empty() && &node.branch_id != default_branch {
            line.push_str(&format!(" {}", format!("[{}]", short_branch(&node.branch_id)).dimmed()));
        }
        if node.commit_id.is_empty() {
            line.push_str(&format!(" {}", "(pending)".red()));
        }
        if !node.visible {
            line.push_str(&format!(" {}", "(hidden)".dimmed()));
        }
        if row.is_active {
            line.push_str(&format!(" {}", "(active)".green().dimmed()));
        }
        println!("{}", line);
    }
    Ok(())
}

fn cmd_log(root: &Path, limit: Option<usize>) -> anyhow::Result<()> {
    let session = Session::open(root)?;
    let history = session.store().log(session.repository())?;
    let branch = session.store().current_branch(session.repository())?;

    println!("{} {}", "History of".blue().bold(), branch.cyan());
    println!();
    for commit in history.iter().take(limit.unwrap_or(usize::MAX)) {
        println!(
            "{} {} {}",
            commit.short_id().yellow(),
            commit.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            commit.message
        );
    }
    Ok(())
}

async fn cmd_run(root: &Path) -> anyhow::Result<()> {
    let mut session = Session::open(root)?;

    let start = Instant::now();
    let pb = spinner(format!("Running {}...", session.config().tracked_file.display()));
    let result = session.run_and_checkpoint().await;
    pb.finish_and_clear();
    let id = result?;

    let node = session.graph().get(id)?;
    if node.commit_id.is_empty() {
        println!("{} Checkpoint {} recorded but not committed", "!".yellow().bold(), id);
    } else {
        println!("{} Checkpoint {}: {}", "✓".green().bold(), id.to_string().yellow().bold(), node.text.cyan());
    }
    println!("  Branch: {}", short_branch(&node.branch_id).cyan());
    println!("  Time: {}", format_duration(round_ms(start.elapsed())).to_string().cyan());
    if !node.run_output.is_empty() {
        println!("\n{}", "Output:".bold());
        println!("{}", node.run_output);
    }
    if !node.run_error.is_empty() {
        println!("\n{}", "Errors:".red().bold());
        println!("{}", node.run_error.red());
    }
    Ok(())
}

async fn cmd_watch(root: &Path, interval: Option<u64>) -> anyhow::Result<()> {
    let session = Session::open(root)?;
    let poll = interval.map(Duration::from_millis).unwrap_or(session.config().poll_interval);
    let tracked = session.config().tracked_path();
    let mut events = session.subscribe();
    let shared = session.into_shared();

    let editor = Arc::new(StaticEditor::new(tracked.clone()));
    let (detector, handle) = ChangeDetector::new(shared, editor, poll);

    println!(
        "{} {} (every {}, Ctrl-C to stop)",
        "Watching".blue().bold(),
        tracked.display().to_string().cyan(),
        format_duration(poll)
    );

    let watcher = tokio::spawn(watch_file(tracked, poll, handle));
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    detector
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    watcher.abort();
    printer.abort();
    println!("{}", "Stopped".dimmed());
    Ok(())
}

/// Report every save of `path` as a save followed by a run
async fn watch_file(path: PathBuf, poll: Duration, handle: DetectorHandle) {
    let mut last = modified(&path);
    let mut ticker = tokio::time::interval(poll);
    loop {
        ticker.tick().await;
        let current = modified(&path);
        if current == last {
            continue;
        }
        last = current;
        if !handle.file_saved(path.clone()) || !handle.executed() {
            break;
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn print_event(event: &GraphEvent) {
    match event {
        GraphEvent::NodeCreated { id, parent: Some(parent), .. } => {
            println!("{} Checkpoint {} under {}", "+".green().bold(), id.to_string().yellow(), parent);
        }
        GraphEvent::SummaryUpdated { id, text, .. } => {
            println!("  {} {}", id.to_string().yellow(), text.cyan());
        }
        GraphEvent::Notice { level, message } => match level {
            NoticeLevel::Info => println!("  {}", message),
            NoticeLevel::Warning => println!("  {}", message.yellow()),
            NoticeLevel::Error => println!("  {}", message.red()),
        },
        _ => {}
    }
}

fn cmd_restore(root: &Path, id: u64) -> anyhow::Result<()> {
    let mut session = Session::open(root)?;

    println!("{} {}", "Restoring checkpoint".blue().bold(), id.to_string().yellow());
    let start = Instant::now();
    let pb = spinner("Restoring files...".to_string());
    let result = session.restore(id);
    pb.finish_and_clear();
    result?;

    let node = session.graph().get(id)?;
    println!("{} Restored {}", "✓".green().bold(), node.text.cyan());
    println!("  Branch: {}", short_branch(&node.branch_id).cyan());
    println!("  Time: {}", format_duration(round_ms(start.elapsed())).to_string().cyan());

    let stashes = session.store().list_stashes(session.repository())?;
    if let Some(stash) = stashes.first().filter(|s| s.reason.ends_with(&format!("checkpoint {}", id))) {
        println!("  Uncommitted edits saved as stash {}", stash.short_id().yellow());
    }
    Ok(())
}

fn cmd_diff(root: &Path, from: u64, to: Option<u64>) -> anyhow::Result<()> {
    let session = Session::open(root)?;
    let to = to.unwrap_or_else(|| session.graph().active_node());
    let hunks = session.diff_nodes(from, to)?;

    let key = session.tracked_key();
    println!("{} a/{}", "---".dimmed(), key);
    println!("{} b/{}", "+++".dimmed(), key);
    if hunks.is_empty() {
        println!("{}", "No changes".dimmed());
    }
    print_hunks(&hunks);
    Ok(())
}

fn print_hunks(hunks: &[Hunk]) {
    for hunk in hunks {
        println!(
            "{}",
            format!("@@ -{},{} +{},{} @@", hunk.old_start, hunk.old_len(), hunk.new_start, hunk.new_len())
                .cyan()
        );
        for line in &hunk.lines {
            match line.kind {
                LineKind::Add => println!("{}", format!("+{}", line.text).green()),
                LineKind::Delete => println!("{}", format!("-{}", line.text).red()),
                LineKind::Context => println!(" {}", line.text.dimmed()),
            }
        }
    }
}

fn cmd_info(root: &Path, id: Option<u64>) -> anyhow::Result<()> {
    let session = Session::open(root)?;
    let id = id.unwrap_or_else(|| session.graph().active_node());
    let node = session.graph().get(id)?;

    println!("{} {}", "Checkpoint".blue().bold(), id.to_string().yellow().bold());
    println!("  Text: {}", node.text.cyan());
    match node.parent {
        Some(parent) => println!("  Parent: {}", parent),
        None => println!("  Parent: {}", "(root)".dimmed()),
    }
    if !node.children.is_empty() {
        let children: Vec<String> = node.children.iter().map(u64::to_string).collect();
        println!("  Children: {}", children.join(", "));
    }
    if node.commit_id.is_empty() {
        println!("  Commit: {}", "(pending)".red());
    } else {
        println!("  Commit: {}", node.commit_id[..12.min(node.commit_id.len())].yellow());
        println!("  Branch: {}", node.branch_id.cyan());
    }
    println!("  Created: {}", node.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if !node.visible {
        println!("  {}", "Hidden".dimmed());
    }

    if !node.diffs.is_empty() {
        println!("\n{}", "Changes:".bold());
        print_hunks(&node.diffs);
    }
    if !node.run_output.is_empty() {
        println!("\n{}", "Output:".bold());
        println!("{}", node.run_output);
    }
    if !node.run_error.is_empty() {
        println!("\n{}", "Errors:".red().bold());
        println!("{}", node.run_error.red());
    }
    Ok(())
}

fn cmd_visibility(root: &Path, id: u64, visible: bool) -> anyhow::Result<()> {
    let mut session = Session::open(root)?;
    session.set_visible(id, visible)?;
    let verb = if visible { "Showing" } else { "Hid" };
    println!("{} {} checkpoint {}", "✓".green().bold(), verb, id.to_string().yellow());
    Ok(())
}

fn cmd_status(root: &Path) -> anyhow::Result<()> {
    let session = Session::open(root)?;
    let repo = session.repository();
    let stats = session.graph().stats();
    let active = session.graph().active()?;

    println!("{}", "Forkpoint Status".blue().bold());
    println!("  Tracked file: {}", session.config().tracked_file.display().to_string().cyan());
    println!("  Active: {} {}", active.id.to_string().yellow(), active.text);
    println!("  Branch: {}", session.store().current_branch(repo)?.cyan());
    println!(
        "  Checkpoints: {} ({} committed, {} hidden)",
        stats.total_nodes.to_string().cyan(),
        stats.committed_nodes,
        stats.hidden_nodes
    );
    println!("  Forks: {}", stats.fork_points);
    println!("  Depth: {}", stats.max_depth);
    println!("  Branches: {}", session.store().list_branches(repo)?.len());
    println!("  Stashes: {}", session.store().list_stashes(repo)?.len());

    let dirty = session.store().is_dirty(repo)?;
    if dirty {
        println!("  Working tree: {}", "modified".yellow());
    } else {
        println!("  Working tree: {}", "clean".green());
    }
    println!("  Store size: {}", forkpoint::format_bytes(dir_size(&repo.store_dir)).cyan());
    Ok(())
}

fn cmd_export(root: &Path, dest: &Path) -> anyhow::Result<()> {
    let session = Session::open(root)?;
    let pb = spinner("Exporting...".to_string());
    let result = session.export(dest);
    pb.finish_and_clear();
    result.with_context(|| format!("export to {} failed", dest.display()))?;

    println!("{} Exported {} checkpoints to {}", "✓".green().bold(), session.graph().node_count(), dest.display().to_string().cyan());
    Ok(())
}

fn cmd_import(root: &Path, src: &Path) -> anyhow::Result<()> {
    let mut session = Session::open(root)?;
    let pb = spinner("Importing...".to_string());
    let result = session.import(src);
    pb.finish_and_clear();
    result?;

    println!(
        "{} Imported {} checkpoints; active checkpoint {}",
        "✓".green().bold(),
        session.graph().node_count(),
        session.graph().active_node().to_string().yellow()
    );
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message);
    pb
}

fn short_branch(branch: &str) -> &str {
    // Fork names end in a 32-char uuid; the prefix is enough to tell them apart
    match branch.rfind('-') {
        Some(pos) if branch.len() - pos > 8 => &branch[..pos + 9],
        _ => branch,
    }
}

fn round_ms(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
