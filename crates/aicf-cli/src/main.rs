//! AICF - AI session memory CLI
//!
//! The `aicf` command turns captured session checkpoints into record files
//! and maintains the narrative log.
//!
//! ## Commands
//!
//! - `init`: Create the record layout for a project
//! - `process`: Run one checkpoint (JSON file or stdin) through the pipeline
//! - `decay`: Compact tracked category records
//! - `compact-log`: Archive or summarize older narrative entries
//! - `dedupe-log`: Remove duplicate narrative entries
//! - `stats`: Show storage efficiency figures

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aicf_core::narrative::{self, CompactMode};
use aicf_core::{
    analyze_store, Checkpoint, DecayMonitor, DecayReport, MemoryConfig, MemoryStore,
    Orchestrator, ProcessingReport,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "aicf")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "AI Context Format session memory", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project root holding `.aicf/` and `.ai/`
    #[arg(long, global = true, env = "AICF_ROOT", default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing record files and the narrative log
    Init,

    /// Process one checkpoint and print the processing report
    Process {
        /// Checkpoint JSON file (reads stdin when omitted)
        file: Option<PathBuf>,
    },

    /// Run memory decay over tracked category records
    Decay {
        /// Category record to decay instead of the tracked set
        #[arg(long)]
        file: Option<PathBuf>,

        /// Apply even when the file is under the size threshold
        #[arg(long)]
        force: bool,
    },

    /// Keep the newest narrative entries and compact the rest
    CompactLog {
        /// Entries to keep verbatim (default: narrative.keep_entries)
        #[arg(short, long)]
        keep: Option<usize>,

        /// Collapse older entries into summary lines instead of archiving
        #[arg(long)]
        summarize: bool,
    },

    /// Remove duplicate narrative entries (same chat number and date)
    DedupeLog,

    /// Show storage efficiency figures for the record files
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    aicf_core::init_tracing(cli.json, level);

    let config = MemoryConfig::load(&cli.root)
        .with_context(|| format!("Failed to load config under {}", cli.root.display()))?;
    let store = Arc::new(MemoryStore::open(&cli.root, config));

    match cli.command {
        Commands::Init => cmd_init(&store),
        Commands::Process { file } => cmd_process(store, file.as_deref()).await,
        Commands::Decay { file, force } => cmd_decay(&store, file.as_deref(), force).await,
        Commands::CompactLog { keep, summarize } => cmd_compact_log(&store, keep, summarize).await,
        Commands::DedupeLog => cmd_dedupe_log(&store).await,
        Commands::Stats => cmd_stats(&store),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(store: &MemoryStore) -> Result<()> {
    let created = store
        .ensure_layout()
        .context("Failed to create record layout")?;
    if created.is_empty() {
        println!("AICF layout already present at {}", store.root().display());
    } else {
        for path in &created {
            println!("created {}", path.display());
        }
    }
    Ok(())
}

async fn read_checkpoint(file: Option<&Path>) -> Result<Checkpoint> {
    let text = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read checkpoint file: {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read checkpoint from stdin")?;
            buf
        }
    };
    Checkpoint::from_json(&text).context("Invalid checkpoint JSON")
}

async fn cmd_process(store: Arc<MemoryStore>, file: Option<&Path>) -> Result<()> {
    let checkpoint = read_checkpoint(file).await?;
    let orchestrator = Orchestrator::new(store);
    let report = orchestrator.process_checkpoint(&checkpoint).await;
    print_json(&report)?;
    if let ProcessingReport::Failure(failure) = report {
        bail!("checkpoint processing failed: {}", failure.error);
    }
    Ok(())
}

#[derive(Serialize)]
struct DecayEntry {
    path: String,
    #[serde(flatten)]
    report: DecayReport,
}

async fn cmd_decay(store: &MemoryStore, file: Option<&Path>, force: bool) -> Result<()> {
    let paths = match file {
        Some(path) => vec![path.to_path_buf()],
        None => store.tracked_paths(),
    };
    let monitor = DecayMonitor::new(store.config().decay.clone(), store.writer().clone());
    let _lock = store.lock().await.context("Failed to lock project")?;

    let now = chrono::Utc::now();
    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let report = if force {
            monitor
                .apply(&path, now)
                .with_context(|| format!("Decay failed for {}", path.display()))?
        } else {
            monitor.maybe_apply(&path, now)
        };
        entries.push(DecayEntry {
            path: path.display().to_string(),
            report,
        });
    }
    print_json(&entries)
}

async fn cmd_compact_log(store: &MemoryStore, keep: Option<usize>, summarize: bool) -> Result<()> {
    let keep = keep.unwrap_or(store.config().narrative.keep_entries);
    let mode = if summarize {
        CompactMode::Summarize
    } else {
        CompactMode::Archive
    };
    let _lock = store.lock().await.context("Failed to lock project")?;
    let report = narrative::compact(&store.narrative_path(), &store.archive_path(), keep, mode)
        .context("Failed to compact narrative log")?;
    info!(kept = report.kept, compacted = report.compacted, "compact-log done");
    print_json(&report)
}

async fn cmd_dedupe_log(store: &MemoryStore) -> Result<()> {
    let _lock = store.lock().await.context("Failed to lock project")?;
    let report =
        narrative::dedupe(&store.narrative_path()).context("Failed to dedupe narrative log")?;
    print_json(&report)
}

fn cmd_stats(store: &MemoryStore) -> Result<()> {
    let stats = analyze_store(store.records_dir()).with_context(|| {
        format!(
            "Failed to analyze records in {}",
            store.records_dir().display()
        )
    })?;
    print_json(&stats)
}
