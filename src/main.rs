// 🏛️ tcsi-load
// Load one or more TCSI extract directories into the SQLite warehouse

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tcsi_warehouse::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use tcsi_warehouse::{open_database, process_sources_with, CommitMode, DirectoryReport, LoaderConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tcsi-load")]
#[command(about = "Stage TCSI extract files and upsert them into the warehouse")]
#[command(version)]
struct Args {
    /// Extract directories, processed in the order given
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// SQLite warehouse path
    #[arg(long, env = "TCSI_DB_PATH", default_value = tcsi_warehouse::config::DEFAULT_DB_PATH)]
    db_path: PathBuf,

    /// Rows between staging progress log lines
    #[arg(long, default_value_t = tcsi_warehouse::staging::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Run all transform steps in one transaction
    #[arg(long)]
    atomic: bool,

    /// Use this extraction timestamp instead of deriving it from directory names
    #[arg(long)]
    extraction_timestamp: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TCSI_LOG_LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&LogConfig {
        level: args.log_level,
        format: if args.log_json { LogFormat::Json } else { LogFormat::Text },
    })?;

    let config = LoaderConfig::new()
        .with_db_path(&args.db_path)
        .with_batch_size(args.batch_size)
        .with_commit_mode(if args.atomic { CommitMode::Atomic } else { CommitMode::PerStep })
        .with_extraction_timestamp(args.extraction_timestamp);

    let conn = open_database(&config.db_path)
        .with_context(|| format!("Failed to open warehouse {}", config.db_path.display()))?;
    info!(db = %config.db_path.display(), mode = %config.commit_mode, "warehouse ready");

    let reports = process_sources_with(&conn, &args.sources, &config, print_summary).context("Load aborted")?;

    info!(directories = reports.len(), "load complete");
    Ok(())
}

/// One JSON object per directory on stdout, written as soon as it is recorded
fn print_summary(report: &DirectoryReport) {
    let summary = serde_json::json!({
        "directory": report.directory,
        "extraction_timestamp": report.extraction_timestamp,
        "staged": report.counts,
        "skipped_files": report.skipped,
        "steps_applied": report.pipeline.applied(),
        "steps_skipped": report.pipeline.skipped(),
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{}", text),
        Err(e) => warn!(error = %e, "failed to render directory summary"),
    }
}
