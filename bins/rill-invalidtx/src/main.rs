//! rill-invalidtx — Inspect the invalid transaction log.
//!
//! Reads the segment files written by the node's file sink. Safe to run while
//! the node is up: the sink rescans the directory and picks up deletions.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rill_core::types::Hash256;
use rill_invalidtx::config::{FileSinkConfig, INVALID_TX_DIR};
use rill_invalidtx::sink::file::scan_segments;
use rill_invalidtx::{FileSink, InvalidTxSink};
use serde_json::Value;
use tracing::{debug, warn};

/// Invalid transaction log inspector.
#[derive(Parser)]
#[command(name = "rill-invalidtx", version, about = "Inspect rejected transactions recorded by a Rill node")]
struct Cli {
    /// Directory holding the segments (default: <data dir>/rill/invalidtxs).
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print stored records, oldest first.
    List(ListArgs),
    /// Show how much disk the log uses.
    Usage,
    /// Delete every stored record.
    Clear,
}

#[derive(Args)]
struct ListArgs {
    /// Only records for this transaction id (hex).
    #[arg(long)]
    txid: Option<String>,

    /// Print at most this many of the newest matching records.
    #[arg(short = 'n', long)]
    limit: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format);

    let dir = resolve_dir(cli.dir)?;
    debug!(dir = %dir.display(), "invalidtx: using log directory");

    match cli.command {
        Commands::List(args) => list(&dir, args),
        Commands::Usage => usage(&dir),
        Commands::Clear => clear(&dir),
    }
}

fn list(dir: &Path, args: ListArgs) -> Result<()> {
    let txid = args
        .txid
        .as_deref()
        .map(|s| s.parse::<Hash256>().with_context(|| format!("Invalid txid: {s}")))
        .transpose()?;

    for record in read_records(dir, txid.as_ref(), args.limit)? {
        println!("{record}");
    }
    Ok(())
}

fn usage(dir: &Path) -> Result<()> {
    let segments = scan_segments(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?;
    let total: u64 = segments.iter().map(|s| s.size).sum();

    println!("Directory: {}", dir.display());
    println!("Segments:  {}", segments.len());
    println!("Bytes:     {total}");
    Ok(())
}

fn clear(dir: &Path) -> Result<()> {
    if !dir.exists() {
        println!("Nothing to clear in {}", dir.display());
        return Ok(());
    }
    let sink = FileSink::open(&FileSinkConfig {
        dir: dir.to_path_buf(),
        ..FileSinkConfig::default()
    })
    .context("Failed to open invalid transaction log")?;
    let freed = sink.clear().context("Failed to clear invalid transaction log")?;
    println!("Freed {freed} bytes");
    Ok(())
}

/// Parsed records across all segments, oldest first, optionally filtered to
/// one txid and trimmed to the newest `limit`.
fn read_records(dir: &Path, txid: Option<&Hash256>, limit: Option<usize>) -> Result<Vec<Value>> {
    let wanted = txid.map(ToString::to_string);
    let mut records = Vec::new();

    let segments = scan_segments(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?;
    for segment in segments {
        let file = match File::open(&segment.path) {
            Ok(f) => f,
            // Evicted between scan and open.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open {}", segment.path.display()));
            }
        };
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {}", segment.path.display()))?;
            let record: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    // A torn last line while the node is writing.
                    warn!(path = %segment.path.display(), line = line_no + 1, "invalidtx: skipping unparsable record: {e}");
                    continue;
                }
            };
            if wanted.as_deref().is_none_or(|w| record["txid"].as_str() == Some(w)) {
                records.push(record);
            }
        }
    }

    if let Some(limit) = limit {
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
    }
    Ok(records)
}

fn resolve_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(d) = dir {
        return Ok(d);
    }
    let data = dirs::data_dir().context("Could not determine data directory")?;
    Ok(data.join("rill").join(INVALID_TX_DIR))
}

fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .init();
    }
}
