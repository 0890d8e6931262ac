//! InkBridge command-line entry point.
//!
//! # Responsibility
//! - Run transcription passes and block edits against a local page store.
//! - Replay recognizer output from JSON-lines transcript fixtures.
//!
//! Usage:
//!   inkbridge --db notes.sqlite3 transcribe --page p1 --strokes new.json --transcript p1.jsonl
//!   inkbridge --db notes.sqlite3 refresh --page p1 --transcript p1.jsonl
//!   inkbridge --db notes.sqlite3 blocks --page p1 --tree

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inkbridge_core::{
    default_log_level, init_logging, open_db, BlockArena, BlockId, EditOutcome, FixtureOracle,
    MergeRequest, PassOutcome, PersistenceGateway, ReconcileConfig, SplitRequest, SqliteGateway,
    Stroke, StrokeId, TranscriptionService, DEFAULT_LINE_TOLERANCE,
};
use log::info;
use std::path::{Path, PathBuf};

/// Handwriting transcription with incremental block reconciliation.
#[derive(Parser, Debug)]
#[command(name = "inkbridge", version)]
struct Cli {
    /// SQLite page store; created and migrated on first use.
    #[arg(long, default_value = "inkbridge.sqlite3")]
    db: PathBuf,

    /// Absolute directory for rolling log files. Logging is off when unset.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long)]
    log_level: Option<String>,

    /// Vertical padding applied to recognized line bounds.
    #[arg(long, default_value_t = DEFAULT_LINE_TOLERANCE)]
    tolerance: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize only strokes not yet backing a block.
    Transcribe {
        #[arg(long)]
        page: String,
        /// JSON array of captured strokes.
        #[arg(long)]
        strokes: Option<PathBuf>,
        /// JSON-lines recognizer output for the page.
        #[arg(long)]
        transcript: PathBuf,
    },
    /// Re-recognize every live stroke of the page.
    Refresh {
        #[arg(long)]
        page: String,
        /// JSON array of locally cached strokes.
        #[arg(long)]
        cached: Option<PathBuf>,
        #[arg(long)]
        strokes: Option<PathBuf>,
        #[arg(long)]
        transcript: PathBuf,
    },
    /// Print the page's blocks as JSON, or as an indented outline.
    Blocks {
        #[arg(long)]
        page: String,
        #[arg(long)]
        tree: bool,
    },
    /// Tombstone erased strokes.
    Erase {
        #[arg(long)]
        page: String,
        #[arg(long = "stroke", required = true)]
        strokes: Vec<StrokeId>,
    },
    /// Merge one block into another.
    Merge {
        #[arg(long)]
        page: String,
        #[arg(long)]
        survivor: BlockId,
        #[arg(long)]
        absorbed: BlockId,
        #[arg(long)]
        content: Option<String>,
    },
    /// Split a block at a vertical position.
    Split {
        #[arg(long)]
        page: String,
        #[arg(long)]
        block: BlockId,
        #[arg(long, allow_negative_numbers = true)]
        boundary: f64,
        #[arg(long)]
        upper: String,
        #[arg(long)]
        lower: String,
    },
    /// Print version information.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir).context("failed to initialize logging")?;
    }

    info!(
        "event=cli_command module=cli status=start db={}",
        cli.db.display()
    );

    if let Command::Version = cli.command {
        println!("inkbridge {}", inkbridge_core::core_version());
        return Ok(());
    }

    let config = ReconcileConfig::with_line_tolerance(cli.tolerance)?;
    let conn = open_db(&cli.db)
        .with_context(|| format!("failed to open page store `{}`", cli.db.display()))?;
    let gateway = SqliteGateway::try_new(&conn)?;

    match cli.command {
        Command::Transcribe {
            page,
            strokes,
            transcript,
        } => {
            let oracle = load_oracle(&transcript, &config)?;
            let service = TranscriptionService::new(gateway, oracle, config)?;
            let captured = load_strokes(strokes.as_deref())?;
            print_pass(&service.transcribe_new(&page, &captured)?);
        }
        Command::Refresh {
            page,
            cached,
            strokes,
            transcript,
        } => {
            let oracle = load_oracle(&transcript, &config)?;
            let service = TranscriptionService::new(gateway, oracle, config)?;
            let cached = load_strokes(cached.as_deref())?;
            let captured = load_strokes(strokes.as_deref())?;
            print_pass(&service.refresh_page(&page, &cached, &captured)?);
        }
        Command::Blocks { page, tree } => {
            let blocks = gateway.list_blocks(&page)?;
            if tree {
                print_outline(&BlockArena::from_blocks(blocks));
            } else {
                println!("{}", serde_json::to_string_pretty(&blocks)?);
            }
        }
        Command::Erase { page, strokes } => {
            let service = TranscriptionService::new(gateway, FixtureOracle::default(), config)?;
            let erased = service.delete_strokes(&page, &strokes)?;
            println!("erased={erased}");
        }
        Command::Merge {
            page,
            survivor,
            absorbed,
            content,
        } => {
            let service = TranscriptionService::new(gateway, FixtureOracle::default(), config)?;
            let outcome = service.merge_blocks(
                &page,
                &MergeRequest {
                    survivor,
                    absorbed,
                    merged_content: content,
                },
            )?;
            print_edit(&outcome)?;
        }
        Command::Split {
            page,
            block,
            boundary,
            upper,
            lower,
        } => {
            let service = TranscriptionService::new(gateway, FixtureOracle::default(), config)?;
            let outcome = service.split_block(
                &page,
                &SplitRequest {
                    block_id: block,
                    boundary_y: boundary,
                    upper_content: upper,
                    lower_content: lower,
                },
            )?;
            print_edit(&outcome)?;
        }
        Command::Version => {}
    }
    Ok(())
}

fn load_oracle(path: &Path, config: &ReconcileConfig) -> Result<FixtureOracle> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript `{}`", path.display()))?;
    Ok(FixtureOracle::from_json_lines(&raw)?.with_tolerance(config.line_tolerance))
}

fn load_strokes(path: Option<&Path>) -> Result<Vec<Stroke>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read strokes `{}`", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid strokes in `{}`", path.display()))
}

fn print_pass(outcome: &PassOutcome) {
    let report = &outcome.report;
    println!(
        "scope={} ingested={} recognized={} lines={}",
        outcome.scope.as_str(),
        outcome.ingested,
        outcome.recognized,
        outcome.lines.len()
    );
    println!(
        "created={} updated={} skipped={} preserved={} deleted={} failed={}",
        report.created,
        report.updated,
        report.skipped,
        report.preserved,
        report.deleted,
        report.failed.len()
    );
    for failure in &report.failed {
        println!(
            "failed action={} block_id={} error={}",
            failure.kind, failure.block_id, failure.error
        );
    }
}

fn print_edit(outcome: &EditOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&outcome.retained)?);
    if let Some(created) = &outcome.created {
        println!("{}", serde_json::to_string_pretty(created)?);
    }
    Ok(())
}

fn print_outline(arena: &BlockArena) {
    let index = arena.children_index();
    let mut pending: Vec<(BlockId, usize)> = index
        .get(&None)
        .into_iter()
        .flatten()
        .rev()
        .map(|id| (*id, 0))
        .collect();
    while let Some((id, depth)) = pending.pop() {
        if let Some(block) = arena.get(id) {
            println!(
                "{}- {} {}",
                "  ".repeat(depth),
                block.id,
                block.content.replace('\n', " / ")
            );
        }
        if let Some(children) = index.get(&Some(id)) {
            pending.extend(children.iter().rev().map(|child| (*child, depth + 1)));
        }
    }
}
