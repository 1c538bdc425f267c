//! agent-watch CLI.
//!
//! `aw` runs the collector loop against the local host, printing one
//! summary line per tick. Subcommands snapshot and compare fingerprint
//! baselines against the same store.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::{Parser, Subcommand};

use aw_core::baseline;
use aw_core::config::{EngineConfig, LogConfig, MonitorConfig, Thresholds};
use aw_core::logging::init_logging;
use aw_core::reader::Reader;
use aw_core::store::Store;
use aw_core::writer::Writer;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "aw")]
#[command(about = "agent-watch: monitor AI agent processes on this host")]
#[command(version)]
struct Cli {
    /// Run without a renderer; print one summary line per tick.
    #[arg(long)]
    headless: bool,

    /// Tick cadence in seconds (minimum 1).
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Pipe-separated case-insensitive substrings matched against
    /// process names and command lines.
    #[arg(long = "match", default_value = "codex|claude|gemini|copilot")]
    pattern: String,

    /// SQLite database path.
    #[arg(long, default_value = "agent-watch.db")]
    db: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Snapshot current fingerprints as a labeled baseline.
    BaselineSave {
        /// Label for the saved baseline.
        #[arg(long, default_value = "default")]
        label: String,
    },
    /// Print regressions of current fingerprints against saved baselines.
    BaselineCompare {
        /// Percent change that counts as a regression.
        #[arg(long, default_value_t = 20.0)]
        threshold: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig {
        level: cli.log_level.clone(),
    });

    match &cli.command {
        Some(Command::BaselineSave { label }) => baseline_save(&cli.db, label),
        Some(Command::BaselineCompare { threshold }) => baseline_compare(&cli.db, *threshold),
        None => watch(&cli),
    }
}

/// Run the collector loop until ctrl-c.
fn watch(cli: &Cli) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::SeqCst);
    })
    .context("installing ctrl-c handler")?;

    let config = MonitorConfig {
        interval_secs: cli.interval,
        pattern: cli.pattern.clone(),
        db_path: cli.db.clone(),
        headless: cli.headless,
    };

    aw_core::monitor::run(
        &config,
        Thresholds::default(),
        EngineConfig::default(),
        &SHUTDOWN,
    )
    .context("monitor failed")?;
    Ok(())
}

fn baseline_save(db_path: &str, label: &str) -> anyhow::Result<()> {
    let store = Store::open(db_path).context("opening store")?;
    let reader = Reader::new(&store);
    let writer = Writer::new(&store);

    let saved = baseline::save_baseline(&reader, &writer, label).context("saving baseline")?;
    if saved == 0 {
        println!("no fingerprints to snapshot yet; run the monitor first");
    } else {
        println!("saved {saved} fingerprint(s) under label {label:?}");
    }
    Ok(())
}

fn baseline_compare(db_path: &str, threshold_pct: f64) -> anyhow::Result<()> {
    let store = Store::open(db_path).context("opening store")?;
    let reader = Reader::new(&store);

    let findings =
        baseline::compare_baselines(&reader, threshold_pct).context("comparing baselines")?;
    if findings.is_empty() {
        println!("no regressions at {threshold_pct:.0}% threshold");
        return Ok(());
    }

    for finding in &findings {
        if finding.metric == "dominant_phase" {
            println!(
                "{} [{}]: dominant phase changed",
                finding.comm, finding.label
            );
        } else {
            println!(
                "{} [{}]: {} {:.1} -> {:.1} ({:+.1}%)",
                finding.comm,
                finding.label,
                finding.metric,
                finding.baseline_value,
                finding.current_value,
                finding.change_pct,
            );
        }
    }
    println!("{} regression(s)", findings.len());
    Ok(())
}
