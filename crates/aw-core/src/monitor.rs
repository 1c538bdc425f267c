//! The collection event loop.
//!
//! Single-threaded and cooperative: exactly one tick is in flight at
//! any time. The next tick is scheduled against a monotonic deadline
//! and the loop sleeps in short slices until then so the shutdown flag
//! is observed within ~200 ms. When the flag is set the loop exits
//! after the in-flight tick completes; ticks are never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::info;

use crate::collector::Collector;
use crate::config::{EngineConfig, MonitorConfig, Thresholds};
use crate::engine::AnalysisEngine;
use crate::error::Result;
use crate::proc_source::{platform_source, ProcSource};
use crate::reader::Reader;
use crate::scanner::Scanner;
use crate::store::Store;
use crate::writer::Writer;

/// Longest uninterruptible sleep slice.
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Run the monitor with the platform's process source until `shutdown`
/// is set. Returns an error only when the store cannot be opened.
pub fn run(
    config: &MonitorConfig,
    thresholds: Thresholds,
    engine_config: EngineConfig,
    shutdown: &AtomicBool,
) -> Result<()> {
    let source = platform_source();
    run_with_source(&source, config, thresholds, engine_config, shutdown)
}

/// Run the monitor loop over an explicit process source.
pub fn run_with_source<S: ProcSource>(
    source: &S,
    config: &MonitorConfig,
    thresholds: Thresholds,
    engine_config: EngineConfig,
    shutdown: &AtomicBool,
) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    let reader = Reader::new(&store);
    let engine_writer = Writer::new(&store);
    let scanner = Scanner::new(&config.pattern);
    let mut collector = Collector::new(source, scanner, Writer::new(&store));
    let mut engine = AnalysisEngine::new(thresholds, engine_config);

    let interval = Duration::from_secs(config.effective_interval_secs());
    info!(
        pattern = %config.pattern,
        db = %config.db_path,
        interval_secs = interval.as_secs(),
        "monitor started"
    );

    let mut deadline = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        sleep_until(deadline, shutdown);
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let started = Instant::now();
        let result = collector.tick();
        let analysis = engine.process_tick(&result, &engine_writer, &reader);
        let elapsed_ms = started.elapsed().as_millis();

        let commit_note = if result.committed { "" } else { " COMMIT FAILED" };
        println!(
            "tick {}: agents={} samples={} alerts={} errors={} ({elapsed_ms} ms){commit_note}",
            result.tick,
            result.agents_found,
            result.samples_written,
            result.alerts_written + analysis.alerts_emitted,
            result.write_errors + analysis.write_errors,
        );

        // Schedule against the previous deadline, not the tick's end,
        // so cadence does not drift. A tick that overran its slot just
        // starts the next interval from now.
        deadline += interval;
        let now = Instant::now();
        if deadline < now {
            deadline = now + interval;
        }
    }

    info!(ticks = collector.ticks(), "monitor stopped");
    Ok(())
}

/// Sleep until `deadline` in short slices, returning early when the
/// shutdown flag is set.
fn sleep_until(deadline: Instant, shutdown: &AtomicBool) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
