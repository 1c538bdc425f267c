//! Configuration for the monitor, thresholds, and engine.
//!
//! Every field carries its own serde default so a partial configuration
//! (or none at all) yields the documented defaults. CLI flags override
//! fields on `MonitorConfig` after construction.

use serde::{Deserialize, Serialize};

/// Top-level monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Tick cadence in seconds. Minimum 1.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Pipe-separated case-insensitive substrings matched against
    /// process comm and cmdline.
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Run without a renderer, printing one summary line per tick.
    #[serde(default)]
    pub headless: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            pattern: default_pattern(),
            db_path: default_db_path(),
            headless: false,
        }
    }
}

impl MonitorConfig {
    /// Tick interval clamped to the 1-second minimum.
    #[must_use]
    pub fn effective_interval_secs(&self) -> u64 {
        self.interval_secs.max(1)
    }
}

fn default_interval_secs() -> u64 {
    5
}

fn default_pattern() -> String {
    "codex|claude|gemini|copilot".to_string()
}

fn default_db_path() -> String {
    "agent-watch.db".to_string()
}

/// Two-tier alert thresholds for the analysis engine.
///
/// For each resource, crossing the critical tier emits one `critical`
/// alert and suppresses the warning tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// CPU percent warning tier.
    #[serde(default = "default_cpu_warning")]
    pub cpu_warning: f64,

    /// CPU percent critical tier.
    #[serde(default = "default_cpu_critical")]
    pub cpu_critical: f64,

    /// Resident memory warning tier, in MB.
    #[serde(default = "default_mem_warning_mb")]
    pub mem_warning_mb: f64,

    /// Resident memory critical tier, in MB.
    #[serde(default = "default_mem_critical_mb")]
    pub mem_critical_mb: f64,

    /// Open file descriptor warning tier.
    #[serde(default = "default_fd_warning")]
    pub fd_warning: i32,

    /// Open file descriptor critical tier.
    #[serde(default = "default_fd_critical")]
    pub fd_critical: i32,

    /// Thread count warning tier.
    #[serde(default = "default_thread_warning")]
    pub thread_warning: i64,

    /// Thread count critical tier.
    #[serde(default = "default_thread_critical")]
    pub thread_critical: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_warning: default_cpu_warning(),
            cpu_critical: default_cpu_critical(),
            mem_warning_mb: default_mem_warning_mb(),
            mem_critical_mb: default_mem_critical_mb(),
            fd_warning: default_fd_warning(),
            fd_critical: default_fd_critical(),
            thread_warning: default_thread_warning(),
            thread_critical: default_thread_critical(),
        }
    }
}

fn default_cpu_warning() -> f64 {
    80.0
}

fn default_cpu_critical() -> f64 {
    95.0
}

fn default_mem_warning_mb() -> f64 {
    2048.0
}

fn default_mem_critical_mb() -> f64 {
    4096.0
}

fn default_fd_warning() -> i32 {
    1000
}

fn default_fd_critical() -> i32 {
    5000
}

fn default_thread_warning() -> i64 {
    100
}

fn default_thread_critical() -> i64 {
    500
}

/// Tunables for the per-PID analysis engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rolling-window size for CPU and RSS statistics.
    #[serde(default = "default_stats_window")]
    pub stats_window: usize,

    /// Minimum samples before z-score anomaly detection runs.
    #[serde(default = "default_anomaly_min_samples")]
    pub anomaly_min_samples: usize,

    /// Z-score magnitude that fires an anomaly alert.
    #[serde(default = "default_anomaly_zscore")]
    pub anomaly_zscore: f64,

    /// Minimum RSS history length before leak regression runs.
    #[serde(default = "default_leak_min_samples")]
    pub leak_min_samples: usize,

    /// RSS growth slope (kB per sample) above which a leak is flagged.
    #[serde(default = "default_leak_slope_kb")]
    pub leak_slope_kb: f64,

    /// Minimum regression fit (R²) for a leak finding.
    #[serde(default = "default_leak_r2")]
    pub leak_r2: f64,

    /// Fingerprint rows are upserted every N samples per PID.
    #[serde(default = "default_fingerprint_every")]
    pub fingerprint_every: u64,

    /// Hourly rollup rows are upserted every N samples per PID.
    #[serde(default = "default_rollup_every")]
    pub rollup_every: u64,

    /// Percent change that counts as a baseline regression.
    #[serde(default = "default_regression_pct")]
    pub regression_pct: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stats_window: default_stats_window(),
            anomaly_min_samples: default_anomaly_min_samples(),
            anomaly_zscore: default_anomaly_zscore(),
            leak_min_samples: default_leak_min_samples(),
            leak_slope_kb: default_leak_slope_kb(),
            leak_r2: default_leak_r2(),
            fingerprint_every: default_fingerprint_every(),
            rollup_every: default_rollup_every(),
            regression_pct: default_regression_pct(),
        }
    }
}

fn default_stats_window() -> usize {
    120
}

fn default_anomaly_min_samples() -> usize {
    10
}

fn default_anomaly_zscore() -> f64 {
    3.0
}

fn default_leak_min_samples() -> usize {
    30
}

fn default_leak_slope_kb() -> f64 {
    10.0
}

fn default_leak_r2() -> f64 {
    0.7
}

fn default_fingerprint_every() -> u64 {
    10
}

fn default_rollup_every() -> u64 {
    60
}

fn default_regression_pct() -> f64 {
    20.0
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    /// Can be overridden by the RUST_LOG environment variable.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
