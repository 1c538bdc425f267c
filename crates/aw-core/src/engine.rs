//! Per-PID analysis engine.
//!
//! Consumes each tick's in-memory result and maintains one state entry
//! per PID: rolling CPU/RSS windows, an RSS history for leak
//! regression, context-switch baselines, phase counters, and the
//! running sums behind the behavioral fingerprint. Emits alert rows for
//! threshold crossings, statistical anomalies, suspected leaks,
//! scheduler pressure, and baseline regressions.
//!
//! State is keyed by PID alone. If the OS recycles a PID within one
//! run, the stale series accumulate until restart; this contamination
//! is accepted and documented.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::baseline;
use crate::collector::TickResult;
use crate::config::{EngineConfig, Thresholds};
use crate::reader::Reader;
use crate::records::{Alert, FingerprintRecord, ProcessSample, RollupRecord, Severity, StatusRecord};
use crate::ring_stats::RingStats;
use crate::writer::Writer;

/// Stddev below which z-scores are meaningless and skipped.
const ZSCORE_EPSILON: f64 = 1e-6;

// =============================================================================
// Phase classification
// =============================================================================

/// Coarse per-tick behavior classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Active,
    Burst,
}

impl Phase {
    /// Stable text form stored in fingerprint rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Burst => "burst",
        }
    }
}

/// Classify one tick's behavior from CPU percent and the kernel state
/// letter. A running process is never idle.
#[must_use]
pub fn classify_phase(cpu: f64, stat: &str) -> Phase {
    if cpu > 80.0 {
        Phase::Burst
    } else if stat.starts_with('R') {
        if cpu > 20.0 {
            Phase::Burst
        } else {
            Phase::Active
        }
    } else if cpu < 1.0 {
        Phase::Idle
    } else {
        Phase::Active
    }
}

// =============================================================================
// Linear regression
// =============================================================================

/// Least-squares fit of `values` against their indices.
#[derive(Debug, Clone, Copy)]
pub struct LinReg {
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
}

/// Ordinary least squares with indices as x. Returns `None` for fewer
/// than 3 points or a degenerate denominator.
#[must_use]
pub fn linreg(values: &[f64]) -> Option<LinReg> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let nf = n as f64;

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denom = nf * sum_xx - sum_x * sum_x;
    if denom.abs() < 1e-10 {
        return None;
    }
    let slope = (nf * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / nf;

    let mean_y = sum_y / nf;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let fitted = intercept + slope * i as f64;
        ss_res += (y - fitted) * (y - fitted);
        ss_tot += (y - mean_y) * (y - mean_y);
    }
    let r2 = if ss_tot > 1e-10 {
        1.0 - ss_res / ss_tot
    } else {
        0.0
    };

    Some(LinReg {
        slope,
        intercept,
        r2,
    })
}

/// A suspected memory leak.
#[derive(Debug, Clone, Copy)]
pub struct LeakFinding {
    /// RSS growth in kB per sample.
    pub slope: f64,
    pub r2: f64,
}

/// Flag a leak when the RSS history grows steadily: slope above
/// `slope_kb` *and* fit above `min_r2`.
#[must_use]
pub fn detect_leak(history: &[f64], slope_kb: f64, min_r2: f64) -> Option<LeakFinding> {
    let fit = linreg(history)?;
    if fit.slope > slope_kb && fit.r2 > min_r2 {
        Some(LeakFinding {
            slope: fit.slope,
            r2: fit.r2,
        })
    } else {
        None
    }
}

// =============================================================================
// Threshold evaluation
// =============================================================================

/// Evaluate the two-tier thresholds for one sample.
///
/// Emits at most one alert per category (`cpu`, `memory`, `fd`,
/// `threads`); a critical tier suppresses its warning tier. The thread
/// check only runs when this tick captured a status record for the PID.
#[must_use]
pub fn evaluate_thresholds(
    sample: &ProcessSample,
    status: Option<&StatusRecord>,
    fd_count: Option<i32>,
    thresholds: &Thresholds,
) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let mut push = |severity: Severity, category: &str, message: String, value: f64, tier: f64| {
        alerts.push(Alert {
            ts: sample.ts,
            pid: sample.pid,
            severity,
            category: category.to_string(),
            message,
            value,
            threshold: tier,
        });
    };

    if sample.cpu >= thresholds.cpu_critical {
        push(
            Severity::Critical,
            "cpu",
            format!("{} cpu {:.1}% >= {:.0}%", sample.comm, sample.cpu, thresholds.cpu_critical),
            sample.cpu,
            thresholds.cpu_critical,
        );
    } else if sample.cpu >= thresholds.cpu_warning {
        push(
            Severity::Warning,
            "cpu",
            format!("{} cpu {:.1}% >= {:.0}%", sample.comm, sample.cpu, thresholds.cpu_warning),
            sample.cpu,
            thresholds.cpu_warning,
        );
    }

    let rss_mb = sample.rss_kb as f64 / 1024.0;
    if rss_mb >= thresholds.mem_critical_mb {
        push(
            Severity::Critical,
            "memory",
            format!("{} rss {:.0} MB >= {:.0} MB", sample.comm, rss_mb, thresholds.mem_critical_mb),
            rss_mb,
            thresholds.mem_critical_mb,
        );
    } else if rss_mb >= thresholds.mem_warning_mb {
        push(
            Severity::Warning,
            "memory",
            format!("{} rss {:.0} MB >= {:.0} MB", sample.comm, rss_mb, thresholds.mem_warning_mb),
            rss_mb,
            thresholds.mem_warning_mb,
        );
    }

    if let Some(fds) = fd_count {
        if fds >= thresholds.fd_critical {
            push(
                Severity::Critical,
                "fd",
                format!("{} {fds} open fds >= {}", sample.comm, thresholds.fd_critical),
                f64::from(fds),
                f64::from(thresholds.fd_critical),
            );
        } else if fds >= thresholds.fd_warning {
            push(
                Severity::Warning,
                "fd",
                format!("{} {fds} open fds >= {}", sample.comm, thresholds.fd_warning),
                f64::from(fds),
                f64::from(thresholds.fd_warning),
            );
        }
    }

    if let Some(status) = status {
        let threads = status.threads;
        if threads >= thresholds.thread_critical {
            push(
                Severity::Critical,
                "threads",
                format!("{} {threads} threads >= {}", sample.comm, thresholds.thread_critical),
                threads as f64,
                thresholds.thread_critical as f64,
            );
        } else if threads >= thresholds.thread_warning {
            push(
                Severity::Warning,
                "threads",
                format!("{} {threads} threads >= {}", sample.comm, thresholds.thread_warning),
                threads as f64,
                thresholds.thread_warning as f64,
            );
        }
    }

    alerts
}

// =============================================================================
// Per-PID state
// =============================================================================

/// Everything the engine remembers about one PID.
#[derive(Debug)]
pub struct PidState {
    comm: String,
    cpu_stats: RingStats,
    rss_stats: RingStats,
    /// Full RSS history for the leak regression.
    rss_history: Vec<f64>,
    prev_vol_ctx: i64,
    prev_nvol_ctx: i64,
    prev_ts: i64,
    cpu_sum: f64,
    rss_sum: f64,
    thread_sum: f64,
    fd_sum: f64,
    net_sum: f64,
    sample_count: u64,
    phase_idle: u64,
    phase_active: u64,
    phase_burst: u64,
    leak_alerted: bool,
}

impl PidState {
    fn new(comm: &str, window: usize) -> Self {
        Self {
            comm: comm.to_string(),
            cpu_stats: RingStats::new(window),
            rss_stats: RingStats::new(window),
            rss_history: Vec::new(),
            prev_vol_ctx: 0,
            prev_nvol_ctx: 0,
            prev_ts: 0,
            cpu_sum: 0.0,
            rss_sum: 0.0,
            thread_sum: 0.0,
            fd_sum: 0.0,
            net_sum: 0.0,
            sample_count: 0,
            phase_idle: 0,
            phase_active: 0,
            phase_burst: 0,
            leak_alerted: false,
        }
    }

    /// Phase with the highest counter; ties break burst > active > idle.
    fn dominant_phase(&self) -> Phase {
        if self.phase_burst >= self.phase_active && self.phase_burst >= self.phase_idle {
            Phase::Burst
        } else if self.phase_active >= self.phase_idle {
            Phase::Active
        } else {
            Phase::Idle
        }
    }

    fn fingerprint(&self, pid: i32, ts: i64) -> FingerprintRecord {
        let n = self.sample_count.max(1) as f64;
        FingerprintRecord {
            pid,
            comm: self.comm.clone(),
            avg_cpu: self.cpu_sum / n,
            avg_rss_kb: self.rss_sum / n,
            avg_threads: self.thread_sum / n,
            avg_fd_count: self.fd_sum / n,
            avg_net_conns: self.net_sum / n,
            dominant_phase: self.dominant_phase().as_str().to_string(),
            sample_count: self.sample_count as i64,
            updated_at: ts,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Summary of one engine pass, for the tick log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickAnalysis {
    pub alerts_emitted: usize,
    pub fingerprints_written: usize,
    pub regressions_found: usize,
    pub write_errors: usize,
}

/// Per-PID analysis over tick results.
///
/// State entries are created on the first sample for a PID and live
/// until engine shutdown.
pub struct AnalysisEngine {
    thresholds: Thresholds,
    config: EngineConfig,
    per_pid: HashMap<i32, PidState>,
}

impl AnalysisEngine {
    #[must_use]
    pub fn new(thresholds: Thresholds, config: EngineConfig) -> Self {
        Self {
            thresholds,
            config,
            per_pid: HashMap::new(),
        }
    }

    /// PIDs currently tracked.
    #[must_use]
    pub fn tracked_pids(&self) -> usize {
        self.per_pid.len()
    }

    /// Run every check against one tick's in-memory result.
    ///
    /// Alerts and fingerprints are written through `writer` outside the
    /// tick's transaction: the collector has already committed (or
    /// rolled back) by the time the engine runs.
    pub fn process_tick(
        &mut self,
        result: &TickResult,
        writer: &Writer<'_>,
        reader: &Reader<'_>,
    ) -> TickAnalysis {
        let mut analysis = TickAnalysis::default();

        for sample in &result.samples {
            let status = result.status_for(sample.pid);
            let fd_count = result.fd_count_for(sample.pid);
            let conn_count = result.conn_count_for(sample.pid);
            self.process_sample(
                sample,
                status,
                fd_count,
                conn_count,
                writer,
                reader,
                &mut analysis,
            );
        }

        analysis
    }

    #[allow(clippy::too_many_arguments)]
    fn process_sample(
        &mut self,
        sample: &ProcessSample,
        status: Option<&StatusRecord>,
        fd_count: Option<i32>,
        conn_count: Option<i32>,
        writer: &Writer<'_>,
        reader: &Reader<'_>,
        analysis: &mut TickAnalysis,
    ) {
        let window = self.config.stats_window;
        let state = self
            .per_pid
            .entry(sample.pid)
            .or_insert_with(|| PidState::new(&sample.comm, window));
        let rss = sample.rss_kb as f64;

        // (1) Threshold tiers.
        for alert in evaluate_thresholds(sample, status, fd_count, &self.thresholds) {
            emit(writer, &alert, analysis);
        }

        // (2) Rolling windows.
        state.cpu_stats.push(sample.cpu);
        state.rss_stats.push(rss);

        // (3) CPU z-score anomaly.
        if state.cpu_stats.count() >= self.config.anomaly_min_samples {
            let mean = state.cpu_stats.mean();
            let stddev = state.cpu_stats.stddev();
            if stddev > ZSCORE_EPSILON
                && (sample.cpu - mean).abs() / stddev > self.config.anomaly_zscore
            {
                let alert = Alert {
                    ts: sample.ts,
                    pid: sample.pid,
                    severity: Severity::Warning,
                    category: "anomaly:cpu".to_string(),
                    message: format!(
                        "{} cpu {:.1}% deviates from rolling mean {:.1}%",
                        sample.comm, sample.cpu, mean
                    ),
                    value: sample.cpu,
                    threshold: mean + self.config.anomaly_zscore * stddev,
                };
                emit(writer, &alert, analysis);
            }
        }

        // (4) Leak regression over the full RSS history.
        state.rss_history.push(rss);
        if state.rss_history.len() >= self.config.leak_min_samples && !state.leak_alerted {
            if let Some(leak) = detect_leak(
                &state.rss_history,
                self.config.leak_slope_kb,
                self.config.leak_r2,
            ) {
                state.leak_alerted = true;
                let alert = Alert {
                    ts: sample.ts,
                    pid: sample.pid,
                    severity: Severity::Warning,
                    category: "memory_leak".to_string(),
                    message: format!(
                        "{} rss growing ~{:.1} kB/sample (r2 {:.2})",
                        sample.comm, leak.slope, leak.r2
                    ),
                    value: leak.slope,
                    threshold: self.config.leak_slope_kb,
                };
                emit(writer, &alert, analysis);
            }
        }

        // (5) Phase counters.
        match classify_phase(sample.cpu, &sample.stat) {
            Phase::Idle => state.phase_idle += 1,
            Phase::Active => state.phase_active += 1,
            Phase::Burst => state.phase_burst += 1,
        }

        // (6) Context-switch pressure.
        if let Some(status) = status {
            if state.prev_ts > 0 && sample.ts > state.prev_ts {
                let dt = (sample.ts - state.prev_ts) as f64;
                let d_vol = (status.voluntary_ctxt_switches - state.prev_vol_ctx).max(0) as f64;
                let d_nvol =
                    (status.nonvoluntary_ctxt_switches - state.prev_nvol_ctx).max(0) as f64;
                let total = d_vol + d_nvol;
                let pressure = if total > 0.0 { d_nvol / total } else { 0.0 };
                debug!(
                    pid = sample.pid,
                    vol_rate = d_vol / dt,
                    nvol_rate = d_nvol / dt,
                    pressure,
                    "context-switch rates"
                );
                if pressure > 0.5 {
                    let alert = Alert {
                        ts: sample.ts,
                        pid: sample.pid,
                        severity: Severity::Info,
                        category: "scheduling".to_string(),
                        message: format!(
                            "{} involuntary context-switch pressure {:.2}",
                            sample.comm, pressure
                        ),
                        value: pressure,
                        threshold: 0.5,
                    };
                    emit(writer, &alert, analysis);
                }
            }
            state.prev_vol_ctx = status.voluntary_ctxt_switches;
            state.prev_nvol_ctx = status.nonvoluntary_ctxt_switches;
            state.prev_ts = sample.ts;
        }

        // (7) Fingerprint accumulation.
        state.cpu_sum += sample.cpu;
        state.rss_sum += rss;
        state.thread_sum += status.map_or(0.0, |s| s.threads as f64);
        state.fd_sum += fd_count.map_or(0.0, f64::from);
        state.net_sum += conn_count.map_or(0.0, f64::from);
        state.sample_count += 1;

        let fingerprint_due = state.sample_count % self.config.fingerprint_every == 0;
        let rollup_due = state.sample_count % self.config.rollup_every == 0;
        let fp = fingerprint_due.then(|| state.fingerprint(sample.pid, sample.ts));
        let rollup = rollup_due.then(|| RollupRecord {
            pid: sample.pid,
            comm: state.comm.clone(),
            bucket_ts: sample.ts - sample.ts.rem_euclid(3600),
            avg_cpu: state.cpu_stats.mean(),
            max_cpu: state.cpu_stats.max(),
            avg_rss_kb: state.rss_stats.mean(),
            max_rss_kb: state.rss_stats.max(),
            samples: state.cpu_stats.count() as i64,
        });

        if let Some(fp) = fp {
            match writer.upsert_fingerprint(&fp) {
                Ok(()) => analysis.fingerprints_written += 1,
                Err(err) => {
                    warn!(pid = sample.pid, %err, "fingerprint write failed");
                    analysis.write_errors += 1;
                }
            }
            self.check_regressions(&fp, writer, reader, analysis);
        }

        if let Some(rollup) = rollup {
            if let Err(err) = writer.upsert_rollup(&rollup) {
                warn!(pid = sample.pid, %err, "rollup write failed");
                analysis.write_errors += 1;
            }
        }
    }

    /// Compare a freshly written fingerprint against saved baselines
    /// and persist any regressions as alerts.
    fn check_regressions(
        &self,
        fp: &FingerprintRecord,
        writer: &Writer<'_>,
        reader: &Reader<'_>,
        analysis: &mut TickAnalysis,
    ) {
        let baselines = match reader.get_baselines() {
            Ok(baselines) => baselines,
            Err(err) => {
                warn!(%err, "baseline read failed");
                analysis.write_errors += 1;
                return;
            }
        };

        for base in baselines.iter().filter(|b| b.comm == fp.comm) {
            for finding in baseline::compare_fingerprints(base, fp, self.config.regression_pct) {
                analysis.regressions_found += 1;
                let severity = if finding.change_pct.abs() >= 50.0 {
                    Severity::Warning
                } else {
                    Severity::Info
                };
                let alert = Alert {
                    ts: fp.updated_at,
                    pid: fp.pid,
                    severity,
                    category: "regression".to_string(),
                    message: finding.metric.clone(),
                    value: finding.change_pct,
                    threshold: self.config.regression_pct,
                };
                emit(writer, &alert, analysis);
            }
        }
    }
}

fn emit(writer: &Writer<'_>, alert: &Alert, analysis: &mut TickAnalysis) {
    match writer.write_alert(alert) {
        Ok(()) => analysis.alerts_emitted += 1,
        Err(err) => {
            warn!(pid = alert.pid, category = %alert.category, %err, "alert write failed");
            analysis.write_errors += 1;
        }
    }
}
