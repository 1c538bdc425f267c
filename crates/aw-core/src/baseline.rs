//! Fingerprint baselines and regression detection.
//!
//! A baseline is a labeled, write-once snapshot of the current
//! fingerprint rows. Comparing baselines against live fingerprints
//! yields regression findings: one per numeric metric whose relative
//! change crosses the threshold, plus one whenever the dominant phase
//! flips.

use tracing::info;

use crate::error::StoreError;
use crate::reader::Reader;
use crate::records::{BaselineRecord, FingerprintRecord};
use crate::timefmt::system_time_seconds;
use crate::writer::Writer;

/// Schema version stamped on every saved baseline row.
const BASELINE_VERSION: &str = "1.0";

/// One metric that moved between a baseline and the current fingerprint.
#[derive(Debug, Clone)]
pub struct RegressionFinding {
    pub comm: String,
    pub label: String,
    /// Metric name: `avg_cpu`, `avg_rss_kb`, `avg_threads`,
    /// `avg_fd_count`, `avg_net_conns`, or `dominant_phase`.
    pub metric: String,
    pub baseline_value: f64,
    pub current_value: f64,
    /// Relative change in percent; 100 by convention for phase flips
    /// and zero-baseline metrics.
    pub change_pct: f64,
}

/// Snapshot every current fingerprint under `label`.
///
/// The save is atomic: all rows land in one transaction. Duplicate
/// `(comm, label)` pairs are allowed; existing baselines are never
/// mutated. Returns the number of rows saved.
pub fn save_baseline(
    reader: &Reader<'_>,
    writer: &Writer<'_>,
    label: &str,
) -> Result<usize, StoreError> {
    let now = system_time_seconds();
    writer.begin()?;

    // Read inside the transaction so the snapshot cannot interleave
    // with a tick committing from another process.
    let fingerprints = match reader.get_fingerprints() {
        Ok(fingerprints) => fingerprints,
        Err(err) => {
            writer.rollback()?;
            return Err(err);
        }
    };
    if fingerprints.is_empty() {
        writer.rollback()?;
        return Ok(0);
    }

    for fp in &fingerprints {
        if let Err(err) = writer.insert_baseline(fp, label, now, BASELINE_VERSION) {
            writer.rollback()?;
            return Err(err);
        }
    }
    writer.commit()?;
    info!(label, rows = fingerprints.len(), "baseline saved");
    Ok(fingerprints.len())
}

/// Compare every saved baseline against every current fingerprint with
/// a matching comm.
///
/// Both tables are read in one transaction so the comparison sees a
/// single snapshot of the store.
pub fn compare_baselines(
    reader: &Reader<'_>,
    threshold_pct: f64,
) -> Result<Vec<RegressionFinding>, StoreError> {
    let (baselines, fingerprints) =
        reader.read_txn(|r| Ok((r.get_baselines()?, r.get_fingerprints()?)))?;

    let mut findings = Vec::new();
    for base in &baselines {
        for fp in fingerprints.iter().filter(|fp| fp.comm == base.comm) {
            findings.extend(compare_fingerprints(base, fp, threshold_pct));
        }
    }
    Ok(findings)
}

/// Compare one baseline against one fingerprint.
///
/// For each numeric metric: `change_pct = ((cur - base) / |base|) * 100`
/// when the base is nonzero, 100 when only the base is zero, skipped
/// when both are zero; a finding is emitted when `|change_pct|` meets
/// `threshold_pct`. A dominant-phase mismatch always yields one finding
/// with `change_pct = 100`.
#[must_use]
pub fn compare_fingerprints(
    base: &BaselineRecord,
    current: &FingerprintRecord,
    threshold_pct: f64,
) -> Vec<RegressionFinding> {
    let metrics = [
        ("avg_cpu", base.avg_cpu, current.avg_cpu),
        ("avg_rss_kb", base.avg_rss_kb, current.avg_rss_kb),
        ("avg_threads", base.avg_threads, current.avg_threads),
        ("avg_fd_count", base.avg_fd_count, current.avg_fd_count),
        ("avg_net_conns", base.avg_net_conns, current.avg_net_conns),
    ];

    let mut findings = Vec::new();
    for (metric, base_value, cur_value) in metrics {
        let change_pct = if base_value != 0.0 {
            (cur_value - base_value) / base_value.abs() * 100.0
        } else if cur_value != 0.0 {
            100.0
        } else {
            continue;
        };
        if change_pct.abs() >= threshold_pct {
            findings.push(RegressionFinding {
                comm: base.comm.clone(),
                label: base.label.clone(),
                metric: metric.to_string(),
                baseline_value: base_value,
                current_value: cur_value,
                change_pct,
            });
        }
    }

    if base.dominant_phase != current.dominant_phase {
        findings.push(RegressionFinding {
            comm: base.comm.clone(),
            label: base.label.clone(),
            metric: "dominant_phase".to_string(),
            baseline_value: 0.0,
            current_value: 0.0,
            change_pct: 100.0,
        });
    }

    findings
}
