//! Typed read-only queries.
//!
//! Every query returns a `Vec` of records whose string fields are
//! freshly allocated — the caller owns the result outright and dropping
//! the vector frees everything. Queries that could return unbounded
//! results carry hard row caps so a pathological UI can never
//! materialise a million-row slice; time-filtered queries are bounded
//! by their window instead.

use rusqlite::{params, Connection};

use crate::error::StoreError;
use crate::records::{
    AgentRecord, Alert, BaselineRecord, FingerprintRecord, ProcessSample, RollupRecord, Severity,
};
use crate::store::Store;

/// Hard cap on [`Reader::get_alive_agents`].
pub const MAX_ALIVE_AGENTS: i64 = 500;
/// Hard cap on [`Reader::get_latest_samples_per_agent`].
pub const MAX_LATEST_SAMPLES: i64 = 200;
/// Hard cap on [`Reader::get_distinct_pids`].
pub const MAX_DISTINCT_PIDS: i64 = 10_000;

/// Read-only query surface over the store.
pub struct Reader<'a> {
    conn: &'a Connection,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(store: &'a Store) -> Self {
        Self {
            conn: store.conn(),
        }
    }

    /// Run several queries inside one read transaction so they observe
    /// a single snapshot of the store, even while another process is
    /// committing ticks against the same file.
    ///
    /// Must not be nested and must not be called with a write
    /// transaction open on this connection.
    pub fn read_txn<T>(
        &self,
        f: impl FnOnce(&Self) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.conn
            .execute_batch("BEGIN DEFERRED")
            .map_err(StoreError::TxnBegin)?;
        let result = f(self);
        let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
        if let Err(err) = self.conn.execute_batch(end) {
            let _ = self.conn.execute_batch("ROLLBACK");
            return result.and(Err(StoreError::TxnCommit(err)));
        }
        result
    }

    /// All agents currently marked alive, most recently seen first.
    pub fn get_alive_agents(&self) -> Result<Vec<AgentRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, pid, comm, args, first_seen, last_seen, alive
                 FROM agent WHERE alive = 1
                 ORDER BY last_seen DESC LIMIT ?1",
            )
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map(params![MAX_ALIVE_AGENTS], |row| {
                Ok(AgentRecord {
                    id: row.get(0)?,
                    pid: row.get(1)?,
                    comm: row.get(2)?,
                    args: row.get(3)?,
                    first_seen: row.get(4)?,
                    last_seen: row.get(5)?,
                    alive: row.get::<_, i64>(6)? != 0,
                })
            })
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;
        Ok(rows)
    }

    /// The newest sample for each distinct PID.
    pub fn get_latest_samples_per_agent(&self) -> Result<Vec<ProcessSample>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT p.ts, p.pid, p.user, p.cpu, p.mem, p.rss_kb, p.stat, p.etimes, p.comm, p.args
                 FROM process_sample p
                 JOIN (SELECT pid, MAX(ts) AS max_ts FROM process_sample GROUP BY pid) latest
                   ON p.pid = latest.pid AND p.ts = latest.max_ts
                 GROUP BY p.pid
                 ORDER BY p.pid LIMIT ?1",
            )
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map(params![MAX_LATEST_SAMPLES], map_sample)
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;
        Ok(rows)
    }

    /// Every PID that ever produced a sample.
    pub fn get_distinct_pids(&self) -> Result<Vec<i32>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT DISTINCT pid FROM process_sample ORDER BY pid LIMIT ?1",
            )
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map(params![MAX_DISTINCT_PIDS], |row| row.get(0))
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;
        Ok(rows)
    }

    /// Samples for one PID since `since_ts`, oldest first. Bounded by
    /// the time window.
    pub fn get_samples_for_pid(
        &self,
        pid: i32,
        since_ts: i64,
    ) -> Result<Vec<ProcessSample>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT ts, pid, user, cpu, mem, rss_kb, stat, etimes, comm, args
                 FROM process_sample
                 WHERE pid = ?1 AND ts >= ?2
                 ORDER BY ts",
            )
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map(params![pid, since_ts], map_sample)
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;
        Ok(rows)
    }

    /// The most recent alerts, newest first.
    pub fn get_recent_alerts(&self, limit: i32) -> Result<Vec<Alert>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT ts, pid, severity, category, message, value, threshold
                 FROM alert ORDER BY ts DESC, id DESC LIMIT ?1",
            )
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map(params![limit.max(0)], |row| {
                Ok(Alert {
                    ts: row.get(0)?,
                    pid: row.get(1)?,
                    severity: Severity::from_str_lossy(&row.get::<_, String>(2)?),
                    category: row.get(3)?,
                    message: row.get(4)?,
                    value: row.get(5)?,
                    threshold: row.get(6)?,
                })
            })
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;
        Ok(rows)
    }

    /// All fingerprint rows.
    pub fn get_fingerprints(&self) -> Result<Vec<FingerprintRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT pid, comm, avg_cpu, avg_rss_kb, avg_threads, avg_fd_count,
                        avg_net_conns, dominant_phase, sample_count, updated_at
                 FROM fingerprint ORDER BY comm, pid",
            )
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FingerprintRecord {
                    pid: row.get(0)?,
                    comm: row.get(1)?,
                    avg_cpu: row.get(2)?,
                    avg_rss_kb: row.get(3)?,
                    avg_threads: row.get(4)?,
                    avg_fd_count: row.get(5)?,
                    avg_net_conns: row.get(6)?,
                    dominant_phase: row.get(7)?,
                    sample_count: row.get(8)?,
                    updated_at: row.get(9)?,
                })
            })
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;
        Ok(rows)
    }

    /// All baseline rows, oldest first.
    pub fn get_baselines(&self) -> Result<Vec<BaselineRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, comm, label, avg_cpu, avg_rss_kb, avg_threads, avg_fd_count,
                        avg_net_conns, dominant_phase, sample_count, created_at, version
                 FROM fingerprint_baseline ORDER BY id",
            )
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BaselineRecord {
                    id: row.get(0)?,
                    comm: row.get(1)?,
                    label: row.get(2)?,
                    avg_cpu: row.get(3)?,
                    avg_rss_kb: row.get(4)?,
                    avg_threads: row.get(5)?,
                    avg_fd_count: row.get(6)?,
                    avg_net_conns: row.get(7)?,
                    dominant_phase: row.get(8)?,
                    sample_count: row.get(9)?,
                    created_at: row.get(10)?,
                    version: row.get(11)?,
                })
            })
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;
        Ok(rows)
    }

    /// Hourly rollups for one PID, newest bucket first.
    pub fn get_rollups_for_pid(
        &self,
        pid: i32,
        limit: i32,
    ) -> Result<Vec<RollupRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT pid, comm, bucket_ts, avg_cpu, max_cpu, avg_rss_kb, max_rss_kb, samples
                 FROM metric_rollup WHERE pid = ?1
                 ORDER BY bucket_ts DESC LIMIT ?2",
            )
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map(params![pid, limit.max(0)], |row| {
                Ok(RollupRecord {
                    pid: row.get(0)?,
                    comm: row.get(1)?,
                    bucket_ts: row.get(2)?,
                    avg_cpu: row.get(3)?,
                    max_cpu: row.get(4)?,
                    avg_rss_kb: row.get(5)?,
                    max_rss_kb: row.get(6)?,
                    samples: row.get(7)?,
                })
            })
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;
        Ok(rows)
    }

    /// Total rows in `process_sample`.
    pub fn get_sample_count(&self) -> Result<i64, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM process_sample", [], |row| row.get(0))
            .map_err(StoreError::Query)
    }

    /// Total rows in `alert`.
    pub fn get_alert_count(&self) -> Result<i64, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM alert", [], |row| row.get(0))
            .map_err(StoreError::Query)
    }
}

fn map_sample(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessSample> {
    Ok(ProcessSample {
        ts: row.get(0)?,
        pid: row.get(1)?,
        user: row.get(2)?,
        cpu: row.get(3)?,
        mem: row.get(4)?,
        rss_kb: row.get(5)?,
        stat: row.get(6)?,
        etimes: row.get(7)?,
        comm: row.get(8)?,
        args: row.get(9)?,
    })
}
