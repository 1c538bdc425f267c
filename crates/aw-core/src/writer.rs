//! Typed batch writer over the store's prepared-statement cache.
//!
//! Every write runs one cached prepared statement; rusqlite's statement
//! cache gives each call a reset statement with cleared bindings, so
//! the reset → bind → step contract holds per execution. Transactions
//! are explicit `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK` so a tick can
//! decide its own fate: a failed begin writes nothing, a failed commit
//! rolls everything back.

use rusqlite::{params, params_from_iter, Connection};

use crate::error::StoreError;
use crate::records::{
    Alert, FdRecord, FingerprintRecord, NetConnection, ProcessSample, RollupRecord, StatusRecord,
};
use crate::store::Store;

/// Batch writer. Holds the connection borrow for the store's lifetime;
/// all statements go through the store's prepared cache.
pub struct Writer<'a> {
    conn: &'a Connection,
}

impl<'a> Writer<'a> {
    #[must_use]
    pub fn new(store: &'a Store) -> Self {
        Self {
            conn: store.conn(),
        }
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Begin the tick's transaction. On failure the tick writes nothing.
    pub fn begin(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(StoreError::TxnBegin)
    }

    /// Commit the tick. On failure the transaction is rolled back and
    /// every statement executed since `begin` becomes invisible.
    pub fn commit(&self) -> Result<(), StoreError> {
        if let Err(err) = self.conn.execute_batch("COMMIT") {
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(StoreError::TxnCommit(err));
        }
        Ok(())
    }

    /// Abandon the tick's writes.
    pub fn rollback(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(StoreError::TxnCommit)
    }

    // -------------------------------------------------------------------------
    // Agents
    // -------------------------------------------------------------------------

    /// UPDATE-first upsert keyed on the live `(pid, comm)` row.
    ///
    /// The INSERT runs only when the UPDATE reports zero changed rows,
    /// so `alive=1 ∧ (pid, comm)` stays unique. PID reuse under a
    /// different comm lands in a fresh row.
    pub fn upsert_agent(
        &self,
        pid: i32,
        comm: &str,
        args: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .prepare_cached(
                "UPDATE agent SET last_seen = ?1, args = ?2
                 WHERE pid = ?3 AND comm = ?4 AND alive = 1",
            )
            .map_err(StoreError::Prepare)?
            .execute(params![now, args, pid, comm])
            .map_err(StoreError::Write)?;

        if changed == 0 {
            self.conn
                .prepare_cached(
                    "INSERT INTO agent (pid, comm, args, first_seen, last_seen, alive)
                     VALUES (?1, ?2, ?3, ?4, ?4, 1)",
                )
                .map_err(StoreError::Prepare)?
                .execute(params![pid, comm, args, now])
                .map_err(StoreError::Write)?;
        }
        Ok(())
    }

    /// Flip `alive` off for live agents whose PID was not seen this
    /// tick. `seen` must be non-empty.
    pub fn mark_dead_except(&self, seen: &[i32], now: i64) -> Result<usize, StoreError> {
        let placeholders = vec!["?"; seen.len()].join(",");
        let sql = format!(
            "UPDATE agent SET alive = 0, last_seen = ?
             WHERE alive = 1 AND pid NOT IN ({placeholders})"
        );
        let params: Vec<i64> = std::iter::once(now)
            .chain(seen.iter().map(|&pid| i64::from(pid)))
            .collect();
        self.conn
            .prepare(&sql)
            .map_err(StoreError::Prepare)?
            .execute(params_from_iter(params.iter()))
            .map_err(StoreError::Write)
    }

    // -------------------------------------------------------------------------
    // Per-tick rows
    // -------------------------------------------------------------------------

    pub fn write_sample(&self, sample: &ProcessSample) -> Result<(), StoreError> {
        self.conn
            .prepare_cached(
                "INSERT INTO process_sample (ts, pid, user, cpu, mem, rss_kb, stat, etimes, comm, args)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .map_err(StoreError::Prepare)?
            .execute(params![
                sample.ts,
                sample.pid,
                sample.user,
                sample.cpu,
                sample.mem,
                sample.rss_kb,
                sample.stat,
                sample.etimes,
                sample.comm,
                sample.args,
            ])
            .map_err(StoreError::Write)?;
        Ok(())
    }

    pub fn write_status(&self, status: &StatusRecord) -> Result<(), StoreError> {
        self.conn
            .prepare_cached(
                "INSERT INTO status_sample
                 (ts, pid, state, threads, vm_rss_kb, vm_swap_kb,
                  voluntary_ctxt_switches, nonvoluntary_ctxt_switches)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(StoreError::Prepare)?
            .execute(params![
                status.ts,
                status.pid,
                status.state,
                status.threads,
                status.vm_rss_kb,
                status.vm_swap_kb,
                status.voluntary_ctxt_switches,
                status.nonvoluntary_ctxt_switches,
            ])
            .map_err(StoreError::Write)?;
        Ok(())
    }

    pub fn write_fd(&self, fd: &FdRecord) -> Result<(), StoreError> {
        self.conn
            .prepare_cached(
                "INSERT INTO fd_record (ts, pid, fd_num, fd_type, path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(StoreError::Prepare)?
            .execute(params![fd.ts, fd.pid, fd.fd_num, fd.fd_type.as_str(), fd.path])
            .map_err(StoreError::Write)?;
        Ok(())
    }

    pub fn write_net(&self, conn_row: &NetConnection) -> Result<(), StoreError> {
        self.conn
            .prepare_cached(
                "INSERT INTO net_connection
                 (ts, pid, protocol, local_addr, local_port, remote_addr, remote_port, state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(StoreError::Prepare)?
            .execute(params![
                conn_row.ts,
                conn_row.pid,
                conn_row.protocol.as_str(),
                conn_row.local_addr,
                conn_row.local_port,
                conn_row.remote_addr,
                conn_row.remote_port,
                conn_row.state,
            ])
            .map_err(StoreError::Write)?;
        Ok(())
    }

    pub fn write_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.conn
            .prepare_cached(
                "INSERT INTO alert (ts, pid, severity, category, message, value, threshold)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(StoreError::Prepare)?
            .execute(params![
                alert.ts,
                alert.pid,
                alert.severity.as_str(),
                alert.category,
                alert.message,
                alert.value,
                alert.threshold,
            ])
            .map_err(StoreError::Write)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Fingerprints, baselines, rollups
    // -------------------------------------------------------------------------

    pub fn upsert_fingerprint(&self, fp: &FingerprintRecord) -> Result<(), StoreError> {
        self.conn
            .prepare_cached(
                "INSERT INTO fingerprint
                 (pid, comm, avg_cpu, avg_rss_kb, avg_threads, avg_fd_count, avg_net_conns,
                  dominant_phase, sample_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(pid, comm) DO UPDATE SET
                    avg_cpu = excluded.avg_cpu,
                    avg_rss_kb = excluded.avg_rss_kb,
                    avg_threads = excluded.avg_threads,
                    avg_fd_count = excluded.avg_fd_count,
                    avg_net_conns = excluded.avg_net_conns,
                    dominant_phase = excluded.dominant_phase,
                    sample_count = excluded.sample_count,
                    updated_at = excluded.updated_at",
            )
            .map_err(StoreError::Prepare)?
            .execute(params![
                fp.pid,
                fp.comm,
                fp.avg_cpu,
                fp.avg_rss_kb,
                fp.avg_threads,
                fp.avg_fd_count,
                fp.avg_net_conns,
                fp.dominant_phase,
                fp.sample_count,
                fp.updated_at,
            ])
            .map_err(StoreError::Write)?;
        Ok(())
    }

    /// Snapshot one fingerprint as a baseline row. Baselines are
    /// write-once; duplicate `(comm, label)` pairs are allowed.
    pub fn insert_baseline(
        &self,
        fp: &FingerprintRecord,
        label: &str,
        created_at: i64,
        version: &str,
    ) -> Result<(), StoreError> {
        self.conn
            .prepare_cached(
                "INSERT INTO fingerprint_baseline
                 (comm, label, avg_cpu, avg_rss_kb, avg_threads, avg_fd_count, avg_net_conns,
                  dominant_phase, sample_count, created_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .map_err(StoreError::Prepare)?
            .execute(params![
                fp.comm,
                label,
                fp.avg_cpu,
                fp.avg_rss_kb,
                fp.avg_threads,
                fp.avg_fd_count,
                fp.avg_net_conns,
                fp.dominant_phase,
                fp.sample_count,
                created_at,
                version,
            ])
            .map_err(StoreError::Write)?;
        Ok(())
    }

    pub fn upsert_rollup(&self, rollup: &RollupRecord) -> Result<(), StoreError> {
        self.conn
            .prepare_cached(
                "INSERT INTO metric_rollup
                 (pid, comm, bucket_ts, avg_cpu, max_cpu, avg_rss_kb, max_rss_kb, samples)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(pid, bucket_ts) DO UPDATE SET
                    comm = excluded.comm,
                    avg_cpu = excluded.avg_cpu,
                    max_cpu = excluded.max_cpu,
                    avg_rss_kb = excluded.avg_rss_kb,
                    max_rss_kb = excluded.max_rss_kb,
                    samples = excluded.samples",
            )
            .map_err(StoreError::Prepare)?
            .execute(params![
                rollup.pid,
                rollup.comm,
                rollup.bucket_ts,
                rollup.avg_cpu,
                rollup.max_cpu,
                rollup.avg_rss_kb,
                rollup.max_rss_kb,
                rollup.samples,
            ])
            .map_err(StoreError::Write)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Severity;

    fn sample(pid: i32, ts: i64) -> ProcessSample {
        ProcessSample {
            ts,
            pid,
            user: "dev".to_string(),
            cpu: 10.0,
            mem: 0.5,
            rss_kb: 1024,
            stat: "S".to_string(),
            etimes: 60,
            comm: "claude".to_string(),
            args: "claude --resume".to_string(),
        }
    }

    fn count(store: &Store, table: &str) -> i64 {
        store
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    // -- upsert_agent -----------------------------------------------------------

    #[test]
    fn upsert_agent_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let writer = Writer::new(&store);

        for ts in 100..110 {
            writer.upsert_agent(42, "claude", "claude run", ts).unwrap();
        }

        let (rows, last_seen): (i64, i64) = store
            .conn()
            .query_row(
                "SELECT COUNT(*), MAX(last_seen) FROM agent WHERE pid = 42 AND alive = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(last_seen, 109);
    }

    #[test]
    fn pid_reuse_with_new_comm_creates_new_row() {
        let store = Store::open_in_memory().unwrap();
        let writer = Writer::new(&store);

        writer.upsert_agent(42, "claude", "", 100).unwrap();
        writer.upsert_agent(42, "codex", "", 200).unwrap();

        assert_eq!(count(&store, "agent"), 2);
    }

    #[test]
    fn mark_dead_except_flips_missing_pids() {
        let store = Store::open_in_memory().unwrap();
        let writer = Writer::new(&store);

        writer.upsert_agent(1, "claude", "", 100).unwrap();
        writer.upsert_agent(2, "codex", "", 100).unwrap();
        writer.upsert_agent(3, "gemini", "", 100).unwrap();

        let flipped = writer.mark_dead_except(&[1, 3], 200).unwrap();
        assert_eq!(flipped, 1);

        let alive: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM agent WHERE alive = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(alive, 2);
    }

    // -- transactions -----------------------------------------------------------

    #[test]
    fn rollback_discards_tick_writes() {
        let store = Store::open_in_memory().unwrap();
        let writer = Writer::new(&store);

        writer.begin().unwrap();
        writer.write_sample(&sample(1, 100)).unwrap();
        writer.write_sample(&sample(2, 100)).unwrap();
        writer.rollback().unwrap();

        assert_eq!(count(&store, "process_sample"), 0);
    }

    #[test]
    fn commit_persists_tick_writes() {
        let store = Store::open_in_memory().unwrap();
        let writer = Writer::new(&store);

        writer.begin().unwrap();
        writer.write_sample(&sample(1, 100)).unwrap();
        writer
            .write_status(&StatusRecord {
                ts: 100,
                pid: 1,
                state: "S".to_string(),
                threads: 4,
                vm_rss_kb: 2048,
                vm_swap_kb: 0,
                voluntary_ctxt_switches: 10,
                nonvoluntary_ctxt_switches: 2,
            })
            .unwrap();
        writer.commit().unwrap();

        assert_eq!(count(&store, "process_sample"), 1);
        assert_eq!(count(&store, "status_sample"), 1);
    }

    #[test]
    fn nested_begin_fails() {
        let store = Store::open_in_memory().unwrap();
        let writer = Writer::new(&store);

        writer.begin().unwrap();
        assert!(matches!(writer.begin(), Err(StoreError::TxnBegin(_))));
        writer.rollback().unwrap();
    }

    // -- fingerprints and rollups -----------------------------------------------

    #[test]
    fn fingerprint_upsert_replaces_by_pid_comm() {
        let store = Store::open_in_memory().unwrap();
        let writer = Writer::new(&store);

        let mut fp = FingerprintRecord {
            pid: 9,
            comm: "claude".to_string(),
            avg_cpu: 10.0,
            avg_rss_kb: 1000.0,
            avg_threads: 4.0,
            avg_fd_count: 30.0,
            avg_net_conns: 2.0,
            dominant_phase: "active".to_string(),
            sample_count: 10,
            updated_at: 100,
        };
        writer.upsert_fingerprint(&fp).unwrap();

        fp.avg_cpu = 55.0;
        fp.sample_count = 20;
        writer.upsert_fingerprint(&fp).unwrap();

        let (rows, avg_cpu): (i64, f64) = store
            .conn()
            .query_row(
                "SELECT COUNT(*), MAX(avg_cpu) FROM fingerprint WHERE pid = 9",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(rows, 1);
        assert!((avg_cpu - 55.0).abs() < f64::EPSILON);
    }

    #[test]
    fn baselines_are_append_only() {
        let store = Store::open_in_memory().unwrap();
        let writer = Writer::new(&store);

        let fp = FingerprintRecord {
            pid: 9,
            comm: "claude".to_string(),
            avg_cpu: 10.0,
            avg_rss_kb: 1000.0,
            avg_threads: 4.0,
            avg_fd_count: 30.0,
            avg_net_conns: 2.0,
            dominant_phase: "active".to_string(),
            sample_count: 10,
            updated_at: 100,
        };
        writer.insert_baseline(&fp, "default", 100, "1.0").unwrap();
        writer.insert_baseline(&fp, "default", 200, "1.0").unwrap();

        assert_eq!(count(&store, "fingerprint_baseline"), 2);
    }

    #[test]
    fn rollup_upsert_by_bucket() {
        let store = Store::open_in_memory().unwrap();
        let writer = Writer::new(&store);

        let mut rollup = RollupRecord {
            pid: 5,
            comm: "codex".to_string(),
            bucket_ts: 3600,
            avg_cpu: 20.0,
            max_cpu: 90.0,
            avg_rss_kb: 100.0,
            max_rss_kb: 200.0,
            samples: 60,
        };
        writer.upsert_rollup(&rollup).unwrap();
        rollup.samples = 120;
        writer.upsert_rollup(&rollup).unwrap();

        let (rows, samples): (i64, i64) = store
            .conn()
            .query_row(
                "SELECT COUNT(*), MAX(samples) FROM metric_rollup WHERE pid = 5",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(samples, 120);
    }

    #[test]
    fn alert_write_stores_severity_text() {
        let store = Store::open_in_memory().unwrap();
        let writer = Writer::new(&store);

        writer
            .write_alert(&Alert {
                ts: 100,
                pid: 1,
                severity: Severity::Critical,
                category: "cpu".to_string(),
                message: "cpu 97.0% >= 95.0%".to_string(),
                value: 97.0,
                threshold: 95.0,
            })
            .unwrap();

        let severity: String = store
            .conn()
            .query_row("SELECT severity FROM alert", [], |row| row.get(0))
            .unwrap();
        assert_eq!(severity, "critical");
    }
}
