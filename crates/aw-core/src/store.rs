//! Embedded SQL store.
//!
//! One SQLite database holds everything the monitor records. Opening
//! configures WAL journaling with a tuned busy timeout and applies the
//! idempotent schema; the statement cache backs the writer's prepared
//! statements.

use rusqlite::Connection;
use tracing::debug;

use crate::error::StoreError;

/// Idempotent DDL for all nine tables and their indexes.
///
/// Index coverage follows the access paths: every table scanned by time
/// has a `(ts)` index, every per-process lookup a `(pid)` index, and
/// `process_sample` additionally `(ts, pid)` for the compound scans the
/// latest-sample query performs.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS agent (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    pid         INTEGER NOT NULL,
    comm        TEXT NOT NULL,
    args        TEXT NOT NULL DEFAULT '',
    first_seen  INTEGER NOT NULL,
    last_seen   INTEGER NOT NULL,
    alive       INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_agent_pid ON agent(pid);
CREATE INDEX IF NOT EXISTS idx_agent_alive ON agent(alive);

CREATE TABLE IF NOT EXISTS process_sample (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    ts      INTEGER NOT NULL,
    pid     INTEGER NOT NULL,
    user    TEXT NOT NULL DEFAULT '',
    cpu     REAL NOT NULL DEFAULT 0,
    mem     REAL NOT NULL DEFAULT 0,
    rss_kb  INTEGER NOT NULL DEFAULT 0,
    stat    TEXT NOT NULL DEFAULT '?',
    etimes  INTEGER NOT NULL DEFAULT 0,
    comm    TEXT NOT NULL DEFAULT '',
    args    TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_process_sample_ts ON process_sample(ts);
CREATE INDEX IF NOT EXISTS idx_process_sample_pid ON process_sample(pid);
CREATE INDEX IF NOT EXISTS idx_process_sample_ts_pid ON process_sample(ts, pid);

CREATE TABLE IF NOT EXISTS status_sample (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    ts                          INTEGER NOT NULL,
    pid                         INTEGER NOT NULL,
    state                       TEXT NOT NULL DEFAULT '',
    threads                     INTEGER NOT NULL DEFAULT 0,
    vm_rss_kb                   INTEGER NOT NULL DEFAULT 0,
    vm_swap_kb                  INTEGER NOT NULL DEFAULT 0,
    voluntary_ctxt_switches     INTEGER NOT NULL DEFAULT 0,
    nonvoluntary_ctxt_switches  INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_status_sample_ts ON status_sample(ts);
CREATE INDEX IF NOT EXISTS idx_status_sample_pid ON status_sample(pid);

CREATE TABLE IF NOT EXISTS fd_record (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    ts       INTEGER NOT NULL,
    pid      INTEGER NOT NULL,
    fd_num   INTEGER NOT NULL,
    fd_type  TEXT NOT NULL DEFAULT 'other',
    path     TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_fd_record_ts ON fd_record(ts);
CREATE INDEX IF NOT EXISTS idx_fd_record_pid ON fd_record(pid);

CREATE TABLE IF NOT EXISTS net_connection (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    ts           INTEGER NOT NULL,
    pid          INTEGER NOT NULL,
    protocol     TEXT NOT NULL,
    local_addr   TEXT NOT NULL DEFAULT '',
    local_port   INTEGER NOT NULL DEFAULT 0,
    remote_addr  TEXT NOT NULL DEFAULT '',
    remote_port  INTEGER NOT NULL DEFAULT 0,
    state        TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_net_connection_ts ON net_connection(ts);
CREATE INDEX IF NOT EXISTS idx_net_connection_pid ON net_connection(pid);

CREATE TABLE IF NOT EXISTS metric_rollup (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    pid         INTEGER NOT NULL,
    comm        TEXT NOT NULL DEFAULT '',
    bucket_ts   INTEGER NOT NULL,
    avg_cpu     REAL NOT NULL DEFAULT 0,
    max_cpu     REAL NOT NULL DEFAULT 0,
    avg_rss_kb  REAL NOT NULL DEFAULT 0,
    max_rss_kb  REAL NOT NULL DEFAULT 0,
    samples     INTEGER NOT NULL DEFAULT 0,
    UNIQUE(pid, bucket_ts)
);
CREATE INDEX IF NOT EXISTS idx_metric_rollup_bucket ON metric_rollup(bucket_ts);

CREATE TABLE IF NOT EXISTS alert (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    ts         INTEGER NOT NULL,
    pid        INTEGER NOT NULL,
    severity   TEXT NOT NULL,
    category   TEXT NOT NULL,
    message    TEXT NOT NULL DEFAULT '',
    value      REAL NOT NULL DEFAULT 0,
    threshold  REAL NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_alert_ts ON alert(ts);
CREATE INDEX IF NOT EXISTS idx_alert_pid ON alert(pid);

CREATE TABLE IF NOT EXISTS fingerprint (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    pid            INTEGER NOT NULL,
    comm           TEXT NOT NULL,
    avg_cpu        REAL NOT NULL DEFAULT 0,
    avg_rss_kb     REAL NOT NULL DEFAULT 0,
    avg_threads    REAL NOT NULL DEFAULT 0,
    avg_fd_count   REAL NOT NULL DEFAULT 0,
    avg_net_conns  REAL NOT NULL DEFAULT 0,
    dominant_phase TEXT NOT NULL DEFAULT 'idle',
    sample_count   INTEGER NOT NULL DEFAULT 0,
    updated_at     INTEGER NOT NULL DEFAULT 0,
    UNIQUE(pid, comm)
);

CREATE TABLE IF NOT EXISTS fingerprint_baseline (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    comm           TEXT NOT NULL,
    label          TEXT NOT NULL DEFAULT 'default',
    avg_cpu        REAL NOT NULL DEFAULT 0,
    avg_rss_kb     REAL NOT NULL DEFAULT 0,
    avg_threads    REAL NOT NULL DEFAULT 0,
    avg_fd_count   REAL NOT NULL DEFAULT 0,
    avg_net_conns  REAL NOT NULL DEFAULT 0,
    dominant_phase TEXT NOT NULL DEFAULT 'idle',
    sample_count   INTEGER NOT NULL DEFAULT 0,
    created_at     INTEGER NOT NULL DEFAULT 0,
    version        TEXT NOT NULL DEFAULT '1.0'
);
CREATE INDEX IF NOT EXISTS idx_fingerprint_baseline_comm ON fingerprint_baseline(comm);
";

/// Handle to the open database.
///
/// Owned by the event loop and shared (within one thread) by the writer
/// and reader.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path`, configure pragmas, and
    /// apply the schema. Failure here is fatal at startup.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_string(),
            source,
        })?;
        let store = Self { conn };
        store.configure()?;
        store.apply_schema()?;
        debug!(path, "store opened");
        Ok(store)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".to_string(),
            source,
        })?;
        let store = Self { conn };
        store.configure()?;
        store.apply_schema()?;
        Ok(store)
    }

    fn configure(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA busy_timeout=5000;",
            )
            .map_err(StoreError::Schema)?;
        self.conn.set_prepared_statement_cache_capacity(32);
        Ok(())
    }

    fn apply_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA).map_err(StoreError::Schema)
    }

    /// The underlying connection, for the writer and reader.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Rowid of the most recent successful insert.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }
}
