//! Error types for aw-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for aw-core
#[derive(Error, Debug)]
pub enum Error {
    /// Store-layer errors
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// /proc read or parse errors
    #[error("proc error: {0}")]
    Proc(#[from] ProcError),

    /// Timestamp parse/format errors
    #[error("timestamp error: {0}")]
    Timestamp(#[from] TimestampError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// SQL-layer failures.
///
/// Variants mirror the stages of a write: open and schema failures are
/// fatal at startup, `TxnBegin` skips the tick, `TxnCommit` rolls the
/// tick back, and everything else is a per-row failure the collector
/// counts and continues past.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Cannot open the database file. Fatal at startup.
    #[error("cannot open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Schema DDL failed to apply.
    #[error("schema apply failed: {0}")]
    Schema(#[source] rusqlite::Error),

    /// Statement preparation failed.
    #[error("prepare failed: {0}")]
    Prepare(#[source] rusqlite::Error),

    /// Parameter bind or step failed during a write.
    #[error("write failed: {0}")]
    Write(#[source] rusqlite::Error),

    /// Query execution or row mapping failed.
    #[error("query failed: {0}")]
    Query(#[source] rusqlite::Error),

    /// BEGIN failed; the tick writes nothing.
    #[error("transaction begin failed: {0}")]
    TxnBegin(#[source] rusqlite::Error),

    /// COMMIT failed; the tick was rolled back.
    #[error("transaction commit failed: {0}")]
    TxnCommit(#[source] rusqlite::Error),
}

/// A `/proc` read or parse failure.
///
/// Always local to one PID: the collector substitutes a default-valued
/// record and continues.
#[derive(Error, Debug)]
pub enum ProcError {
    /// A file under `/proc/<pid>/` could not be read.
    #[error("read failed for pid {pid}: {what}")]
    Read { pid: i32, what: &'static str },

    /// A numeric or structural parse failed.
    #[error("parse failed for pid {pid}: {what}")]
    Parse { pid: i32, what: &'static str },
}

/// Timestamp parse/format failures.
#[derive(Error, Debug)]
pub enum TimestampError {
    /// Input string is too short or has non-numeric fields.
    #[error("invalid timestamp string: {0:?}")]
    InvalidString(String),

    /// Negative epoch seconds cannot be formatted.
    #[error("negative epoch seconds: {0}")]
    NegativeSeconds(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_displays_path() {
        let err = StoreError::Open {
            path: "/tmp/missing/aw.db".to_string(),
            source: rusqlite::Error::InvalidQuery,
        };
        let msg = format!("{err}");
        assert!(msg.contains("/tmp/missing/aw.db"));
    }

    #[test]
    fn proc_error_converts_to_top_level() {
        let err: Error = ProcError::Read {
            pid: 42,
            what: "stat",
        }
        .into();
        assert!(matches!(err, Error::Proc(_)));
        assert!(format!("{err}").contains("42"));
    }

    #[test]
    fn timestamp_error_displays_input() {
        let err = TimestampError::InvalidString("not-a-date".to_string());
        assert!(format!("{err}").contains("not-a-date"));
    }
}
