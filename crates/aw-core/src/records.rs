//! Row types shared by the collector, writer, reader, and engine.
//!
//! One struct per table. String fields are always owned; a record read
//! back from the store carries freshly allocated strings the caller is
//! free to keep past the next query.

use serde::{Deserialize, Serialize};

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Info,
    /// Warning - attention needed
    Warning,
    /// Critical - immediate action needed
    Critical,
}

impl Severity {
    /// Stable text form stored in the `alert.severity` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Parse the stored text form. Unknown text maps to `Info`.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "critical" => Self::Critical,
            "warning" => Self::Warning,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tick's metrics for one PID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSample {
    /// Sample time, epoch seconds.
    pub ts: i64,
    /// Process ID, always > 0.
    pub pid: i32,
    /// Owning user name, or the numeric UID as text.
    pub user: String,
    /// CPU percent averaged over the process lifetime.
    pub cpu: f64,
    /// Resident memory as percent of system memory.
    pub mem: f64,
    /// Resident set size in kB.
    pub rss_kb: i64,
    /// Single-letter kernel state, or `"?"` when unreadable.
    pub stat: String,
    /// Seconds since process start.
    pub etimes: i64,
    /// Short process name.
    pub comm: String,
    /// Full command line, space-joined.
    pub args: String,
}

impl ProcessSample {
    /// A zeroed sample for a PID whose `/proc` entries could not be
    /// read. The PID was proven to exist during scan, so it is recorded
    /// rather than dropped.
    #[must_use]
    pub fn unreadable(pid: i32, ts: i64, comm: &str, args: &str) -> Self {
        Self {
            ts,
            pid,
            user: String::new(),
            cpu: 0.0,
            mem: 0.0,
            rss_kb: 0,
            stat: "?".to_string(),
            etimes: 0,
            comm: comm.to_string(),
            args: args.to_string(),
        }
    }
}

/// Kernel-exposed status for one PID at one tick.
///
/// The context-switch counters are monotonically non-decreasing for a
/// live PID; consumers must treat a decrease as a reset (PID reuse).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub ts: i64,
    pub pid: i32,
    /// Kernel state text, e.g. `"S (sleeping)"` trimmed to its letter.
    pub state: String,
    pub threads: i64,
    pub vm_rss_kb: i64,
    pub vm_swap_kb: i64,
    pub voluntary_ctxt_switches: i64,
    pub nonvoluntary_ctxt_switches: i64,
}

/// Classification of an open file descriptor by its symlink target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FdType {
    Regular,
    Directory,
    Socket,
    Pipe,
    Device,
    AnonInode,
    Other,
}

impl FdType {
    /// Stable text form stored in the `fd_record.fd_type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Directory => "directory",
            Self::Socket => "socket",
            Self::Pipe => "pipe",
            Self::Device => "device",
            Self::AnonInode => "anon_inode",
            Self::Other => "other",
        }
    }
}

/// One open file descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FdRecord {
    pub ts: i64,
    pub pid: i32,
    /// Descriptor number, >= 0.
    pub fd_num: i32,
    pub fd_type: FdType,
    /// Symlink target, or the synthetic `socket:[inode]` form.
    pub path: String,
}

/// Socket protocol families the net reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Tcp6,
    Udp,
    Udp6,
}

impl Protocol {
    /// Stable text form stored in the `net_connection.protocol` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tcp6 => "tcp6",
            Self::Udp => "udp",
            Self::Udp6 => "udp6",
        }
    }
}

/// One socket attributable to a PID.
///
/// A socket belongs to PID p iff some fd of p is a symlink to
/// `socket:[inode]` matching this row's inode; a socket shared by
/// multiple PIDs is reported under each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConnection {
    pub ts: i64,
    pub pid: i32,
    pub protocol: Protocol,
    pub local_addr: String,
    pub local_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
    /// Human state name, e.g. `ESTABLISHED`, `LISTEN`, `TIME_WAIT`.
    pub state: String,
}

/// Deduplicated process identity across the lifetime of one `pid+comm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: i64,
    pub pid: i32,
    pub comm: String,
    pub args: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub alive: bool,
}

/// One fired check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub ts: i64,
    pub pid: i32,
    pub severity: Severity,
    /// Short tag, e.g. `cpu`, `memory_leak`, `security:listening_port`.
    pub category: String,
    /// Human-readable message.
    pub message: String,
    /// Observed value that fired the check. 0 for security findings.
    pub value: f64,
    /// Configured tier that was crossed. 0 for security findings.
    pub threshold: f64,
}

/// Running behavioral summary for one `(pid, comm)`.
///
/// Averages are exact arithmetic means over the `sample_count` samples
/// observed since the PID entered the engine's state map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub pid: i32,
    pub comm: String,
    pub avg_cpu: f64,
    pub avg_rss_kb: f64,
    pub avg_threads: f64,
    pub avg_fd_count: f64,
    pub avg_net_conns: f64,
    /// `idle`, `active`, or `burst`.
    pub dominant_phase: String,
    pub sample_count: i64,
    pub updated_at: i64,
}

/// A labeled, write-once snapshot of one fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub id: i64,
    pub comm: String,
    pub label: String,
    pub avg_cpu: f64,
    pub avg_rss_kb: f64,
    pub avg_threads: f64,
    pub avg_fd_count: f64,
    pub avg_net_conns: f64,
    pub dominant_phase: String,
    pub sample_count: i64,
    pub created_at: i64,
    pub version: String,
}

/// One hourly rollup bucket for one PID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupRecord {
    pub pid: i32,
    pub comm: String,
    /// Bucket start, `ts - ts % 3600`.
    pub bucket_ts: i64,
    pub avg_cpu: f64,
    pub max_cpu: f64,
    pub avg_rss_kb: f64,
    pub max_rss_kb: f64,
    pub samples: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_text_roundtrip() {
        for sev in [Severity::Info, Severity::Warning, Severity::Critical] {
            assert_eq!(Severity::from_str_lossy(sev.as_str()), sev);
        }
        assert_eq!(Severity::from_str_lossy("bogus"), Severity::Info);
    }

    #[test]
    fn severity_serde_snake_case() {
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    }

    #[test]
    fn fd_type_text() {
        assert_eq!(FdType::AnonInode.as_str(), "anon_inode");
        assert_eq!(FdType::Regular.as_str(), "regular");
    }

    #[test]
    fn unreadable_sample_is_zeroed() {
        let s = ProcessSample::unreadable(7, 100, "claude", "claude --help");
        assert_eq!(s.pid, 7);
        assert_eq!(s.stat, "?");
        assert_eq!(s.cpu, 0.0);
        assert_eq!(s.rss_kb, 0);
        assert_eq!(s.comm, "claude");
    }

    #[test]
    fn sample_serde_roundtrip() {
        let s = ProcessSample {
            ts: 1_700_000_000,
            pid: 1234,
            user: "dev".to_string(),
            cpu: 12.5,
            mem: 1.2,
            rss_kb: 50_000,
            stat: "S".to_string(),
            etimes: 3600,
            comm: "codex".to_string(),
            args: "codex run".to_string(),
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: ProcessSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pid, s.pid);
        assert_eq!(back.comm, s.comm);
        assert!((back.cpu - s.cpu).abs() < f64::EPSILON);
    }
}
