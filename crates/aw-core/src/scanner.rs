//! Agent discovery.
//!
//! Filters the platform's PID set by a pipe-separated case-insensitive
//! substring pattern matched against both comm and cmdline. The
//! monitor's own PID is always excluded so the watcher never watches
//! itself.

use crate::proc_source::ProcSource;

/// A process discovered by one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedAgent {
    pub pid: i32,
    pub comm: String,
    pub cmdline: String,
}

/// Pattern-based process filter.
#[derive(Debug, Clone)]
pub struct Scanner {
    /// Lower-cased needles from the pipe-separated pattern.
    needles: Vec<String>,
    self_pid: i32,
}

impl Scanner {
    /// Build a scanner from a pipe-separated pattern like
    /// `"codex|claude|gemini|copilot"`. Empty segments are dropped.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        Self::with_self_pid(pattern, std::process::id() as i32)
    }

    /// Like [`Scanner::new`] with an explicit self PID, for tests.
    #[must_use]
    pub fn with_self_pid(pattern: &str, self_pid: i32) -> Self {
        let needles = pattern
            .split('|')
            .map(|part| part.trim().to_lowercase())
            .filter(|part| !part.is_empty())
            .collect();
        Self { needles, self_pid }
    }

    /// Whether a process with this comm and cmdline matches the pattern.
    #[must_use]
    pub fn matches(&self, comm: &str, cmdline: &str) -> bool {
        if self.needles.is_empty() {
            return false;
        }
        let comm = comm.to_lowercase();
        let cmdline = cmdline.to_lowercase();
        self.needles
            .iter()
            .any(|needle| comm.contains(needle) || cmdline.contains(needle))
    }

    /// Enumerate matching processes, excluding the monitor itself.
    ///
    /// PIDs that disappear between enumeration and the comm read fall
    /// out naturally: their comm reads as `"unknown"` and will not
    /// match a real pattern.
    pub fn scan<S: ProcSource>(&self, source: &S) -> Vec<ScannedAgent> {
        let Ok(pids) = source.list_pids() else {
            return Vec::new();
        };

        let mut agents = Vec::new();
        for pid in pids {
            if pid == self.self_pid {
                continue;
            }
            let comm = source.read_comm(pid);
            let cmdline = source.read_cmdline(pid);
            if self.matches(&comm, &cmdline) {
                agents.push(ScannedAgent { pid, comm, cmdline });
            }
        }
        agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcError;
    use crate::proc_source::{FdEntry, ProcStat, ProcStatus, SocketInfo};

    struct FakeSource {
        procs: Vec<(i32, &'static str, &'static str)>,
    }

    impl ProcSource for FakeSource {
        fn list_pids(&self) -> Result<Vec<i32>, ProcError> {
            Ok(self.procs.iter().map(|(pid, _, _)| *pid).collect())
        }
        fn read_comm(&self, pid: i32) -> String {
            self.procs
                .iter()
                .find(|(p, _, _)| *p == pid)
                .map_or_else(|| "unknown".to_string(), |(_, comm, _)| (*comm).to_string())
        }
        fn read_cmdline(&self, pid: i32) -> String {
            self.procs
                .iter()
                .find(|(p, _, _)| *p == pid)
                .map_or_else(String::new, |(_, _, args)| (*args).to_string())
        }
        fn read_stat(&self, pid: i32) -> Result<ProcStat, ProcError> {
            Err(ProcError::Read { pid, what: "stat" })
        }
        fn read_status(&self, pid: i32) -> Result<ProcStatus, ProcError> {
            Err(ProcError::Read { pid, what: "status" })
        }
        fn list_fds(&self, pid: i32) -> Result<Vec<FdEntry>, ProcError> {
            Err(ProcError::Read { pid, what: "fd" })
        }
        fn read_net_connections(&self, pid: i32) -> Result<Vec<SocketInfo>, ProcError> {
            Err(ProcError::Read { pid, what: "net" })
        }
        fn read_exe_path(&self, pid: i32) -> Result<String, ProcError> {
            Err(ProcError::Read { pid, what: "exe" })
        }
        fn read_cwd(&self, pid: i32) -> Result<String, ProcError> {
            Err(ProcError::Read { pid, what: "cwd" })
        }
        fn read_environ(&self, pid: i32) -> Result<Vec<String>, ProcError> {
            Err(ProcError::Read { pid, what: "environ" })
        }
        fn boot_time(&self) -> i64 {
            0
        }
        fn total_memory_kb(&self) -> i64 {
            0
        }
    }

    #[test]
    fn matches_comm_case_insensitive() {
        let scanner = Scanner::with_self_pid("codex|claude", 1);
        assert!(scanner.matches("Claude", ""));
        assert!(scanner.matches("CODEX", ""));
        assert!(!scanner.matches("bash", ""));
    }

    #[test]
    fn matches_cmdline_substring() {
        let scanner = Scanner::with_self_pid("gemini", 1);
        assert!(scanner.matches("node", "/usr/bin/node /opt/Gemini-cli/main.js"));
        assert!(!scanner.matches("node", "/usr/bin/node server.js"));
    }

    #[test]
    fn empty_pattern_matches_nothing() {
        let scanner = Scanner::with_self_pid("", 1);
        assert!(!scanner.matches("claude", "claude"));

        let scanner = Scanner::with_self_pid("||", 1);
        assert!(!scanner.matches("claude", "claude"));
    }

    #[test]
    fn scan_filters_and_excludes_self() {
        let source = FakeSource {
            procs: vec![
                (100, "claude", "claude --resume"),
                (200, "bash", "bash"),
                (300, "codex", "codex exec"),
                (999, "claude", "claude"), // the monitor itself
            ],
        };
        let scanner = Scanner::with_self_pid("codex|claude|gemini|copilot", 999);
        let agents = scanner.scan(&source);
        let pids: Vec<i32> = agents.iter().map(|a| a.pid).collect();
        assert_eq!(pids, vec![100, 300]);
        assert_eq!(agents[0].comm, "claude");
        assert_eq!(agents[1].cmdline, "codex exec");
    }

    #[test]
    fn pattern_segments_are_trimmed() {
        let scanner = Scanner::with_self_pid(" codex | claude ", 1);
        assert!(scanner.matches("claude", ""));
        assert!(scanner.matches("codex", ""));
    }
}
