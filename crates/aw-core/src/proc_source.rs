//! Per-PID process introspection.
//!
//! The [`ProcSource`] trait is the platform seam: the collector is
//! generic over it, the Linux implementation reads `/proc` by hand via
//! `std::fs`, and tests substitute an in-memory fake. The correct
//! implementation for the build target is chosen at compile time via
//! [`platform_source`]; there is no runtime probing.
//!
//! Every reader consumes a PID and returns owned memory. All read and
//! parse failures map to [`ProcError`] and are local to that PID.

use std::collections::HashMap;

use crate::error::ProcError;
use crate::records::{FdType, Protocol};

/// Kernel ticks per second. Fixed at 100 on every Linux ABI we target.
pub const CLK_TCK: i64 = 100;

/// Page size in kB used to convert `rss_pages` to kilobytes.
const PAGE_KB: i64 = 4;

// =============================================================================
// Raw per-PID readings
// =============================================================================

/// Parsed fields of `/proc/<pid>/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStat {
    /// Single-letter process state.
    pub state: char,
    /// User-mode CPU time in kernel ticks.
    pub utime: u64,
    /// Kernel-mode CPU time in kernel ticks.
    pub stime: u64,
    pub num_threads: i64,
    /// Process start, in kernel ticks since boot.
    pub starttime: u64,
    /// Virtual memory size in bytes.
    pub vsize: u64,
    /// Resident set size in pages.
    pub rss_pages: i64,
}

impl ProcStat {
    /// Resident set size in kilobytes.
    #[must_use]
    pub fn rss_kb(&self) -> i64 {
        self.rss_pages.max(0) * PAGE_KB
    }
}

/// Fields extracted from `/proc/<pid>/status` by key prefix.
///
/// Missing keys default to 0 or the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcStatus {
    pub state: String,
    pub threads: i64,
    pub vm_rss_kb: i64,
    pub vm_swap_kb: i64,
    pub voluntary_ctxt_switches: i64,
    pub nonvoluntary_ctxt_switches: i64,
    pub uid: u32,
}

/// One entry of `/proc/<pid>/fd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdEntry {
    pub fd_num: i32,
    pub fd_type: FdType,
    /// Symlink target, e.g. `/home/dev/log.txt` or `socket:[12345]`.
    pub path: String,
}

/// One socket row joined against the PID's fd inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketInfo {
    pub protocol: Protocol,
    pub local_addr: String,
    pub local_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
    pub state: String,
}

// =============================================================================
// ProcSource trait
// =============================================================================

/// Platform capability for process enumeration and per-PID sampling.
pub trait ProcSource {
    /// Enumerate numeric PIDs currently visible.
    fn list_pids(&self) -> Result<Vec<i32>, ProcError>;

    /// Short process name, trimmed. `"unknown"` on failure.
    fn read_comm(&self, pid: i32) -> String;

    /// NUL-separated argv joined with single spaces, trailing spaces
    /// stripped. Empty string allowed (kernel threads).
    fn read_cmdline(&self, pid: i32) -> String;

    /// Counters and state from `/proc/<pid>/stat`.
    fn read_stat(&self, pid: i32) -> Result<ProcStat, ProcError>;

    /// Key-prefixed fields from `/proc/<pid>/status`.
    fn read_status(&self, pid: i32) -> Result<ProcStatus, ProcError>;

    /// Open file descriptors, classified by symlink target.
    fn list_fds(&self, pid: i32) -> Result<Vec<FdEntry>, ProcError>;

    /// Sockets attributable to the PID via `socket:[inode]` fd links.
    fn read_net_connections(&self, pid: i32) -> Result<Vec<SocketInfo>, ProcError>;

    /// Resolved `/proc/<pid>/exe` symlink.
    fn read_exe_path(&self, pid: i32) -> Result<String, ProcError>;

    /// Resolved `/proc/<pid>/cwd` symlink.
    fn read_cwd(&self, pid: i32) -> Result<String, ProcError>;

    /// NUL-separated environment, one entry per variable.
    fn read_environ(&self, pid: i32) -> Result<Vec<String>, ProcError>;

    /// Kernel boot time, epoch seconds.
    fn boot_time(&self) -> i64;

    /// Kernel ticks per second.
    fn clk_tck(&self) -> i64 {
        CLK_TCK
    }

    /// Total system memory in kB, for percent-of-memory figures.
    fn total_memory_kb(&self) -> i64;
}

// =============================================================================
// Linux implementation
// =============================================================================

/// `/proc`-backed source for Linux.
///
/// Boot time and total memory are read once at construction; everything
/// else is read per call.
#[derive(Debug, Clone)]
pub struct LinuxProcSource {
    boot_time: i64,
    total_memory_kb: i64,
}

impl LinuxProcSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            boot_time: read_boot_time(),
            total_memory_kb: read_total_memory_kb(),
        }
    }

    fn proc_path(pid: i32, leaf: &str) -> String {
        format!("/proc/{pid}/{leaf}")
    }
}

impl Default for LinuxProcSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcSource for LinuxProcSource {
    fn list_pids(&self) -> Result<Vec<i32>, ProcError> {
        let entries = std::fs::read_dir("/proc").map_err(|_| ProcError::Read {
            pid: 0,
            what: "/proc",
        })?;
        let mut pids = Vec::new();
        for entry in entries.flatten() {
            if let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
            {
                if pid > 0 {
                    pids.push(pid);
                }
            }
        }
        Ok(pids)
    }

    fn read_comm(&self, pid: i32) -> String {
        std::fs::read_to_string(Self::proc_path(pid, "comm"))
            .map(|s| s.trim_end_matches('\n').to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn read_cmdline(&self, pid: i32) -> String {
        let Ok(raw) = std::fs::read(Self::proc_path(pid, "cmdline")) else {
            return String::new();
        };
        join_cmdline(&raw)
    }

    fn read_stat(&self, pid: i32) -> Result<ProcStat, ProcError> {
        let text = std::fs::read_to_string(Self::proc_path(pid, "stat"))
            .map_err(|_| ProcError::Read { pid, what: "stat" })?;
        parse_stat_line(pid, &text)
    }

    fn read_status(&self, pid: i32) -> Result<ProcStatus, ProcError> {
        let text = std::fs::read_to_string(Self::proc_path(pid, "status"))
            .map_err(|_| ProcError::Read { pid, what: "status" })?;
        Ok(parse_status_text(&text))
    }

    fn list_fds(&self, pid: i32) -> Result<Vec<FdEntry>, ProcError> {
        let dir = Self::proc_path(pid, "fd");
        let entries = std::fs::read_dir(&dir).map_err(|_| ProcError::Read { pid, what: "fd" })?;
        let mut fds = Vec::new();
        for entry in entries.flatten() {
            let Some(fd_num) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
            else {
                continue;
            };
            let target = std::fs::read_link(entry.path())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            fds.push(FdEntry {
                fd_num,
                fd_type: classify_fd_target(&target),
                path: target,
            });
        }
        Ok(fds)
    }

    fn read_net_connections(&self, pid: i32) -> Result<Vec<SocketInfo>, ProcError> {
        let fds = self.list_fds(pid)?;
        let inodes: Vec<u64> = fds
            .iter()
            .filter_map(|fd| socket_inode(&fd.path))
            .collect();
        if inodes.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_inode: HashMap<u64, SocketInfo> = HashMap::new();
        for (proto, table) in [
            (Protocol::Tcp, "/proc/net/tcp"),
            (Protocol::Tcp6, "/proc/net/tcp6"),
            (Protocol::Udp, "/proc/net/udp"),
            (Protocol::Udp6, "/proc/net/udp6"),
        ] {
            if let Ok(text) = std::fs::read_to_string(table) {
                for (inode, info) in parse_net_table(proto, &text) {
                    by_inode.insert(inode, info);
                }
            }
        }

        let mut conns = Vec::new();
        for inode in inodes {
            if let Some(info) = by_inode.get(&inode) {
                conns.push(info.clone());
            }
        }
        Ok(conns)
    }

    fn read_exe_path(&self, pid: i32) -> Result<String, ProcError> {
        std::fs::read_link(Self::proc_path(pid, "exe"))
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|_| ProcError::Read { pid, what: "exe" })
    }

    fn read_cwd(&self, pid: i32) -> Result<String, ProcError> {
        std::fs::read_link(Self::proc_path(pid, "cwd"))
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|_| ProcError::Read { pid, what: "cwd" })
    }

    fn read_environ(&self, pid: i32) -> Result<Vec<String>, ProcError> {
        let raw = std::fs::read(Self::proc_path(pid, "environ"))
            .map_err(|_| ProcError::Read { pid, what: "environ" })?;
        Ok(raw
            .split(|&b| b == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect())
    }

    fn boot_time(&self) -> i64 {
        self.boot_time
    }

    fn total_memory_kb(&self) -> i64 {
        self.total_memory_kb
    }
}

/// `btime` from `/proc/stat`, or 0 when unreadable.
fn read_boot_time() -> i64 {
    let Ok(contents) = std::fs::read_to_string("/proc/stat") else {
        return 0;
    };
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("btime ") {
            return rest.trim().parse().unwrap_or(0);
        }
    }
    0
}

/// `MemTotal` from `/proc/meminfo`, or 0 when unreadable.
fn read_total_memory_kb() -> i64 {
    let Ok(contents) = std::fs::read_to_string("/proc/meminfo") else {
        return 0;
    };
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            return rest
                .trim()
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
        }
    }
    0
}

// =============================================================================
// Fallback for unsupported platforms
// =============================================================================

/// Source for platforms without a `/proc` equivalent wired up yet.
/// Sees no processes.
#[derive(Debug, Clone, Default)]
pub struct NullProcSource;

impl ProcSource for NullProcSource {
    fn list_pids(&self) -> Result<Vec<i32>, ProcError> {
        Ok(Vec::new())
    }
    fn read_comm(&self, _pid: i32) -> String {
        "unknown".to_string()
    }
    fn read_cmdline(&self, _pid: i32) -> String {
        String::new()
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

/// The process source for the build target.
#[cfg(target_os = "linux")]
#[must_use]
pub fn platform_source() -> LinuxProcSource {
    LinuxProcSource::new()
}

/// The process source for the build target.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn platform_source() -> NullProcSource {
    NullProcSource
}

// =============================================================================
// Parsers (pure, testable)
// =============================================================================

/// Join a NUL-separated cmdline buffer with single spaces.
fn join_cmdline(raw: &[u8]) -> String {
    let joined: Vec<String> = raw
        .split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();
    joined.join(" ").trim_end().to_string()
}

/// Parse one `/proc/<pid>/stat` line.
///
/// The comm field may itself contain spaces and parentheses, so the
/// split point is the *last* `)` in the line; anything else is a parse
/// failure.
pub fn parse_stat_line(pid: i32, line: &str) -> Result<ProcStat, ProcError> {
    let close = line
        .rfind(')')
        .ok_or(ProcError::Parse { pid, what: "stat comm" })?;
    let rest = &line[close + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is the state (field 3 in proc(5) numbering).
    if fields.len() < 22 {
        return Err(ProcError::Parse { pid, what: "stat fields" });
    }

    let parse_u64 = |idx: usize, what: &'static str| -> Result<u64, ProcError> {
        fields[idx]
            .parse::<u64>()
            .map_err(|_| ProcError::Parse { pid, what })
    };
    let parse_i64 = |idx: usize, what: &'static str| -> Result<i64, ProcError> {
        fields[idx]
            .parse::<i64>()
            .map_err(|_| ProcError::Parse { pid, what })
    };

    Ok(ProcStat {
        state: fields[0].chars().next().unwrap_or('?'),
        utime: parse_u64(11, "utime")?,
        stime: parse_u64(12, "stime")?,
        num_threads: parse_i64(17, "num_threads")?,
        starttime: parse_u64(19, "starttime")?,
        vsize: parse_u64(20, "vsize")?,
        rss_pages: parse_i64(21, "rss")?,
    })
}

/// Extract the fields we care about from `/proc/<pid>/status` text.
/// Missing keys keep their zero defaults.
pub fn parse_status_text(text: &str) -> ProcStatus {
    let mut status = ProcStatus::default();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("State:") {
            // "S (sleeping)" -> "S"
            status.state = rest
                .trim()
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_string();
        } else if let Some(rest) = line.strip_prefix("Threads:") {
            status.threads = parse_leading_i64(rest);
        } else if let Some(rest) = line.strip_prefix("VmRSS:") {
            status.vm_rss_kb = parse_leading_i64(rest);
        } else if let Some(rest) = line.strip_prefix("VmSwap:") {
            status.vm_swap_kb = parse_leading_i64(rest);
        } else if let Some(rest) = line.strip_prefix("voluntary_ctxt_switches:") {
            status.voluntary_ctxt_switches = parse_leading_i64(rest);
        } else if let Some(rest) = line.strip_prefix("nonvoluntary_ctxt_switches:") {
            status.nonvoluntary_ctxt_switches = parse_leading_i64(rest);
        } else if let Some(rest) = line.strip_prefix("Uid:") {
            // "Uid:  1000  1000  1000  1000" -> real uid
            status.uid = rest
                .trim()
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
        }
    }
    status
}

fn parse_leading_i64(rest: &str) -> i64 {
    rest.trim()
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Classify an fd symlink target by prefix.
pub fn classify_fd_target(target: &str) -> FdType {
    if target.starts_with("socket:") {
        FdType::Socket
    } else if target.starts_with("pipe:") {
        FdType::Pipe
    } else if target.starts_with("anon_inode:") {
        FdType::AnonInode
    } else if target.starts_with("/dev/") {
        FdType::Device
    } else if target.ends_with('/') {
        FdType::Directory
    } else if target.starts_with('/') {
        FdType::Regular
    } else {
        FdType::Other
    }
}

/// Extract the inode from a `socket:[12345]` symlink target.
pub fn socket_inode(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Parse one kernel socket table (`/proc/net/tcp` and friends) into
/// `(inode, SocketInfo)` pairs. Malformed rows are skipped.
pub fn parse_net_table(protocol: Protocol, text: &str) -> Vec<(u64, SocketInfo)> {
    let mut out = Vec::new();
    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let Some((local_addr, local_port)) = parse_hex_endpoint(fields[1]) else {
            continue;
        };
        let Some((remote_addr, remote_port)) = parse_hex_endpoint(fields[2]) else {
            continue;
        };
        let Ok(state_code) = u8::from_str_radix(fields[3], 16) else {
            continue;
        };
        let Ok(inode) = fields[9].parse::<u64>() else {
            continue;
        };
        out.push((
            inode,
            SocketInfo {
                protocol,
                local_addr,
                local_port,
                remote_addr,
                remote_port,
                state: socket_state_name(state_code).to_string(),
            },
        ));
    }
    out
}

/// Map a kernel socket state code to its human name.
#[must_use]
pub fn socket_state_name(code: u8) -> &'static str {
    match code {
        0x01 => "ESTABLISHED",
        0x02 => "SYN_SENT",
        0x03 => "SYN_RECV",
        0x04 => "FIN_WAIT1",
        0x05 => "FIN_WAIT2",
        0x06 => "TIME_WAIT",
        0x07 => "CLOSE",
        0x08 => "CLOSE_WAIT",
        0x09 => "LAST_ACK",
        0x0A => "LISTEN",
        0x0B => "CLOSING",
        _ => "UNKNOWN",
    }
}

/// Parse a kernel `ADDR:PORT` hex endpoint.
///
/// IPv4 addresses are 8 hex chars in little-endian byte order; IPv6 are
/// 32 hex chars in four little-endian 32-bit groups. The port is a
/// big-endian u16.
fn parse_hex_endpoint(field: &str) -> Option<(String, u16)> {
    let (addr_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    let addr = match addr_hex.len() {
        8 => {
            let v = u32::from_str_radix(addr_hex, 16).ok()?;
            let bytes = v.to_le_bytes();
            format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])
        }
        32 => {
            let mut groups = Vec::with_capacity(8);
            for chunk in 0..4 {
                let word = u32::from_str_radix(&addr_hex[chunk * 8..chunk * 8 + 8], 16).ok()?;
                let bytes = word.to_le_bytes();
                groups.push(format!("{:02x}{:02x}", bytes[0], bytes[1]));
                groups.push(format!("{:02x}{:02x}", bytes[2], bytes[3]));
            }
            groups.join(":")
        }
        _ => return None,
    };
    Some((addr, port))
}

/// Resolve a numeric UID to a user name via `/etc/passwd`, falling back
/// to the UID as text.
#[must_use]
pub fn resolve_username(uid: u32) -> String {
    if let Ok(passwd) = std::fs::read_to_string("/etc/passwd") {
        for line in passwd.lines() {
            let mut parts = line.split(':');
            let name = parts.next().unwrap_or("");
            let _password = parts.next();
            if let Some(id) = parts.next().and_then(|v| v.parse::<u32>().ok()) {
                if id == uid {
                    return name.to_string();
                }
            }
        }
    }
    uid.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- stat parsing -----------------------------------------------------------

    const STAT_LINE: &str = "1234 (claude) S 1 1234 1234 0 -1 4194304 9000 0 12 0 \
         5400 1300 0 0 20 0 8 0 123456 104857600 25000 18446744073709551615 \
         1 1 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0";

    #[test]
    fn parse_stat_basic() {
        let stat = parse_stat_line(1234, STAT_LINE).unwrap();
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.utime, 5400);
        assert_eq!(stat.stime, 1300);
        assert_eq!(stat.num_threads, 8);
        assert_eq!(stat.starttime, 123_456);
        assert_eq!(stat.vsize, 104_857_600);
        assert_eq!(stat.rss_pages, 25_000);
        assert_eq!(stat.rss_kb(), 100_000);
    }

    #[test]
    fn parse_stat_comm_with_parens_and_spaces() {
        // comm is "evil) proc (x" — the split point must be the last ')'.
        let line = "77 (evil) proc (x) R 1 77 77 0 -1 0 0 0 0 0 \
             10 20 0 0 20 0 2 0 999 4096 64 0 \
             1 1 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0";
        let stat = parse_stat_line(77, line).unwrap();
        assert_eq!(stat.state, 'R');
        assert_eq!(stat.utime, 10);
        assert_eq!(stat.stime, 20);
        assert_eq!(stat.num_threads, 2);
    }

    #[test]
    fn parse_stat_no_paren_fails() {
        assert!(matches!(
            parse_stat_line(1, "1 comm S 1 2 3"),
            Err(ProcError::Parse { .. })
        ));
    }

    #[test]
    fn parse_stat_short_fails() {
        assert!(matches!(
            parse_stat_line(1, "1 (x) S 1 2 3"),
            Err(ProcError::Parse { .. })
        ));
    }

    #[test]
    fn parse_stat_non_numeric_fails() {
        let line = "5 (x) S 1 5 5 0 -1 0 0 0 0 0 NOTNUM 20 0 0 20 0 2 0 999 4096 64 0";
        assert!(parse_stat_line(5, line).is_err());
    }

    // -- status parsing ---------------------------------------------------------

    #[test]
    fn parse_status_all_keys() {
        let text = "Name:\tclaude\nUmask:\t0022\nState:\tS (sleeping)\nUid:\t1000\t1000\t1000\t1000\n\
             VmRSS:\t  204800 kB\nVmSwap:\t  1024 kB\nThreads:\t12\n\
             voluntary_ctxt_switches:\t5000\nnonvoluntary_ctxt_switches:\t321\n";
        let status = parse_status_text(text);
        assert_eq!(status.state, "S");
        assert_eq!(status.threads, 12);
        assert_eq!(status.vm_rss_kb, 204_800);
        assert_eq!(status.vm_swap_kb, 1024);
        assert_eq!(status.voluntary_ctxt_switches, 5000);
        assert_eq!(status.nonvoluntary_ctxt_switches, 321);
        assert_eq!(status.uid, 1000);
    }

    #[test]
    fn parse_status_missing_keys_default_zero() {
        let status = parse_status_text("Name:\tx\n");
        assert_eq!(status.state, "");
        assert_eq!(status.threads, 0);
        assert_eq!(status.vm_rss_kb, 0);
        assert_eq!(status.voluntary_ctxt_switches, 0);
    }

    // -- fd classification ------------------------------------------------------

    #[test]
    fn classify_targets() {
        assert_eq!(classify_fd_target("socket:[45678]"), FdType::Socket);
        assert_eq!(classify_fd_target("pipe:[111]"), FdType::Pipe);
        assert_eq!(classify_fd_target("anon_inode:[eventpoll]"), FdType::AnonInode);
        assert_eq!(classify_fd_target("/dev/null"), FdType::Device);
        assert_eq!(classify_fd_target("/home/dev/"), FdType::Directory);
        assert_eq!(classify_fd_target("/home/dev/a.log"), FdType::Regular);
        assert_eq!(classify_fd_target("weird"), FdType::Other);
    }

    #[test]
    fn socket_inode_extraction() {
        assert_eq!(socket_inode("socket:[45678]"), Some(45_678));
        assert_eq!(socket_inode("pipe:[45678]"), None);
        assert_eq!(socket_inode("socket:[oops]"), None);
    }

    // -- net table parsing ------------------------------------------------------

    const TCP_TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 45678 1 0000000000000000 100 0 0 10 0\n   1: 0100007F:A3E2 0A000001:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 45679 1 0000000000000000 20 4 30 10 -1\n";

    #[test]
    fn parse_tcp_table() {
        let rows = parse_net_table(Protocol::Tcp, TCP_TABLE);
        assert_eq!(rows.len(), 2);

        let (inode, listen) = &rows[0];
        assert_eq!(*inode, 45_678);
        assert_eq!(listen.local_addr, "127.0.0.1");
        assert_eq!(listen.local_port, 8080);
        assert_eq!(listen.state, "LISTEN");

        let (inode, est) = &rows[1];
        assert_eq!(*inode, 45_679);
        assert_eq!(est.remote_addr, "1.0.0.10");
        assert_eq!(est.remote_port, 443);
        assert_eq!(est.state, "ESTABLISHED");
    }

    #[test]
    fn parse_net_table_skips_garbage() {
        let text = "header\nnot a socket row\n   0: ZZZZ:0000 00000000:0000 0A x x x x x 1\n";
        assert!(parse_net_table(Protocol::Tcp, text).is_empty());
    }

    #[test]
    fn state_code_mapping() {
        assert_eq!(socket_state_name(0x01), "ESTABLISHED");
        assert_eq!(socket_state_name(0x06), "TIME_WAIT");
        assert_eq!(socket_state_name(0x0A), "LISTEN");
        assert_eq!(socket_state_name(0x0B), "CLOSING");
        assert_eq!(socket_state_name(0xFF), "UNKNOWN");
    }

    // -- cmdline ----------------------------------------------------------------

    #[test]
    fn cmdline_join() {
        assert_eq!(join_cmdline(b"claude\0--resume\0abc\0"), "claude --resume abc");
        assert_eq!(join_cmdline(b""), "");
        assert_eq!(join_cmdline(b"solo\0"), "solo");
    }

    // -- live /proc (Linux only) ------------------------------------------------

    #[cfg(target_os = "linux")]
    #[test]
    fn live_self_readable() {
        let source = LinuxProcSource::new();
        let pid = std::process::id() as i32;

        let pids = source.list_pids().unwrap();
        assert!(pids.contains(&pid));

        let comm = source.read_comm(pid);
        assert!(!comm.is_empty());
        assert_ne!(comm, "unknown");

        let stat = source.read_stat(pid).unwrap();
        assert!(stat.num_threads >= 1);

        let status = source.read_status(pid).unwrap();
        assert!(status.threads >= 1);

        let fds = source.list_fds(pid).unwrap();
        assert!(!fds.is_empty());

        assert!(source.boot_time() > 0);
        assert!(source.total_memory_kb() > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn live_missing_pid_fails_locally() {
        let source = LinuxProcSource::new();
        // PIDs near i32::MAX do not exist.
        let bogus = i32::MAX - 7;
        assert_eq!(source.read_comm(bogus), "unknown");
        assert!(source.read_stat(bogus).is_err());
    }

    #[test]
    fn null_source_sees_nothing() {
        let source = NullProcSource;
        assert!(source.list_pids().unwrap().is_empty());
        assert!(source.read_stat(1).is_err());
        assert_eq!(source.clk_tck(), CLK_TCK);
    }
}
