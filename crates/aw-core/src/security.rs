//! Security audit of file descriptors and network connections.
//!
//! Pure functions invoked by the collector on each tick's FDs and
//! sockets. Findings become alert rows with zero value/threshold.

use crate::records::{Alert, FdRecord, NetConnection, Severity};

/// Upper bound on findings returned by one audit call.
const MAX_FINDINGS: usize = 32;

/// Path fragments that indicate an agent has a credential file open.
const CREDENTIAL_PATTERNS: &[&str] = &[
    ".ssh/",
    ".aws/",
    ".env",
    "keyring",
    ".gnupg/",
    ".config/gcloud/",
    "credentials",
    ".npmrc",
    ".pypirc",
    "id_rsa",
    "id_ed25519",
    ".kube/config",
];

/// Remote ports that established agent connections are expected to use.
const EXPECTED_REMOTE_PORTS: &[u16] = &[0, 53, 80, 443, 8080, 8443];

/// One security finding, ready to be stored as an alert.
#[derive(Debug, Clone)]
pub struct SecurityFinding {
    pub severity: Severity,
    pub category: &'static str,
    pub message: String,
}

impl SecurityFinding {
    /// Convert into an alert row. Security findings carry no numeric
    /// observation, so value and threshold are zero.
    #[must_use]
    pub fn into_alert(self, ts: i64, pid: i32) -> Alert {
        Alert {
            ts,
            pid,
            severity: self.severity,
            category: self.category.to_string(),
            message: self.message,
            value: 0.0,
            threshold: 0.0,
        }
    }
}

/// Flag open credential files. At most one finding per FD row.
#[must_use]
pub fn audit_fds(fds: &[FdRecord]) -> Vec<SecurityFinding> {
    let mut findings = Vec::new();
    for fd in fds {
        if findings.len() >= MAX_FINDINGS {
            break;
        }
        if let Some(pattern) = CREDENTIAL_PATTERNS
            .iter()
            .find(|p| fd.path.contains(*p))
        {
            findings.push(SecurityFinding {
                severity: Severity::Warning,
                category: "security:credential_access",
                message: format!("fd {} holds {} (matched {pattern})", fd.fd_num, fd.path),
            });
        }
    }
    findings
}

/// Flag listening sockets and unexpected outbound connections.
#[must_use]
pub fn audit_connections(conns: &[NetConnection]) -> Vec<SecurityFinding> {
    let mut findings = Vec::new();
    for conn in conns {
        if findings.len() >= MAX_FINDINGS {
            break;
        }
        if conn.state == "LISTEN" {
            let severity = if conn.local_port < 1024 {
                Severity::Warning
            } else {
                Severity::Info
            };
            findings.push(SecurityFinding {
                severity,
                category: "security:listening_port",
                message: format!(
                    "listening on {}:{} ({})",
                    conn.local_addr,
                    conn.local_port,
                    conn.protocol.as_str()
                ),
            });
        } else if conn.state == "ESTABLISHED"
            && !EXPECTED_REMOTE_PORTS.contains(&conn.remote_port)
        {
            findings.push(SecurityFinding {
                severity: Severity::Info,
                category: "security:unexpected_network",
                message: format!(
                    "established to {}:{} ({})",
                    conn.remote_addr,
                    conn.remote_port,
                    conn.protocol.as_str()
                ),
            });
        }
    }
    findings
}
