//! Per-tick collection orchestrator.
//!
//! A tick is the atomic unit of observation: scan for matching
//! processes, sample each one, and persist everything in a single
//! transaction. Per-PID failures are swallowed with a warning so one
//! bad PID never poisons the tick; store-level begin/commit failures
//! surface as counters the event loop logs. No retries at this layer.

use tracing::{debug, warn};

use crate::proc_source::{ProcSource, ProcStatus};
use crate::records::{FdRecord, NetConnection, ProcessSample, StatusRecord};
use crate::scanner::{ScannedAgent, Scanner};
use crate::security;
use crate::timefmt::system_time_seconds;
use crate::writer::Writer;

/// Everything one tick produced, owned by the caller.
///
/// The engine consumes this in memory regardless of whether the commit
/// succeeded; `committed` lets the event loop log failed ticks.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Tick wall-clock time, epoch seconds.
    pub ts: i64,
    /// Monotonic tick ordinal.
    pub tick: u64,
    /// Matching processes discovered by the scan.
    pub agents_found: usize,
    /// One sample per discovered agent (zeroed when unreadable).
    pub samples: Vec<ProcessSample>,
    /// Status records for PIDs whose status read succeeded.
    pub statuses: Vec<StatusRecord>,
    /// `(pid, open fd count)` for PIDs whose fd listing succeeded.
    pub fd_counts: Vec<(i32, i32)>,
    /// `(pid, socket count)` for PIDs whose net read succeeded.
    pub conn_counts: Vec<(i32, i32)>,
    /// Sample rows handed to the writer without error.
    pub samples_written: usize,
    /// Security alert rows written this tick.
    pub alerts_written: usize,
    /// Row writes that failed and were skipped.
    pub write_errors: usize,
    /// Whether the tick's transaction committed.
    pub committed: bool,
}

impl TickResult {
    fn empty(ts: i64, tick: u64) -> Self {
        Self {
            ts,
            tick,
            committed: true,
            ..Self::default()
        }
    }

    /// Status record for a PID, when this tick captured one.
    #[must_use]
    pub fn status_for(&self, pid: i32) -> Option<&StatusRecord> {
        self.statuses.iter().find(|s| s.pid == pid)
    }

    /// Open-fd count for a PID, when this tick captured one.
    #[must_use]
    pub fn fd_count_for(&self, pid: i32) -> Option<i32> {
        self.fd_counts
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, n)| *n)
    }

    /// Socket count for a PID, when this tick captured one.
    #[must_use]
    pub fn conn_count_for(&self, pid: i32) -> Option<i32> {
        self.conn_counts
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, n)| *n)
    }
}

/// Per-tick collector.
pub struct Collector<'a, S: ProcSource> {
    source: &'a S,
    scanner: Scanner,
    writer: Writer<'a>,
    tick_count: u64,
}

impl<'a, S: ProcSource> Collector<'a, S> {
    #[must_use]
    pub fn new(source: &'a S, scanner: Scanner, writer: Writer<'a>) -> Self {
        Self {
            source,
            scanner,
            writer,
            tick_count: 0,
        }
    }

    /// Ticks performed so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.tick_count
    }

    /// Run one tick: scan, sample every discovered agent, persist the
    /// batch in one transaction, and return the in-memory result.
    pub fn tick(&mut self) -> TickResult {
        let now = system_time_seconds();
        self.tick_count += 1;
        let mut result = TickResult::empty(now, self.tick_count);

        let agents = self.scanner.scan(self.source);
        result.agents_found = agents.len();
        if agents.is_empty() {
            debug!(tick = result.tick, "no matching agents");
            return result;
        }

        if let Err(err) = self.writer.begin() {
            warn!(tick = result.tick, %err, "transaction begin failed, skipping tick");
            result.committed = false;
            return result;
        }

        for agent in &agents {
            self.collect_agent(agent, now, &mut result);
        }

        let seen: Vec<i32> = agents.iter().map(|a| a.pid).collect();
        if let Err(err) = self.writer.mark_dead_except(&seen, now) {
            warn!(%err, "marking vanished agents failed");
            result.write_errors += 1;
        }

        match self.writer.commit() {
            Ok(()) => {}
            Err(err) => {
                warn!(tick = result.tick, %err, "commit failed, tick rolled back");
                result.committed = false;
            }
        }

        debug!(
            tick = result.tick,
            agents = result.agents_found,
            samples = result.samples_written,
            errors = result.write_errors,
            committed = result.committed,
            "tick complete"
        );
        result
    }

    /// Collect and persist everything for one agent. Any failure here
    /// is local: the agent is skipped or recorded with defaults, and
    /// the loop continues.
    fn collect_agent(&self, agent: &ScannedAgent, now: i64, result: &mut TickResult) {
        let pid = agent.pid;

        if let Err(err) = self
            .writer
            .upsert_agent(pid, &agent.comm, &agent.cmdline, now)
        {
            warn!(pid, %err, "agent upsert failed, skipping pid");
            result.write_errors += 1;
            return;
        }

        // Status is read before the sample so the sample can resolve
        // its user; rows are still written in sample-then-status order.
        let status = self.source.read_status(pid).ok();

        let sample = self.build_sample(agent, status.as_ref(), now);
        match self.writer.write_sample(&sample) {
            Ok(()) => result.samples_written += 1,
            Err(err) => {
                warn!(pid, %err, "sample write failed");
                result.write_errors += 1;
            }
        }
        result.samples.push(sample);

        if let Some(status) = status {
            let record = StatusRecord {
                ts: now,
                pid,
                state: status.state.clone(),
                threads: status.threads,
                vm_rss_kb: status.vm_rss_kb,
                vm_swap_kb: status.vm_swap_kb,
                voluntary_ctxt_switches: status.voluntary_ctxt_switches,
                nonvoluntary_ctxt_switches: status.nonvoluntary_ctxt_switches,
            };
            if let Err(err) = self.writer.write_status(&record) {
                warn!(pid, %err, "status write failed");
                result.write_errors += 1;
            }
            result.statuses.push(record);
        }

        // Alert rows for this PID are written last, after its fd and
        // net rows.
        let mut findings = Vec::new();

        if let Ok(fds) = self.source.list_fds(pid) {
            let records: Vec<FdRecord> = fds
                .into_iter()
                .map(|fd| FdRecord {
                    ts: now,
                    pid,
                    fd_num: fd.fd_num,
                    fd_type: fd.fd_type,
                    path: fd.path,
                })
                .collect();
            for fd in &records {
                if let Err(err) = self.writer.write_fd(fd) {
                    warn!(pid, fd = fd.fd_num, %err, "fd write failed");
                    result.write_errors += 1;
                }
            }
            result
                .fd_counts
                .push((pid, i32::try_from(records.len()).unwrap_or(i32::MAX)));
            findings.extend(security::audit_fds(&records));
        }

        if let Ok(conns) = self.source.read_net_connections(pid) {
            let records: Vec<NetConnection> = conns
                .into_iter()
                .map(|conn| NetConnection {
                    ts: now,
                    pid,
                    protocol: conn.protocol,
                    local_addr: conn.local_addr,
                    local_port: conn.local_port,
                    remote_addr: conn.remote_addr,
                    remote_port: conn.remote_port,
                    state: conn.state,
                })
                .collect();
            for conn in &records {
                if let Err(err) = self.writer.write_net(conn) {
                    warn!(pid, %err, "net write failed");
                    result.write_errors += 1;
                }
            }
            result
                .conn_counts
                .push((pid, i32::try_from(records.len()).unwrap_or(i32::MAX)));
            findings.extend(security::audit_connections(&records));
        }

        for finding in findings {
            self.write_security_alert(finding, now, pid, result);
        }
    }

    fn write_security_alert(
        &self,
        finding: security::SecurityFinding,
        now: i64,
        pid: i32,
        result: &mut TickResult,
    ) {
        let alert = finding.into_alert(now, pid);
        match self.writer.write_alert(&alert) {
            Ok(()) => result.alerts_written += 1,
            Err(err) => {
                warn!(pid, %err, "alert write failed");
                result.write_errors += 1;
            }
        }
    }

    /// Build the tick's sample for one agent. On any read or parse
    /// failure a zeroed sample with `stat="?"` stands in, because the
    /// PID was proven to exist during scan.
    fn build_sample(
        &self,
        agent: &ScannedAgent,
        status: Option<&ProcStatus>,
        now: i64,
    ) -> ProcessSample {
        let pid = agent.pid;
        let stat = match self.source.read_stat(pid) {
            Ok(stat) => stat,
            Err(err) => {
                warn!(pid, %err, "stat unreadable, recording zero sample");
                return ProcessSample::unreadable(pid, now, &agent.comm, &agent.cmdline);
            }
        };

        let clk_tck = self.source.clk_tck().max(1);
        let started_at = self.source.boot_time() + stat.starttime as i64 / clk_tck;
        let etimes = (now - started_at).max(0);

        let cpu_secs = (stat.utime + stat.stime) as f64 / clk_tck as f64;
        let cpu = if etimes > 0 {
            100.0 * cpu_secs / etimes as f64
        } else {
            0.0
        };

        let rss_kb = stat.rss_kb();
        let total_kb = self.source.total_memory_kb();
        let mem = if total_kb > 0 {
            100.0 * rss_kb as f64 / total_kb as f64
        } else {
            0.0
        };

        let user = status.map_or_else(String::new, |s| {
            crate::proc_source::resolve_username(s.uid)
        });

        ProcessSample {
            ts: now,
            pid,
            user,
            cpu,
            mem,
            rss_kb,
            stat: stat.state.to_string(),
            etimes,
            comm: agent.comm.clone(),
            args: agent.cmdline.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcError;
    use crate::proc_source::{FdEntry, ProcStat, SocketInfo};
    use crate::reader::Reader;
    use crate::records::{FdType, Protocol};
    use crate::store::Store;

    /// In-memory source with a fixed set of processes.
    struct FakeSource {
        pids: Vec<i32>,
        stat_fails_for: Option<i32>,
        fds: Vec<FdEntry>,
        conns: Vec<SocketInfo>,
    }

    impl FakeSource {
        fn with_pids(pids: Vec<i32>) -> Self {
            Self {
                pids,
                stat_fails_for: None,
                fds: Vec::new(),
                conns: Vec::new(),
            }
        }
    }

    impl ProcSource for FakeSource {
        fn list_pids(&self) -> Result<Vec<i32>, ProcError> {
            Ok(self.pids.clone())
        }
        fn read_comm(&self, _pid: i32) -> String {
            "claude".to_string()
        }
        fn read_cmdline(&self, pid: i32) -> String {
            format!("claude --session {pid}")
        }
        fn read_stat(&self, pid: i32) -> Result<ProcStat, ProcError> {
            if self.stat_fails_for == Some(pid) {
                return Err(ProcError::Read { pid, what: "stat" });
            }
            Ok(ProcStat {
                state: 'S',
                utime: 500,
                stime: 100,
                num_threads: 4,
                starttime: 0,
                vsize: 1 << 28,
                rss_pages: 2500,
            })
        }
        fn read_status(&self, _pid: i32) -> Result<ProcStatus, ProcError> {
            Ok(ProcStatus {
                state: "S".to_string(),
                threads: 4,
                vm_rss_kb: 10_000,
                vm_swap_kb: 0,
                voluntary_ctxt_switches: 100,
                nonvoluntary_ctxt_switches: 10,
                uid: 0,
            })
        }
        fn list_fds(&self, _pid: i32) -> Result<Vec<FdEntry>, ProcError> {
            Ok(self.fds.clone())
        }
        fn read_net_connections(&self, _pid: i32) -> Result<Vec<SocketInfo>, ProcError> {
            Ok(self.conns.clone())
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
            16_000_000
        }
    }

    fn collector_parts(store: &Store, source: &FakeSource) -> TickResult {
        let scanner = Scanner::with_self_pid("claude", 0);
        let writer = Writer::new(store);
        let mut collector = Collector::new(source, scanner, writer);
        collector.tick()
    }

    #[test]
    fn empty_scan_returns_early() {
        let store = Store::open_in_memory().unwrap();
        let source = FakeSource::with_pids(vec![]);
        let result = collector_parts(&store, &source);

        assert_eq!(result.agents_found, 0);
        assert_eq!(result.samples_written, 0);
        assert!(result.committed);

        let reader = Reader::new(&store);
        assert_eq!(reader.get_sample_count().unwrap(), 0);
        assert!(reader.get_alive_agents().unwrap().is_empty());
    }

    #[test]
    fn tick_persists_samples_and_statuses() {
        let store = Store::open_in_memory().unwrap();
        let source = FakeSource::with_pids(vec![100, 200]);
        let result = collector_parts(&store, &source);

        assert_eq!(result.agents_found, 2);
        assert_eq!(result.samples_written, 2);
        assert_eq!(result.samples.len(), 2);
        assert_eq!(result.statuses.len(), 2);
        assert!(result.committed);

        let reader = Reader::new(&store);
        assert_eq!(reader.get_sample_count().unwrap(), 2);
        assert_eq!(reader.get_alive_agents().unwrap().len(), 2);
        assert_eq!(reader.get_distinct_pids().unwrap(), vec![100, 200]);
    }

    #[test]
    fn unreadable_stat_becomes_zero_sample() {
        let store = Store::open_in_memory().unwrap();
        let mut source = FakeSource::with_pids(vec![100, 200]);
        source.stat_fails_for = Some(200);
        let result = collector_parts(&store, &source);

        // Both PIDs are recorded; the broken one as a zeroed sample.
        assert_eq!(result.samples.len(), 2);
        let broken = result.samples.iter().find(|s| s.pid == 200).unwrap();
        assert_eq!(broken.stat, "?");
        assert_eq!(broken.cpu, 0.0);
        assert_eq!(broken.rss_kb, 0);
        assert!(result.committed);
    }

    #[test]
    fn cpu_is_lifetime_average() {
        let store = Store::open_in_memory().unwrap();
        let source = FakeSource::with_pids(vec![100]);
        let result = collector_parts(&store, &source);

        let sample = &result.samples[0];
        // 600 ticks at 100 Hz = 6 CPU-seconds over the process lifetime.
        // Lifetime is `now` seconds (starttime 0, boot 0), so cpu stays small
        // but positive.
        assert!(sample.cpu > 0.0);
        assert!(sample.cpu < 100.0);
        assert_eq!(sample.rss_kb, 10_000);
        assert!(sample.etimes > 0);
    }

    #[test]
    fn security_findings_become_alert_rows() {
        let store = Store::open_in_memory().unwrap();
        let mut source = FakeSource::with_pids(vec![100]);
        source.fds = vec![FdEntry {
            fd_num: 7,
            fd_type: FdType::Regular,
            path: "/home/dev/.aws/credentials".to_string(),
        }];
        source.conns = vec![SocketInfo {
            protocol: Protocol::Tcp,
            local_addr: "0.0.0.0".to_string(),
            local_port: 443,
            remote_addr: "0.0.0.0".to_string(),
            remote_port: 0,
            state: "LISTEN".to_string(),
        }];
        let result = collector_parts(&store, &source);

        assert_eq!(result.alerts_written, 2);
        assert_eq!(result.fd_counts, vec![(100, 1)]);
        assert_eq!(result.conn_counts, vec![(100, 1)]);

        let reader = Reader::new(&store);
        let alerts = reader.get_recent_alerts(10).unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts
            .iter()
            .any(|a| a.category == "security:credential_access"));
        assert!(alerts
            .iter()
            .any(|a| a.category == "security:listening_port"));
    }

    #[test]
    fn vanished_agents_are_marked_dead() {
        let store = Store::open_in_memory().unwrap();

        let source = FakeSource::with_pids(vec![100, 200]);
        collector_parts(&store, &source);

        // Next tick only sees PID 100.
        let source = FakeSource::with_pids(vec![100]);
        collector_parts(&store, &source);

        let reader = Reader::new(&store);
        let alive = reader.get_alive_agents().unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].pid, 100);
    }

    #[test]
    fn tick_counter_increments() {
        let store = Store::open_in_memory().unwrap();
        let source = FakeSource::with_pids(vec![]);
        let scanner = Scanner::with_self_pid("claude", 0);
        let writer = Writer::new(&store);
        let mut collector = Collector::new(&source, scanner, writer);

        let first = collector.tick();
        let second = collector.tick();
        assert_eq!(first.tick, 1);
        assert_eq!(second.tick, 2);
        assert_eq!(collector.ticks(), 2);
    }
}
