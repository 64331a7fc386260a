//! Syscall event collector
//!
//! Receives admitted events from the perf buffer, checks them against the
//! session once more, streams them to the configured output and keeps the
//! per-process and per-syscall counts for the summary.

use std::collections::HashMap;
use std::io::Write;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracegate_shared::user::SyscallEvent;
use tracegate_shared::{EventContext, Pid, SyscallEventBpf};
use tracing::{debug, info, warn};

use crate::output::json::JsonLinesWriter;
use crate::session::Session;

/// Event count of one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCount {
    pub pid: Pid,
    /// Thread name of the most recent event from this process
    pub comm: String,
    pub count: u64,
}

/// Event count of one syscall number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallCount {
    pub syscall_id: u64,
    pub count: u64,
}

/// End-of-session summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Human description of the session filter
    pub filter: String,
    pub total_events: u64,
    /// Events the kernel forwarded but the session rejects
    pub mismatched_events: u64,
    /// Admitted events that could not be written to the event output
    #[serde(default)]
    pub output_errors: u64,
    /// Sorted by count, descending
    pub processes: Vec<ProcessCount>,
    /// Sorted by count, descending
    pub syscalls: Vec<SyscallCount>,
}

/// Syscall event collector
pub struct SyscallCollector {
    session: Session,
    filter: String,
    output: Option<JsonLinesWriter<Box<dyn Write + Send>>>,
    total_events: u64,
    mismatched_events: u64,
    output_errors: u64,
    processes: HashMap<Pid, ProcessCount>,
    syscalls: HashMap<u64, u64>,
}

impl SyscallCollector {
    /// Create a new syscall collector
    pub fn new(session: Session, filter: String) -> Self {
        Self {
            session,
            filter,
            output: None,
            total_events: 0,
            mismatched_events: 0,
            output_errors: 0,
            processes: HashMap::new(),
            syscalls: HashMap::new(),
        }
    }

    /// Stream every accepted event as a JSON line to `writer`
    pub fn with_output(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.output = Some(JsonLinesWriter::new(writer));
        self
    }

    /// Process a raw eBPF event
    pub fn process_event(&mut self, raw: &SyscallEventBpf) -> Result<()> {
        let ctx = EventContext {
            uid: raw.uid,
            host_pid: raw.host_pid,
            host_tid: raw.host_tid,
            comm: raw.comm,
        };
        let verdict = self.session.admit(&ctx);
        if !verdict.is_accept() {
            // Possible for events already in flight while the filter changes
            debug!(
                "Dropping event from pid {} tid {}: {}",
                raw.host_pid, raw.host_tid, verdict
            );
            self.mismatched_events += 1;
            return Ok(());
        }

        self.add_event(SyscallEvent::from(raw))
    }

    /// Add an already admitted event.
    ///
    /// The event is counted even when writing it to the output fails.
    pub fn add_event(&mut self, event: SyscallEvent) -> Result<()> {
        self.total_events += 1;
        *self.syscalls.entry(event.syscall_id).or_insert(0) += 1;

        let process = self
            .processes
            .entry(event.pid)
            .or_insert_with(|| ProcessCount {
                pid: event.pid,
                comm: String::new(),
                count: 0,
            });
        process.count += 1;
        process.comm.clone_from(&event.comm);

        if let Some(output) = self.output.as_mut() {
            if let Err(e) = output.write(&event) {
                self.output_errors += 1;
                if self.output_errors == 1 {
                    warn!(
                        "Failed to write event output, events will be missing from it: {:#}",
                        e
                    );
                }
                return Err(e).context("Failed to write event");
            }
        }

        Ok(())
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn mismatched_events(&self) -> u64 {
        self.mismatched_events
    }

    pub fn output_errors(&self) -> u64 {
        self.output_errors
    }

    /// Flush the streamed output
    pub fn flush(&mut self) -> Result<()> {
        if let Some(output) = self.output.as_mut() {
            output.flush()?;
            debug!("Wrote {} events to the event output", output.written());
        }
        Ok(())
    }

    /// Build the summary of everything collected so far
    pub fn build_summary(&self) -> TraceSummary {
        info!(
            "Building trace summary from {} events ({} mismatched)",
            self.total_events, self.mismatched_events
        );

        let mut processes: Vec<ProcessCount> = self.processes.values().cloned().collect();
        processes.sort_by(|a, b| b.count.cmp(&a.count).then(a.pid.cmp(&b.pid)));

        let mut syscalls: Vec<SyscallCount> = self
            .syscalls
            .iter()
            .map(|(&syscall_id, &count)| SyscallCount { syscall_id, count })
            .collect();
        syscalls.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(a.syscall_id.cmp(&b.syscall_id))
        });

        TraceSummary {
            filter: self.filter.clone(),
            total_events: self.total_events,
            mismatched_events: self.mismatched_events,
            output_errors: self.output_errors,
            processes,
            syscalls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use tracegate_shared::TracerIdentity;

    fn collector() -> SyscallCollector {
        let plan = FilterConfig {
            uid: Some(1000),
            blacklist_pids: vec![200],
            ..Default::default()
        }
        .resolve()
        .unwrap();
        SyscallCollector::new(Session::new(TracerIdentity::new(100), plan), plan.describe())
    }

    fn raw(pid: u32, tid: u32, uid: u32, syscall_id: u64, comm: &[u8]) -> SyscallEventBpf {
        let ctx = EventContext::new(uid, pid, tid).with_comm(comm);
        SyscallEventBpf::new(1_000, syscall_id, &ctx)
    }

    #[test]
    fn test_syscall_collector() {
        let mut collector = collector();

        collector.process_event(&raw(300, 300, 1000, 63, b"main")).unwrap();
        collector.process_event(&raw(300, 301, 1000, 63, b"worker")).unwrap();
        collector.process_event(&raw(400, 400, 1000, 64, b"other")).unwrap();

        let summary = collector.build_summary();
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.mismatched_events, 0);

        assert_eq!(summary.processes.len(), 2);
        assert_eq!(summary.processes[0].pid, 300);
        assert_eq!(summary.processes[0].count, 2);
        assert_eq!(summary.processes[0].comm, "worker");

        assert_eq!(
            summary.syscalls,
            vec![
                SyscallCount {
                    syscall_id: 63,
                    count: 2
                },
                SyscallCount {
                    syscall_id: 64,
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_collector_drops_mismatched_events() {
        let mut collector = collector();

        // blacklisted pid, wrong uid, and the tracer itself
        collector.process_event(&raw(200, 200, 1000, 0, b"")).unwrap();
        collector.process_event(&raw(300, 300, 0, 0, b"")).unwrap();
        collector.process_event(&raw(100, 100, 1000, 0, b"")).unwrap();

        assert_eq!(collector.total_events(), 0);
        assert_eq!(collector.mismatched_events(), 3);
        assert!(collector.build_summary().processes.is_empty());
    }

    #[test]
    fn test_collector_streams_output() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("events.jsonl");
        let file = std::fs::File::create(&path).unwrap();

        let mut collector = collector().with_output(Box::new(file));
        collector.process_event(&raw(300, 300, 1000, 63, b"main")).unwrap();
        collector.process_event(&raw(200, 200, 1000, 63, b"main")).unwrap();
        collector.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        let event: SyscallEvent = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(event.pid, 300);
        assert_eq!(event.comm, "main");
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_output_keeps_counts_consistent() {
        let mut collector = collector().with_output(Box::new(BrokenPipe));

        assert!(collector.process_event(&raw(300, 300, 1000, 63, b"main")).is_err());
        assert!(collector.process_event(&raw(300, 301, 1000, 64, b"main")).is_err());

        let summary = collector.build_summary();
        assert_eq!(summary.total_events, 2);
        assert_eq!(summary.output_errors, 2);
        let per_process: u64 = summary.processes.iter().map(|p| p.count).sum();
        let per_syscall: u64 = summary.syscalls.iter().map(|s| s.count).sum();
        assert_eq!(per_process, summary.total_events);
        assert_eq!(per_syscall, summary.total_events);
    }
}
