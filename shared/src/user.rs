//! Userspace-only helpers (`user` feature)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::{RejectReason, Verdict};
use crate::event::SyscallEventBpf;
use crate::exclusion::{comm_len, CapacityError, CommMatch, PatternError, TASK_COMM_LEN};
use crate::types::{ConfigEntry, FilterMode, FilterParameters, Pid, Tid, TracerIdentity, Uid};

mod pod_impls {
    use super::*;
    // SAFETY: all types are #[repr(C)], Copy, and contain only integers and
    // integer arrays; every bit pattern is a valid value.
    unsafe impl aya::Pod for ConfigEntry {}
    unsafe impl aya::Pod for FilterParameters {}
    unsafe impl aya::Pod for SyscallEventBpf {}
}

impl std::error::Error for CapacityError {}

impl std::error::Error for PatternError {}

impl TracerIdentity {
    /// Identity of the calling process
    pub fn current() -> Self {
        Self::new(std::process::id())
    }
}

impl FromStr for FilterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uid" => Ok(FilterMode::Uid),
            "pid" => Ok(FilterMode::Pid),
            "pid_tid" | "pid+tid" | "tid" => Ok(FilterMode::PidTid),
            _ => anyhow::bail!("Invalid filter mode: {}", s),
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterMode::Unset => "unset",
            FilterMode::Uid => "uid",
            FilterMode::Pid => "pid",
            FilterMode::PidTid => "pid_tid",
        })
    }
}

impl FromStr for CommMatch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(CommMatch::Exact),
            "prefix" => Ok(CommMatch::Prefix),
            "contains" => Ok(CommMatch::Contains),
            _ => anyhow::bail!("Invalid thread name match mode: {}", s),
        }
    }
}

impl fmt::Display for CommMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommMatch::Exact => "exact",
            CommMatch::Prefix => "prefix",
            CommMatch::Contains => "contains",
        })
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::SelfTraced => "event comes from the tracer itself",
            RejectReason::ModeUnset => "no filter mode configured",
            RejectReason::ParametersMissing => "no filter parameters configured",
            RejectReason::OutOfScope => "outside the configured scope",
            RejectReason::BlacklistedPid => "process is blacklisted",
            RejectReason::BlacklistedTid => "thread is blacklisted",
            RejectReason::BlacklistedComm => "thread name is blacklisted",
        })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accept => f.write_str("accept"),
            Verdict::Reject(reason) => write!(f, "reject ({})", reason),
        }
    }
}

/// Decode a NUL-padded thread name.
pub fn comm_to_string(comm: &[u8; TASK_COMM_LEN]) -> String {
    String::from_utf8_lossy(&comm[..comm_len(comm)]).into_owned()
}

/// Admitted syscall event, owned and ready for output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallEvent {
    /// Nanoseconds since boot
    pub timestamp: u64,
    pub syscall_id: u64,
    pub pid: Pid,
    pub tid: Tid,
    pub uid: Uid,
    pub comm: String,
}

impl From<&SyscallEventBpf> for SyscallEvent {
    fn from(raw: &SyscallEventBpf) -> Self {
        Self {
            timestamp: raw.timestamp,
            syscall_id: raw.syscall_id,
            pid: raw.host_pid,
            tid: raw.host_tid,
            uid: raw.uid,
            comm: comm_to_string(&raw.comm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventContext;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("uid".parse::<FilterMode>().unwrap(), FilterMode::Uid);
        assert_eq!("PID".parse::<FilterMode>().unwrap(), FilterMode::Pid);
        assert_eq!("pid+tid".parse::<FilterMode>().unwrap(), FilterMode::PidTid);
        assert!("unset".parse::<FilterMode>().is_err());
        assert!("all".parse::<FilterMode>().is_err());
    }

    #[test]
    fn test_mode_serde_names() {
        assert_eq!(
            serde_json::to_string(&FilterMode::PidTid).unwrap(),
            "\"pid_tid\""
        );
        let mode: CommMatch = serde_json::from_str("\"contains\"").unwrap();
        assert_eq!(mode, CommMatch::Contains);
    }

    #[test]
    fn test_syscall_event_conversion() {
        let ctx = EventContext::new(10086, 4321, 4325).with_comm(b"RenderThread");
        let raw = SyscallEventBpf::new(1_000, 56, &ctx);
        let event = SyscallEvent::from(&raw);

        assert_eq!(event.pid, 4321);
        assert_eq!(event.tid, 4325);
        assert_eq!(event.uid, 10086);
        assert_eq!(event.syscall_id, 56);
        assert_eq!(event.comm, "RenderThread");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"comm\":\"RenderThread\""));
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Accept.to_string(), "accept");
        assert_eq!(
            Verdict::Reject(RejectReason::BlacklistedTid).to_string(),
            "reject (thread is blacklisted)"
        );
    }
}
