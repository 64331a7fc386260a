//! Filter data model
//!
//! These are the records the control plane writes into maps before a session
//! starts and the per-event snapshot built by the instrumentation layer.

use crate::exclusion::{
    CapacityError, CommMatch, CommPattern, CommSet, IdSet, MAX_BLACKLIST_COMMS,
    MAX_BLACKLIST_PIDS, MAX_BLACKLIST_TIDS, TASK_COMM_LEN,
};

/// Process ID as seen in the tracer's observation namespace
pub type Pid = u32;

/// Thread ID, only meaningful together with its owning pid
pub type Tid = u32;

/// User ID
pub type Uid = u32;

/// Key of the single filter record in the filter map
pub const FILTER_KEY: u32 = 0;

/// Index of the session descriptor in the config array
pub const CONFIG_INDEX: u32 = 0;

/// Filter scope of a tracing session.
///
/// Exactly one scope is active per session. `Unset` is what a zeroed or
/// unrecognized descriptor decodes to, and it admits nothing.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "user",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum FilterMode {
    #[default]
    Unset = 0,
    /// Everything owned by one user
    Uid = 1,
    /// One process
    Pid = 2,
    /// One thread of one process
    PidTid = 3,
}

impl FilterMode {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => FilterMode::Uid,
            2 => FilterMode::Pid,
            3 => FilterMode::PidTid,
            _ => FilterMode::Unset,
        }
    }

    pub const fn as_raw(self) -> u32 {
        self as u32
    }
}

/// The tracer's own process, excluded from every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracerIdentity {
    pub pid: Pid,
}

impl TracerIdentity {
    pub const fn new(pid: Pid) -> Self {
        Self { pid }
    }
}

/// Typed view of the session descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub tracer: TracerIdentity,
    pub mode: FilterMode,
}

/// Raw session descriptor stored at `CONFIG_INDEX` of the config array.
///
/// The mode is kept as a plain integer so that a corrupt or zeroed value can
/// never produce an invalid enum in the kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigEntry {
    pub tracer_pid: Pid,
    pub filter_mode: u32,
}

impl ConfigEntry {
    pub const fn new(tracer: TracerIdentity, mode: FilterMode) -> Self {
        Self {
            tracer_pid: tracer.pid,
            filter_mode: mode.as_raw(),
        }
    }

    pub const fn session(&self) -> SessionConfig {
        SessionConfig {
            tracer: TracerIdentity::new(self.tracer_pid),
            mode: FilterMode::from_raw(self.filter_mode),
        }
    }
}

/// Identity of the task that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    pub uid: Uid,
    pub host_pid: Pid,
    pub host_tid: Tid,
    /// NUL-padded thread name, all zeroes when unknown
    pub comm: [u8; TASK_COMM_LEN],
}

impl EventContext {
    pub const fn new(uid: Uid, host_pid: Pid, host_tid: Tid) -> Self {
        Self {
            uid,
            host_pid,
            host_tid,
            comm: [0; TASK_COMM_LEN],
        }
    }

    /// Split the combined values returned by `bpf_get_current_pid_tgid` and
    /// `bpf_get_current_uid_gid`.
    pub const fn from_raw(pid_tgid: u64, uid_gid: u64, comm: [u8; TASK_COMM_LEN]) -> Self {
        Self {
            uid: (uid_gid & 0xffff_ffff) as Uid,
            host_pid: (pid_tgid >> 32) as Pid,
            host_tid: (pid_tgid & 0xffff_ffff) as Tid,
            comm,
        }
    }

    pub fn with_comm(mut self, name: &[u8]) -> Self {
        let mut comm = [0u8; TASK_COMM_LEN];
        let len = name.len().min(TASK_COMM_LEN - 1);
        comm[..len].copy_from_slice(&name[..len]);
        self.comm = comm;
        self
    }
}

/// The single filter record of a session.
///
/// Which fields matter depends on the session's [`FilterMode`]: `uid` for
/// `Uid`, `pid` for `Pid`, `pid` and `tid` for `PidTid`. Blacklists are only
/// consulted by the `Uid` (pids, tids, names) and `Pid` (tids, names) scopes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterParameters {
    pub uid: Uid,
    pub pid: Pid,
    pub tid: Tid,
    pub blacklist_pids: IdSet<MAX_BLACKLIST_PIDS>,
    pub blacklist_tids: IdSet<MAX_BLACKLIST_TIDS>,
    pub blacklist_comms: CommSet<MAX_BLACKLIST_COMMS>,
}

impl FilterParameters {
    pub fn uid(uid: Uid) -> Self {
        Self {
            uid,
            ..Default::default()
        }
    }

    pub fn pid(pid: Pid) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    pub fn pid_tid(pid: Pid, tid: Tid) -> Self {
        Self {
            pid,
            tid,
            ..Default::default()
        }
    }

    pub fn blacklist_pid(mut self, pid: Pid) -> Result<Self, CapacityError> {
        self.blacklist_pids.insert(pid)?;
        Ok(self)
    }

    pub fn blacklist_tid(mut self, tid: Tid) -> Result<Self, CapacityError> {
        self.blacklist_tids.insert(tid)?;
        Ok(self)
    }

    pub fn blacklist_comm(mut self, pattern: CommPattern) -> Result<Self, CapacityError> {
        self.blacklist_comms.insert(pattern)?;
        Ok(self)
    }

    pub fn comm_match(mut self, mode: CommMatch) -> Self {
        self.blacklist_comms.set_mode(mode);
        self
    }
}
