//! Wire format of admitted events
//!
//! Written by the eBPF program into the perf buffer, read back by the agent.

use crate::exclusion::TASK_COMM_LEN;
use crate::types::{EventContext, Pid, Tid, Uid};

/// Syscall entry event forwarded for every admitted task.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallEventBpf {
    pub timestamp: u64,
    pub syscall_id: u64,
    pub host_pid: Pid,
    pub host_tid: Tid,
    pub uid: Uid,
    pub comm: [u8; TASK_COMM_LEN],
}

impl SyscallEventBpf {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub const fn new(timestamp: u64, syscall_id: u64, ctx: &EventContext) -> Self {
        Self {
            timestamp,
            syscall_id,
            host_pid: ctx.host_pid,
            host_tid: ctx.host_tid,
            uid: ctx.uid,
            comm: ctx.comm,
        }
    }
}
