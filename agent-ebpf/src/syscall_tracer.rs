#![no_std]
#![no_main]

//! Syscall tracer eBPF program
//!
//! Builds the identity of the calling task on every `sys_enter`, runs it
//! through the admission engine and forwards admitted events to userspace.

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_uid_gid, bpf_ktime_get_ns,
    },
    macros::{map, raw_tracepoint},
    maps::{Array, HashMap, PerfEventArray},
    programs::RawTracePointContext,
    EbpfContext,
};
use tracegate_shared::{
    should_trace, ConfigEntry, EventContext, FilterParameters, SyscallEventBpf, CONFIG_INDEX,
    FILTER_KEY,
};

#[no_mangle]
#[link_section = "license"]
pub static LICENSE: [u8; 4] = *b"GPL\0";

/// Session descriptor (tracer pid + filter mode), written once by the agent
#[map]
static CONFIG: Array<ConfigEntry> = Array::with_max_entries(1, 0);

/// The single filter record. A hash map so that "not configured" is a
/// missing entry rather than a zeroed one.
#[map]
static FILTER: HashMap<u32, FilterParameters> = HashMap::with_max_entries(1, 0);

/// Perf buffer for admitted events
#[map]
static SYSCALL_EVENTS: PerfEventArray<SyscallEventBpf> = PerfEventArray::new(0);

#[raw_tracepoint(tracepoint = "sys_enter")]
pub fn sys_enter(ctx: RawTracePointContext) -> i32 {
    match try_sys_enter(&ctx) {
        Ok(ret) => ret,
        Err(_) => 0,
    }
}

fn try_sys_enter(ctx: &RawTracePointContext) -> Result<i32, i64> {
    // An unreadable descriptor means nothing is configured yet
    let Some(entry) = CONFIG.get(CONFIG_INDEX) else {
        return Ok(0);
    };
    let session = entry.session();

    let comm = bpf_get_current_comm().unwrap_or([0u8; 16]);
    let event_ctx =
        EventContext::from_raw(bpf_get_current_pid_tgid(), bpf_get_current_uid_gid(), comm);

    let params = unsafe { FILTER.get(&FILTER_KEY) };
    if !should_trace(&session, params, &event_ctx) {
        return Ok(0);
    }

    // ctx.as_ptr() points to struct bpf_raw_tracepoint_args { __u64 args[0]; }
    // args[1] is the syscall ID
    let args = ctx.as_ptr() as *const u64;
    let syscall_id = unsafe { *args.offset(1) };
    let timestamp = unsafe { bpf_ktime_get_ns() };

    let event = SyscallEventBpf::new(timestamp, syscall_id, &event_ctx);
    SYSCALL_EVENTS.output(ctx, &event, 0);

    Ok(0)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
