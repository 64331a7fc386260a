//! eBPF program management

pub mod loader;
pub mod syscall_tracer;
