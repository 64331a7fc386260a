//! Event collectors

pub mod syscall;
