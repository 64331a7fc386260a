//! Shared types and the admission engine for tracegate
//!
//! This crate is compiled twice: once for the eBPF target (`no_std`, the
//! default) and once for the agent with the `user` feature, which adds
//! `aya::Pod` impls, serde support and a few std-only helpers.
//!
//! The eBPF side and userspace agree on layouts byte-for-byte, so every type
//! that crosses a map or perf buffer is `#[repr(C)]` and `Copy`.

#![cfg_attr(not(any(feature = "user", test)), no_std)]

pub mod engine;
pub mod event;
pub mod exclusion;
pub mod types;

#[cfg(feature = "user")]
pub mod user;

#[cfg(feature = "user")]
pub mod utils;

// Re-export commonly used types
pub use engine::{decide, should_trace, RejectReason, Verdict};
pub use event::SyscallEventBpf;
pub use exclusion::{CapacityError, CommMatch, CommPattern, CommSet, IdSet, PatternError};
pub use types::*;
