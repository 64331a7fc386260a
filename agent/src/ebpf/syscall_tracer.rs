//! Syscall tracer eBPF program management
//!
//! Handles the lifecycle of the syscall tracing eBPF program

use anyhow::{Context, Result};
use aya::Ebpf;
use tracing::{info, warn};

use super::loader::{self, RawTracepointLinks};
use crate::session::Session;

/// Syscall tracer manager
pub struct SyscallTracer {
    bpf: Ebpf,
    links: Option<RawTracepointLinks>,
    session: Session,
}

impl SyscallTracer {
    /// Load the eBPF program and install the session filter.
    ///
    /// The filter is in place before anything is attached, so no event is
    /// ever judged against an empty configuration.
    pub fn new(session: Session) -> Result<Self> {
        info!("Initializing syscall tracer");

        let mut bpf =
            loader::load_syscall_tracer().context("Failed to load syscall tracer eBPF")?;
        loader::install_filter(&mut bpf, &session)
            .context("Failed to install session filter")?;

        Ok(Self {
            bpf,
            links: None,
            session,
        })
    }

    /// Start tracing
    pub fn start(&mut self) -> Result<()> {
        info!("Starting syscall tracing");

        if self.links.is_some() {
            warn!("Syscall tracer already started");
            return Ok(());
        }

        let links = loader::attach_syscall_tracer(&mut self.bpf)
            .context("Failed to attach syscall tracer")?;

        self.links = Some(links);
        info!("Syscall tracing started successfully");

        Ok(())
    }

    /// Stop tracing and clear the filter so nothing more is admitted
    pub fn stop(&mut self) {
        info!("Stopping syscall tracing");

        if let Err(e) = loader::clear_filter(&mut self.bpf, self.session.tracer().pid) {
            warn!("Failed to clear session filter: {:#}", e);
        }

        if let Some(links) = self.links.take() {
            info!("Detaching {} raw tracepoint links", links.len());
            drop(links);
            info!("Syscall tracing stopped");
        } else {
            warn!("Syscall tracer was not running");
        }
    }

    /// Get mutable reference to the BPF object for map access
    pub fn bpf_mut(&mut self) -> &mut Ebpf {
        &mut self.bpf
    }
}

impl Drop for SyscallTracer {
    fn drop(&mut self) {
        if self.links.is_some() {
            self.stop();
        }
    }
}
