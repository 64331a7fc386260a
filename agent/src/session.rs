//! Tracing session
//!
//! A session pairs the tracer's own identity with the resolved filter. It is
//! created once before tracing starts and never changes afterwards; the
//! kernel gets a copy of it through the config and filter maps.

use tracegate_shared::{
    decide, ConfigEntry, EventContext, FilterMode, FilterParameters, SessionConfig,
    TracerIdentity, Verdict,
};
use tracing::warn;

use crate::config::FilterPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    config: SessionConfig,
    params: Option<FilterParameters>,
}

impl Session {
    pub fn new(tracer: TracerIdentity, plan: FilterPlan) -> Self {
        let session = Self {
            config: SessionConfig {
                tracer,
                mode: plan.mode,
            },
            params: Some(plan.params),
        };
        session.warn_if_self_targeted();
        session
    }

    /// A session where nothing has been configured; it admits nothing.
    pub fn unconfigured(tracer: TracerIdentity) -> Self {
        Self {
            config: SessionConfig {
                tracer,
                mode: FilterMode::Unset,
            },
            params: None,
        }
    }

    fn warn_if_self_targeted(&self) {
        let Some(params) = &self.params else {
            return;
        };
        let tracer = self.config.tracer.pid;
        let targets_self = match self.config.mode {
            FilterMode::Pid | FilterMode::PidTid => params.pid == tracer,
            FilterMode::Uid | FilterMode::Unset => false,
        };
        if targets_self {
            warn!(
                "Filter targets the tracer's own pid {}; its events are never traced",
                tracer
            );
        }
    }

    pub fn tracer(&self) -> TracerIdentity {
        self.config.tracer
    }

    pub fn mode(&self) -> FilterMode {
        self.config.mode
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn params(&self) -> Option<&FilterParameters> {
        self.params.as_ref()
    }

    /// Raw descriptor written to the kernel config map
    pub fn config_entry(&self) -> ConfigEntry {
        ConfigEntry::new(self.config.tracer, self.config.mode)
    }

    /// Evaluate one event with the same engine the eBPF program runs
    pub fn admit(&self, ctx: &EventContext) -> Verdict {
        decide(&self.config, self.params.as_ref(), ctx)
    }
}
