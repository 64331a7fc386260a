//! Configuration types for the tracing agent
//!
//! The operator describes a filter either in a TOML file or with CLI flags;
//! [`FilterConfig::resolve`] turns that description into the single filter
//! mode and filter record a session runs with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracegate_shared::{
    CapacityError, CommMatch, CommPattern, FilterMode, FilterParameters, PatternError, Pid, Tid,
    Uid,
};

/// Reasons a filter description cannot be turned into a session filter
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no filter scope given: set a uid, a pid, or a pid and a tid")]
    NoScope,

    #[error("uid and pid scopes are mutually exclusive")]
    ConflictingScopes,

    #[error("a tid is only meaningful together with its pid")]
    TidWithoutPid,

    #[error("{mode} mode requires `{field}`")]
    MissingParameter {
        mode: FilterMode,
        field: &'static str,
    },

    #[error("`{field}` cannot be used in {mode} mode")]
    UnusedParameter {
        mode: FilterMode,
        field: &'static str,
    },

    #[error("`{field}` is not consulted in {mode} mode")]
    UnusedBlacklist {
        mode: FilterMode,
        field: &'static str,
    },

    #[error("too many entries in `{field}`")]
    Capacity {
        field: &'static str,
        #[source]
        source: CapacityError,
    },

    #[error("invalid thread name pattern {pattern:?}")]
    Pattern {
        pattern: String,
        #[source]
        source: PatternError,
    },

    #[error("invalid filter file")]
    Parse(#[from] toml::de::Error),
}

/// Operator-facing filter description.
///
/// ```toml
/// uid = 10086
/// blacklist_pids = [2310]
/// blacklist_comms = ["RenderThread", "HeapTask"]
/// comm_match = "prefix"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Explicit mode; inferred from the scope fields when absent
    pub mode: Option<FilterMode>,
    pub uid: Option<Uid>,
    pub pid: Option<Pid>,
    pub tid: Option<Tid>,
    pub blacklist_pids: Vec<Pid>,
    pub blacklist_tids: Vec<Tid>,
    pub blacklist_comms: Vec<String>,
    /// How `blacklist_comms` entries are compared (default: exact)
    pub comm_match: Option<CommMatch>,
}

/// A validated filter: the session mode and its filter record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterPlan {
    pub mode: FilterMode,
    pub params: FilterParameters,
}

impl FilterPlan {
    /// One-line human description, for logs
    pub fn describe(&self) -> String {
        let p = &self.params;
        let scope = match self.mode {
            FilterMode::Unset => "nothing".to_string(),
            FilterMode::Uid => format!("uid {}", p.uid),
            FilterMode::Pid => format!("pid {}", p.pid),
            FilterMode::PidTid => format!("pid {} tid {}", p.pid, p.tid),
        };

        let mut exclusions = Vec::new();
        if !p.blacklist_pids.is_empty() {
            exclusions.push(format!("{} pids", p.blacklist_pids.len()));
        }
        if !p.blacklist_tids.is_empty() {
            exclusions.push(format!("{} tids", p.blacklist_tids.len()));
        }
        if !p.blacklist_comms.is_empty() {
            let mode = p
                .blacklist_comms
                .mode()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "invalid".to_string());
            exclusions.push(format!(
                "{} thread names ({})",
                p.blacklist_comms.len(),
                mode
            ));
        }

        if exclusions.is_empty() {
            format!("{} mode: {}", self.mode, scope)
        } else {
            format!(
                "{} mode: {} excluding {}",
                self.mode,
                scope,
                exclusions.join(", ")
            )
        }
    }
}

impl FilterConfig {
    /// Parse a TOML filter description
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read a TOML filter file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read filter file: {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse filter file: {}", path.display()))
    }

    fn has_scope(&self) -> bool {
        self.mode.is_some() || self.uid.is_some() || self.pid.is_some() || self.tid.is_some()
    }

    fn only_tid(&self) -> bool {
        self.tid.is_some() && self.mode.is_none() && self.uid.is_none() && self.pid.is_none()
    }

    /// Layer `overrides` on top of `self`.
    ///
    /// A scope given in `overrides` replaces the whole scope of `self`, so a
    /// `--pid` on the command line never collides with a `uid` from a file.
    /// The exception is a bare tid, which is applied to the pid of `self`.
    /// Non-empty lists replace lists.
    pub fn merge(self, overrides: FilterConfig) -> FilterConfig {
        let (mode, uid, pid, tid) = if overrides.only_tid() {
            // A lone tid narrows the base process down to one of its threads
            let mode = match self.mode {
                Some(FilterMode::Pid) => Some(FilterMode::PidTid),
                mode => mode,
            };
            (mode, self.uid, self.pid, overrides.tid)
        } else if overrides.has_scope() {
            (overrides.mode, overrides.uid, overrides.pid, overrides.tid)
        } else {
            (self.mode, self.uid, self.pid, self.tid)
        };

        fn pick<T>(base: Vec<T>, over: Vec<T>) -> Vec<T> {
            if over.is_empty() {
                base
            } else {
                over
            }
        }

        FilterConfig {
            mode,
            uid,
            pid,
            tid,
            blacklist_pids: pick(self.blacklist_pids, overrides.blacklist_pids),
            blacklist_tids: pick(self.blacklist_tids, overrides.blacklist_tids),
            blacklist_comms: pick(self.blacklist_comms, overrides.blacklist_comms),
            comm_match: overrides.comm_match.or(self.comm_match),
        }
    }

    fn infer_mode(&self) -> Result<FilterMode, ConfigError> {
        match (self.uid, self.pid, self.tid) {
            (Some(_), Some(_), _) => Err(ConfigError::ConflictingScopes),
            (_, None, Some(_)) => Err(ConfigError::TidWithoutPid),
            (None, Some(_), Some(_)) => Ok(FilterMode::PidTid),
            (None, Some(_), None) => Ok(FilterMode::Pid),
            (Some(_), None, None) => Ok(FilterMode::Uid),
            (None, None, None) => Err(ConfigError::NoScope),
        }
    }

    /// Validate the description and build the session filter
    pub fn resolve(&self) -> Result<FilterPlan, ConfigError> {
        let mode = match self.mode {
            Some(FilterMode::Unset) => return Err(ConfigError::NoScope),
            Some(mode) => mode,
            None => self.infer_mode()?,
        };

        let require = |value: Option<u32>, field| {
            value.ok_or(ConfigError::MissingParameter { mode, field })
        };
        let forbid = |present: bool, field| {
            if present {
                Err(ConfigError::UnusedParameter { mode, field })
            } else {
                Ok(())
            }
        };
        let forbid_list = |present: bool, field| {
            if present {
                Err(ConfigError::UnusedBlacklist { mode, field })
            } else {
                Ok(())
            }
        };

        let params = match mode {
            FilterMode::Uid => {
                let uid = require(self.uid, "uid")?;
                forbid(self.pid.is_some(), "pid")?;
                forbid(self.tid.is_some(), "tid")?;
                let params = self.push_pids(FilterParameters::uid(uid))?;
                let params = self.push_tids(params)?;
                self.push_comms(params)?
            }
            FilterMode::Pid => {
                let pid = require(self.pid, "pid")?;
                forbid(self.uid.is_some(), "uid")?;
                forbid(self.tid.is_some(), "tid")?;
                forbid_list(!self.blacklist_pids.is_empty(), "blacklist_pids")?;
                let params = self.push_tids(FilterParameters::pid(pid))?;
                self.push_comms(params)?
            }
            FilterMode::PidTid => {
                let pid = require(self.pid, "pid")?;
                let tid = require(self.tid, "tid")?;
                forbid(self.uid.is_some(), "uid")?;
                forbid_list(!self.blacklist_pids.is_empty(), "blacklist_pids")?;
                forbid_list(!self.blacklist_tids.is_empty(), "blacklist_tids")?;
                forbid_list(!self.blacklist_comms.is_empty(), "blacklist_comms")?;
                FilterParameters::pid_tid(pid, tid)
            }
            FilterMode::Unset => return Err(ConfigError::NoScope),
        };

        Ok(FilterPlan { mode, params })
    }

    fn push_pids(&self, mut params: FilterParameters) -> Result<FilterParameters, ConfigError> {
        for &pid in &self.blacklist_pids {
            params = params
                .blacklist_pid(pid)
                .map_err(|source| ConfigError::Capacity {
                    field: "blacklist_pids",
                    source,
                })?;
        }
        Ok(params)
    }

    fn push_tids(&self, mut params: FilterParameters) -> Result<FilterParameters, ConfigError> {
        for &tid in &self.blacklist_tids {
            params = params
                .blacklist_tid(tid)
                .map_err(|source| ConfigError::Capacity {
                    field: "blacklist_tids",
                    source,
                })?;
        }
        Ok(params)
    }

    fn push_comms(&self, params: FilterParameters) -> Result<FilterParameters, ConfigError> {
        let mut params = params.comm_match(self.comm_match.unwrap_or_default());
        for name in &self.blacklist_comms {
            let pattern =
                CommPattern::new(name.as_bytes()).map_err(|source| ConfigError::Pattern {
                    pattern: name.clone(),
                    source,
                })?;
            params = params
                .blacklist_comm(pattern)
                .map_err(|source| ConfigError::Capacity {
                    field: "blacklist_comms",
                    source,
                })?;
        }
        Ok(params)
    }
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Resolved session filter
    pub plan: FilterPlan,

    /// Tracing duration
    pub duration: Duration,

    /// Optional JSON-lines output path for admitted events
    pub json_output: Option<PathBuf>,

    /// Optional JSON output path for the end-of-session summary
    pub summary_output: Option<PathBuf>,

    /// Perf buffer pages per CPU (None = aya default)
    pub perf_pages: Option<usize>,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.plan.mode == FilterMode::Unset {
            anyhow::bail!("A filter mode must be configured");
        }

        if self.duration.is_zero() {
            anyhow::bail!("Duration must be greater than 0");
        }

        if let Some(pages) = self.perf_pages {
            if !pages.is_power_of_two() {
                anyhow::bail!("Perf buffer page count must be a power of two, got {}", pages);
            }
        }

        Ok(())
    }
}
