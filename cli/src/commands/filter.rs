//! Filter flags shared by `trace` and `check`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracegate_agent::{FilterConfig, FilterPlan};
use tracegate_shared::{CommMatch, FilterMode, Pid, Tid, Uid};

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// TOML filter file; flags given on the command line take precedence
    #[arg(short, long, env = "TRACEGATE_FILTER")]
    pub config: Option<PathBuf>,

    /// Filter mode (uid, pid, pid_tid); inferred from --uid/--pid/--tid when omitted
    #[arg(long)]
    pub mode: Option<FilterMode>,

    /// Trace every process owned by this user
    #[arg(short, long)]
    pub uid: Option<Uid>,

    /// Trace this process
    #[arg(short, long)]
    pub pid: Option<Pid>,

    /// Trace only this thread of --pid, or of the pid in the filter file
    #[arg(short, long)]
    pub tid: Option<Tid>,

    /// Processes to exclude (uid mode)
    #[arg(long = "blacklist-pid", value_delimiter = ',')]
    pub blacklist_pids: Vec<Pid>,

    /// Threads to exclude (uid and pid modes)
    #[arg(long = "blacklist-tid", value_delimiter = ',')]
    pub blacklist_tids: Vec<Tid>,

    /// Thread names to exclude (uid and pid modes)
    #[arg(long = "blacklist-comm", value_delimiter = ',')]
    pub blacklist_comms: Vec<String>,

    /// How thread names are compared (exact, prefix, contains)
    #[arg(long)]
    pub comm_match: Option<CommMatch>,
}

impl FilterArgs {
    /// The filter described by the flags alone
    fn overrides(&self) -> FilterConfig {
        FilterConfig {
            mode: self.mode,
            uid: self.uid,
            pid: self.pid,
            tid: self.tid,
            blacklist_pids: self.blacklist_pids.clone(),
            blacklist_tids: self.blacklist_tids.clone(),
            blacklist_comms: self.blacklist_comms.clone(),
            comm_match: self.comm_match,
        }
    }

    /// Merge the flags over the filter file and resolve the result
    pub fn resolve(&self) -> Result<FilterPlan> {
        let base = match &self.config {
            Some(path) => FilterConfig::load(path)?,
            None => FilterConfig::default(),
        };

        base.merge(self.overrides())
            .resolve()
            .context("Invalid filter")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_only() {
        let args = FilterArgs {
            pid: Some(555),
            blacklist_comms: vec!["gc".to_string()],
            ..Default::default()
        };
        let plan = args.resolve().unwrap();
        assert_eq!(plan.mode, FilterMode::Pid);
        assert_eq!(plan.params.pid, 555);
        assert_eq!(plan.params.blacklist_comms.len(), 1);
    }

    #[test]
    fn test_flags_override_file_scope() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "uid = 1000\nblacklist_pids = [7]").unwrap();

        let args = FilterArgs {
            config: Some(file.path().to_path_buf()),
            uid: Some(2000),
            ..Default::default()
        };
        let plan = args.resolve().unwrap();
        assert_eq!(plan.mode, FilterMode::Uid);
        assert_eq!(plan.params.uid, 2000);
        assert!(plan.params.blacklist_pids.contains(7));
    }

    #[test]
    fn test_tid_narrows_file_pid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pid = 300\nblacklist_tids = [7]").unwrap();

        let args = FilterArgs {
            config: Some(file.path().to_path_buf()),
            tid: Some(305),
            ..Default::default()
        };
        // Thread blacklists mean nothing for a single thread
        assert!(args.resolve().is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pid = 300").unwrap();
        let args = FilterArgs {
            config: Some(file.path().to_path_buf()),
            tid: Some(305),
            ..Default::default()
        };
        let plan = args.resolve().unwrap();
        assert_eq!(plan.mode, FilterMode::PidTid);
        assert_eq!((plan.params.pid, plan.params.tid), (300, 305));
    }

    #[test]
    fn test_missing_scope() {
        assert!(FilterArgs::default().resolve().is_err());
    }
}
