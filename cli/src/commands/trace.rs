//! Trace command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracegate_agent::collector::syscall::TraceSummary;

use super::filter::FilterArgs;
use crate::output;

/// Processes and syscalls listed in the printed summary
const TOP_N: usize = 10;

#[derive(Args, Debug)]
pub struct TraceArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Duration to trace (e.g., "30s", "5m")
    #[arg(short, long, default_value = "10s")]
    pub duration: String,

    /// Stream admitted events to this file as JSON lines
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Write the end-of-session summary to this file as JSON
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Perf buffer pages per CPU (power of two)
    #[arg(long)]
    pub perf_pages: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn run(args: TraceArgs) -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        output::warning("Not running as root; loading the eBPF program will likely fail");
    }

    let plan = args.filter.resolve()?;
    let duration = tracegate_shared::utils::parse_duration(&args.duration)
        .context("Failed to parse duration")?;

    let config = tracegate_agent::Config {
        plan,
        duration,
        json_output: args.json,
        summary_output: args.summary,
        perf_pages: args.perf_pages,
    };

    let summary = tracegate_agent::run_trace(config).await?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &TraceSummary) {
    output::success(&format!(
        "{} events traced ({})",
        summary.total_events, summary.filter
    ));
    if summary.mismatched_events > 0 {
        output::warning(&format!(
            "{} events forwarded by the kernel did not match the filter",
            summary.mismatched_events
        ));
    }
    if summary.output_errors > 0 {
        output::warning(&format!(
            "{} events could not be written to the event output",
            summary.output_errors
        ));
    }
    if summary.total_events == 0 {
        return;
    }

    output::header("Top processes");
    for process in summary.processes.iter().take(TOP_N) {
        output::row(&format!("{} ({})", process.pid, process.comm), process.count);
    }

    output::header("Top syscalls");
    for syscall in summary.syscalls.iter().take(TOP_N) {
        output::row(&syscall.syscall_id.to_string(), syscall.count);
    }
}
