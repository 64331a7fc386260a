//! Check command implementation
//!
//! Runs the same decision the kernel program makes, against an event given
//! on the command line. Useful for trying out a filter file before tracing.

use anyhow::Result;
use clap::Args;
use tracegate_agent::Session;
use tracegate_shared::{EventContext, Pid, Tid, TracerIdentity, Uid, Verdict};
use tracing::debug;

use super::filter::FilterArgs;
use crate::output;

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// User id of the event
    #[arg(long, default_value_t = 0)]
    pub event_uid: Uid,

    /// Process id of the event
    #[arg(long)]
    pub event_pid: Pid,

    /// Thread id of the event (defaults to the process id)
    #[arg(long)]
    pub event_tid: Option<Tid>,

    /// Thread name of the event
    #[arg(long, default_value = "")]
    pub event_comm: String,

    /// Pid of the tracer (defaults to this process)
    #[arg(long)]
    pub tracer_pid: Option<Pid>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Returns whether the event is admitted
pub fn run(args: CheckArgs) -> Result<bool> {
    let plan = args.filter.resolve()?;
    let tracer = args
        .tracer_pid
        .map(TracerIdentity::new)
        .unwrap_or_else(TracerIdentity::current);
    let session = Session::new(tracer, plan);
    debug!("Checking against {}", plan.describe());

    let ctx = event_context(&args);
    let verdict = session.admit(&ctx);
    let event = format!(
        "uid {} pid {} tid {} comm {:?}",
        ctx.uid, ctx.host_pid, ctx.host_tid, args.event_comm
    );

    match verdict {
        Verdict::Accept => output::success(&format!("{}: {}", event, verdict)),
        Verdict::Reject(_) => output::error(&format!("{}: {}", event, verdict)),
    }
    output::info(&plan.describe());

    Ok(verdict.is_accept())
}

fn event_context(args: &CheckArgs) -> EventContext {
    let tid = args.event_tid.unwrap_or(args.event_pid);
    EventContext::new(args.event_uid, args.event_pid, tid).with_comm(args.event_comm.as_bytes())
}
