//! CLI for tracegate
//!
//! Commands:
//! - trace: run a filtered syscall tracing session
//! - check: evaluate a filter against a hypothetical event without loading eBPF

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "tracegate")]
#[command(about = "tracegate - filtered eBPF syscall tracer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trace syscalls of a user, a process or a single thread
    Trace(commands::trace::TraceArgs),

    /// Show whether a filter would admit a given event
    Check(commands::check::CheckArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Trace(args) => {
            init_tracing(args.verbose);
            commands::trace::run(args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check(args) => {
            init_tracing(args.verbose);
            if commands::check::run(args)? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
