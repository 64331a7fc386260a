//! tracegate agent library
//!
//! The control plane of a tracing session: resolves the operator's filter,
//! installs it into the eBPF program's maps before attaching, collects the
//! admitted events and writes the output.

pub mod collector;
pub mod config;
pub mod ebpf;
pub mod output;
pub mod session;

pub use config::{Config, ConfigError, FilterConfig, FilterPlan};
pub use session::Session;

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracegate_shared::{SyscallEventBpf, TracerIdentity};
use tracing::{debug, info, warn};

use collector::syscall::{SyscallCollector, TraceSummary};

/// Per-CPU read buffers handed to the perf reader
const READ_BUFFERS: usize = 10;

/// Run a syscall tracing session with the given configuration.
pub async fn run_trace(config: Config) -> Result<TraceSummary> {
    use aya::maps::perf::AsyncPerfEventArray;
    use aya::util::online_cpus;
    use bytes::BytesMut;
    use tokio::sync::Mutex;

    use ebpf::loader::EVENTS_MAP;
    use ebpf::syscall_tracer::SyscallTracer;

    config.validate().context("Invalid configuration")?;

    let session = Session::new(TracerIdentity::current(), config.plan);
    let filter = config.plan.describe();
    info!("Tracing syscalls for {:?}, {}", config.duration, filter);

    // 1. Load the program and install the filter, then attach
    let mut tracer = SyscallTracer::new(session)?;
    tracer.start()?;

    // 2. Set up the collector
    let mut collector = SyscallCollector::new(session, filter);
    if let Some(path) = &config.json_output {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        info!("Writing events as JSON lines to {}", path.display());
        collector = collector.with_output(Box::new(BufWriter::new(file)));
    }
    let collector = Arc::new(Mutex::new(collector));

    // 3. Spawn per-CPU reader tasks
    let bpf = tracer.bpf_mut();
    let events_map = bpf
        .take_map(EVENTS_MAP)
        .with_context(|| format!("Failed to get {} map", EVENTS_MAP))?;
    let mut perf_array = AsyncPerfEventArray::try_from(events_map)?;

    let cpus = online_cpus().map_err(|(msg, e)| anyhow::anyhow!("{}: {}", msg, e))?;
    let mut handles = Vec::new();

    for cpu_id in cpus {
        let mut buf = perf_array.open(cpu_id, config.perf_pages)?;
        let collector = collector.clone();

        handles.push(tokio::spawn(async move {
            let mut buffers = (0..READ_BUFFERS)
                .map(|_| BytesMut::with_capacity(SyscallEventBpf::SIZE + 64))
                .collect::<Vec<_>>();

            loop {
                match buf.read_events(&mut buffers).await {
                    Ok(events) => {
                        if events.lost > 0 {
                            warn!("Lost {} events on CPU {}", events.lost, cpu_id);
                        }
                        for buf_ref in buffers.iter().take(events.read) {
                            if buf_ref.len() < SyscallEventBpf::SIZE {
                                continue;
                            }
                            // Perf records carry no alignment guarantee
                            let event = unsafe {
                                std::ptr::read_unaligned(
                                    buf_ref.as_ptr() as *const SyscallEventBpf
                                )
                            };
                            let mut coll = collector.lock().await;
                            if let Err(e) = coll.process_event(&event) {
                                debug!("Error processing syscall event: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        debug!("Perf reader on CPU {} stopped: {}", cpu_id, e);
                        break;
                    }
                }
            }
        }));
    }

    // 4. Wait for the duration or Ctrl-C
    tokio::select! {
        _ = tokio::time::sleep(config.duration) => {}
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Interrupted, stopping early"),
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    }

    // 5. Cleanup
    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }
    tracer.stop();

    let mut collector = Arc::try_unwrap(collector)
        .map_err(|_| anyhow::anyhow!("Failed to unwrap Arc"))?
        .into_inner();
    collector.flush()?;

    let summary = collector.build_summary();
    info!(
        "Collected {} events from {} processes",
        summary.total_events,
        summary.processes.len()
    );

    if summary.output_errors > 0 {
        warn!(
            "{} events could not be written to the event output",
            summary.output_errors
        );
    }

    if let Some(path) = &config.summary_output {
        output::json::generate_summary_json(&summary, path)?;
    }

    Ok(summary)
}
