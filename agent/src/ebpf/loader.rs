//! eBPF program loader
//!
//! Loads the syscall tracer object, writes the session filter into its maps
//! and attaches it to the kernel.

use std::borrow::BorrowMut;
use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{Context, Result};
use aya::{
    maps::{Array, HashMap, MapData, MapError},
    programs::{raw_trace_point::RawTracePointLinkId, RawTracePoint},
    Ebpf, EbpfLoader,
};
use tracegate_shared::{
    ConfigEntry, FilterMode, FilterParameters, TracerIdentity, CONFIG_INDEX, FILTER_KEY,
};
use tracing::{debug, info};

use crate::session::Session;

/// Environment variable overriding where the eBPF object is read from
pub const EBPF_PATH_ENV: &str = "TRACEGATE_EBPF_PATH";

pub const CONFIG_MAP: &str = "CONFIG";
pub const FILTER_MAP: &str = "FILTER";
pub const EVENTS_MAP: &str = "SYSCALL_EVENTS";

const PROGRAM_NAME: &str = "sys_enter";
const TRACEPOINT: &str = "sys_enter";

/// Storage for raw tracepoint links to keep them alive
#[derive(Default)]
pub struct RawTracepointLinks {
    links: Vec<RawTracePointLinkId>,
}

impl RawTracepointLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, link: RawTracePointLinkId) {
        self.links.push(link);
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Location of the compiled eBPF object on disk
pub fn ebpf_object_path(env_override: Option<OsString>) -> PathBuf {
    if let Some(path) = env_override {
        return PathBuf::from(path);
    }

    let profile = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("../agent-ebpf/target/bpfel-unknown-none");
    path.push(profile);
    path.push("syscall-tracer");
    path
}

/// Load the syscall tracer eBPF program
pub fn load_syscall_tracer() -> Result<Ebpf> {
    info!("Loading syscall tracer eBPF program");

    #[cfg(feature = "embed-bpf")]
    if std::env::var_os(EBPF_PATH_ENV).is_none() {
        let bpf_data = aya::include_bytes_aligned!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../agent-ebpf/target/bpfel-unknown-none/release/syscall-tracer"
        ));
        let bpf = EbpfLoader::new()
            .load(bpf_data)
            .context("Failed to load embedded eBPF program")?;
        info!("Loaded embedded syscall tracer eBPF program");
        return Ok(bpf);
    }

    let path = ebpf_object_path(std::env::var_os(EBPF_PATH_ENV));
    info!("Loading eBPF from file: {:?}", path);

    if !path.exists() {
        anyhow::bail!(
            "eBPF program file not found: {:?} (build agent-ebpf or set {})",
            path,
            EBPF_PATH_ENV
        );
    }

    let bpf = EbpfLoader::new()
        .load_file(&path)
        .context("Failed to load eBPF program from file")?;
    info!("Successfully loaded syscall tracer eBPF program");
    Ok(bpf)
}

/// Write the session into the kernel maps.
///
/// The filter record goes in before the mode, so the program never sees a
/// mode without its parameters.
pub fn install_filter(bpf: &mut Ebpf, session: &Session) -> Result<()> {
    {
        let mut filter: HashMap<_, u32, FilterParameters> = HashMap::try_from(
            bpf.map_mut(FILTER_MAP)
                .with_context(|| format!("Failed to find {} map", FILTER_MAP))?,
        )?;
        match session.params() {
            Some(params) => filter
                .insert(FILTER_KEY, *params, 0)
                .context("Failed to write filter parameters")?,
            None => remove_filter(&mut filter)?,
        }
    }

    write_config_entry(bpf, session.config_entry())?;
    info!(
        "Installed {} filter (tracer pid {})",
        session.mode(),
        session.tracer().pid
    );
    Ok(())
}

/// Reset the maps to the unconfigured state; the program then drops
/// everything until a new session is installed.
pub fn clear_filter(bpf: &mut Ebpf, tracer_pid: u32) -> Result<()> {
    write_config_entry(
        bpf,
        ConfigEntry::new(TracerIdentity::new(tracer_pid), FilterMode::Unset),
    )?;

    let mut filter: HashMap<_, u32, FilterParameters> = HashMap::try_from(
        bpf.map_mut(FILTER_MAP)
            .with_context(|| format!("Failed to find {} map", FILTER_MAP))?,
    )?;
    remove_filter(&mut filter)?;
    debug!("Cleared session filter");
    Ok(())
}

fn write_config_entry(bpf: &mut Ebpf, entry: ConfigEntry) -> Result<()> {
    let mut config: Array<_, ConfigEntry> = Array::try_from(
        bpf.map_mut(CONFIG_MAP)
            .with_context(|| format!("Failed to find {} map", CONFIG_MAP))?,
    )?;
    config
        .set(CONFIG_INDEX, entry, 0)
        .context("Failed to write session descriptor")?;
    Ok(())
}

fn remove_filter<T: BorrowMut<MapData>>(
    filter: &mut HashMap<T, u32, FilterParameters>,
) -> Result<()> {
    match filter.remove(&FILTER_KEY) {
        Ok(()) | Err(MapError::KeyNotFound) => Ok(()),
        Err(e) => Err(e).context("Failed to remove filter parameters"),
    }
}

/// Attach the syscall tracer to the `sys_enter` raw tracepoint
pub fn attach_syscall_tracer(bpf: &mut Ebpf) -> Result<RawTracepointLinks> {
    info!("Attaching syscall tracer to raw tracepoint {}", TRACEPOINT);

    let program: &mut RawTracePoint = bpf
        .program_mut(PROGRAM_NAME)
        .with_context(|| format!("Failed to find {} program", PROGRAM_NAME))?
        .try_into()
        .context("Program is not a RawTracePoint")?;

    program.load().context("Failed to load raw tracepoint program")?;

    let mut links = RawTracepointLinks::new();
    let link = program
        .attach(TRACEPOINT)
        .with_context(|| format!("Failed to attach to raw tracepoint {}", TRACEPOINT))?;
    links.add(link);

    info!("Successfully attached syscall tracer");
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path_override() {
        let path = ebpf_object_path(Some(OsString::from("/opt/tracegate/syscall-tracer")));
        assert_eq!(path, PathBuf::from("/opt/tracegate/syscall-tracer"));
    }

    #[test]
    fn test_default_object_path() {
        let path = ebpf_object_path(None);
        assert!(path.ends_with("syscall-tracer"));
        assert!(path.to_string_lossy().contains("bpfel-unknown-none"));
    }

    #[test]
    #[ignore] // Requires eBPF build artifacts and root
    fn test_load_syscall_tracer() {
        let mut bpf = load_syscall_tracer().unwrap();
        let session = Session::unconfigured(TracerIdentity::current());
        install_filter(&mut bpf, &session).unwrap();
    }
}
