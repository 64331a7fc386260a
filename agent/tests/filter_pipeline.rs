use anyhow::Result;
use tempfile::NamedTempFile;
use tracegate_agent::collector::syscall::SyscallCollector;
use tracegate_agent::output::json;
use tracegate_agent::{FilterConfig, Session};
use tracegate_shared::{
    EventContext, FilterMode, RejectReason, SyscallEventBpf, TracerIdentity, Verdict,
};

const TRACER: u32 = 100;

fn session(toml: &str) -> Result<Session> {
    let plan = FilterConfig::from_toml_str(toml)?.resolve()?;
    Ok(Session::new(TracerIdentity::new(TRACER), plan))
}

fn event(uid: u32, pid: u32, tid: u32, comm: &str) -> EventContext {
    EventContext::new(uid, pid, tid).with_comm(comm.as_bytes())
}

#[test]
fn test_uid_session() -> Result<()> {
    let session = session("uid = 1000\nblacklist_pids = [200]")?;
    assert_eq!(session.mode(), FilterMode::Uid);

    assert_eq!(session.admit(&event(1000, 300, 300, "app")), Verdict::Accept);
    assert_eq!(
        session.admit(&event(1000, 200, 201, "app")),
        Verdict::Reject(RejectReason::BlacklistedPid)
    );
    assert_eq!(
        session.admit(&event(0, 300, 300, "app")),
        Verdict::Reject(RejectReason::OutOfScope)
    );
    assert_eq!(
        session.admit(&event(1000, TRACER, TRACER, "tracegate")),
        Verdict::Reject(RejectReason::SelfTraced)
    );
    Ok(())
}

#[test]
fn test_pid_session_with_thread_exclusions() -> Result<()> {
    let session = session(
        r#"
        pid = 300
        blacklist_tids = [302]
        blacklist_comms = ["HeapTask"]
        comm_match = "prefix"
        "#,
    )?;
    assert_eq!(session.mode(), FilterMode::Pid);

    assert!(session.admit(&event(1000, 300, 301, "main")).is_accept());
    assert_eq!(
        session.admit(&event(1000, 300, 302, "main")),
        Verdict::Reject(RejectReason::BlacklistedTid)
    );
    assert_eq!(
        session.admit(&event(1000, 300, 303, "HeapTaskDaemon")),
        Verdict::Reject(RejectReason::BlacklistedComm)
    );
    assert_eq!(
        session.admit(&event(1000, 301, 301, "main")),
        Verdict::Reject(RejectReason::OutOfScope)
    );
    Ok(())
}

#[test]
fn test_pid_tid_session() -> Result<()> {
    let session = session("pid = 300\ntid = 305")?;
    assert_eq!(session.mode(), FilterMode::PidTid);

    assert!(session.admit(&event(0, 300, 305, "worker")).is_accept());
    assert!(!session.admit(&event(0, 300, 300, "worker")).is_accept());
    Ok(())
}

#[test]
fn test_unconfigured_session_admits_nothing() {
    let session = Session::unconfigured(TracerIdentity::new(TRACER));
    assert_eq!(
        session.admit(&event(1000, 300, 300, "app")),
        Verdict::Reject(RejectReason::ModeUnset)
    );
}

#[test]
fn test_collector_pipeline() -> Result<()> {
    let session = session("uid = 1000\nblacklist_comms = [\"gc\"]")?;
    let mut collector = SyscallCollector::new(session, "uid 1000".to_string());

    for (pid, tid, comm) in [(300, 300, "app"), (300, 301, "gc"), (400, 400, "svc")] {
        let raw = SyscallEventBpf::new(1_000, 1, &event(1000, pid, tid, comm));
        collector.process_event(&raw)?;
    }

    let summary = collector.build_summary();
    assert_eq!(summary.total_events, 2);
    assert_eq!(summary.mismatched_events, 1);

    let temp_file = NamedTempFile::new()?;
    json::generate_summary_json(&summary, temp_file.path())?;
    let written = std::fs::read_to_string(temp_file.path())?;
    assert!(written.contains("\"total_events\": 2"));

    Ok(())
}
