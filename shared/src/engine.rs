//! Admission engine
//!
//! Decides, for every observed event, whether it is captured or dropped.
//! This runs inline on the hot path of every traced syscall, both inside the
//! eBPF program and in userspace, so it must stay a pure function without
//! allocation or logging. Loops are bounded by the fixed capacities of the
//! exclusion sets.
//!
//! Evaluation order:
//!
//! 1. the tracer's own process is always rejected;
//! 2. the session mode selects exactly one scope, `Unset` rejects;
//! 3. a missing filter record rejects;
//! 4. the event must fall inside the scope;
//! 5. the scope's blacklists may still veto it.

use crate::types::{EventContext, FilterMode, FilterParameters, SessionConfig};

/// Why an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The event came from the tracer itself
    SelfTraced,
    /// No filter mode is configured
    ModeUnset,
    /// The filter record has not been written
    ParametersMissing,
    /// The event does not belong to the configured uid/pid/thread
    OutOfScope,
    BlacklistedPid,
    BlacklistedTid,
    BlacklistedComm,
}

/// Outcome of evaluating one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub const fn is_accept(self) -> bool {
        matches!(self, Verdict::Accept)
    }

    pub const fn reject_reason(self) -> Option<RejectReason> {
        match self {
            Verdict::Accept => None,
            Verdict::Reject(reason) => Some(reason),
        }
    }
}

/// Evaluate one event against the session configuration.
#[inline(always)]
pub fn decide(
    session: &SessionConfig,
    params: Option<&FilterParameters>,
    ctx: &EventContext,
) -> Verdict {
    // Process-level self-exclusion; threads of the tracer are covered too.
    if ctx.host_pid == session.tracer.pid {
        return Verdict::Reject(RejectReason::SelfTraced);
    }

    match session.mode {
        FilterMode::Unset => Verdict::Reject(RejectReason::ModeUnset),
        FilterMode::Uid => match params {
            Some(params) => uid_scope(params, ctx),
            None => Verdict::Reject(RejectReason::ParametersMissing),
        },
        FilterMode::Pid => match params {
            Some(params) => pid_scope(params, ctx),
            None => Verdict::Reject(RejectReason::ParametersMissing),
        },
        FilterMode::PidTid => match params {
            Some(params) => pid_tid_scope(params, ctx),
            None => Verdict::Reject(RejectReason::ParametersMissing),
        },
    }
}

/// Boolean form of [`decide`], the verdict consumed by the emission path.
#[inline(always)]
pub fn should_trace(
    session: &SessionConfig,
    params: Option<&FilterParameters>,
    ctx: &EventContext,
) -> bool {
    decide(session, params, ctx).is_accept()
}

#[inline(always)]
fn uid_scope(params: &FilterParameters, ctx: &EventContext) -> Verdict {
    if ctx.uid != params.uid {
        return Verdict::Reject(RejectReason::OutOfScope);
    }
    if params.blacklist_pids.contains(ctx.host_pid) {
        return Verdict::Reject(RejectReason::BlacklistedPid);
    }
    thread_blacklists(params, ctx)
}

#[inline(always)]
fn pid_scope(params: &FilterParameters, ctx: &EventContext) -> Verdict {
    if ctx.host_pid != params.pid {
        return Verdict::Reject(RejectReason::OutOfScope);
    }
    thread_blacklists(params, ctx)
}

#[inline(always)]
fn pid_tid_scope(params: &FilterParameters, ctx: &EventContext) -> Verdict {
    // A tid is only unique together with its pid
    if ctx.host_pid == params.pid && ctx.host_tid == params.tid {
        Verdict::Accept
    } else {
        Verdict::Reject(RejectReason::OutOfScope)
    }
}

#[inline(always)]
fn thread_blacklists(params: &FilterParameters, ctx: &EventContext) -> Verdict {
    if params.blacklist_tids.contains(ctx.host_tid) {
        return Verdict::Reject(RejectReason::BlacklistedTid);
    }
    if params.blacklist_comms.matches(&ctx.comm) {
        return Verdict::Reject(RejectReason::BlacklistedComm);
    }
    Verdict::Accept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::{CommMatch, CommPattern};
    use crate::types::TracerIdentity;

    const TRACER: TracerIdentity = TracerIdentity::new(100);

    fn session(mode: FilterMode) -> SessionConfig {
        SessionConfig {
            tracer: TRACER,
            mode,
        }
    }

    fn event(pid: u32, uid: u32, tid: u32) -> EventContext {
        EventContext::new(uid, pid, tid)
    }

    #[test]
    fn test_uid_scope() {
        let params = FilterParameters::uid(1000).blacklist_pid(200).unwrap();
        let s = session(FilterMode::Uid);

        assert_eq!(
            decide(&s, Some(&params), &event(200, 1000, 201)),
            Verdict::Reject(RejectReason::BlacklistedPid)
        );
        assert_eq!(decide(&s, Some(&params), &event(300, 1000, 9)), Verdict::Accept);
        assert_eq!(
            decide(&s, Some(&params), &event(300, 999, 9)),
            Verdict::Reject(RejectReason::OutOfScope)
        );
    }

    #[test]
    fn test_uid_scope_tid_and_comm_blacklists() {
        let params = FilterParameters::uid(1000)
            .blacklist_tid(9)
            .unwrap()
            .blacklist_comm(CommPattern::new(b"HeapTask").unwrap())
            .unwrap()
            .comm_match(CommMatch::Prefix);
        let s = session(FilterMode::Uid);

        assert_eq!(
            decide(&s, Some(&params), &event(300, 1000, 9)),
            Verdict::Reject(RejectReason::BlacklistedTid)
        );
        assert_eq!(
            decide(
                &s,
                Some(&params),
                &event(300, 1000, 10).with_comm(b"HeapTaskDaemon")
            ),
            Verdict::Reject(RejectReason::BlacklistedComm)
        );
        assert!(should_trace(
            &s,
            Some(&params),
            &event(300, 1000, 10).with_comm(b"main")
        ));
    }

    #[test]
    fn test_pid_scope() {
        let params = FilterParameters::pid(555).blacklist_tid(10).unwrap();
        let s = session(FilterMode::Pid);

        assert_eq!(
            decide(&s, Some(&params), &event(555, 0, 10)),
            Verdict::Reject(RejectReason::BlacklistedTid)
        );
        assert_eq!(decide(&s, Some(&params), &event(555, 0, 11)), Verdict::Accept);
        assert_eq!(
            decide(&s, Some(&params), &event(556, 0, 11)),
            Verdict::Reject(RejectReason::OutOfScope)
        );
    }

    #[test]
    fn test_pid_scope_ignores_pid_blacklist() {
        // The pid blacklist belongs to the uid scope only
        let params = FilterParameters::pid(555).blacklist_pid(555).unwrap();
        let s = session(FilterMode::Pid);
        assert!(should_trace(&s, Some(&params), &event(555, 0, 1)));
    }

    #[test]
    fn test_pid_tid_scope() {
        let params = FilterParameters::pid_tid(10, 20);
        let s = session(FilterMode::PidTid);

        assert_eq!(decide(&s, Some(&params), &event(10, 0, 20)), Verdict::Accept);
        assert_eq!(
            decide(&s, Some(&params), &event(10, 0, 21)),
            Verdict::Reject(RejectReason::OutOfScope)
        );
        assert_eq!(
            decide(&s, Some(&params), &event(11, 0, 20)),
            Verdict::Reject(RejectReason::OutOfScope)
        );
    }

    #[test]
    fn test_pid_tid_scope_ignores_blacklists() {
        let params = FilterParameters::pid_tid(10, 20)
            .blacklist_tid(20)
            .unwrap()
            .blacklist_comm(CommPattern::new(b"main").unwrap())
            .unwrap();
        let s = session(FilterMode::PidTid);
        assert!(should_trace(
            &s,
            Some(&params),
            &event(10, 0, 20).with_comm(b"main")
        ));
    }

    #[test]
    fn test_self_exclusion_precedes_every_mode() {
        let params = FilterParameters {
            uid: 0,
            pid: TRACER.pid,
            tid: TRACER.pid,
            ..Default::default()
        };
        let own = event(TRACER.pid, 0, TRACER.pid);
        let own_thread = event(TRACER.pid, 0, TRACER.pid + 1);

        for mode in [
            FilterMode::Unset,
            FilterMode::Uid,
            FilterMode::Pid,
            FilterMode::PidTid,
        ] {
            let s = session(mode);
            for ctx in [own, own_thread] {
                assert_eq!(
                    decide(&s, Some(&params), &ctx),
                    Verdict::Reject(RejectReason::SelfTraced)
                );
                assert_eq!(
                    decide(&s, None, &ctx),
                    Verdict::Reject(RejectReason::SelfTraced)
                );
            }
        }
    }

    #[test]
    fn test_missing_parameters_reject_in_every_mode() {
        for mode in [FilterMode::Uid, FilterMode::Pid, FilterMode::PidTid] {
            let s = session(mode);
            for ctx in [event(1, 0, 1), event(555, 1000, 10), event(10, 0, 20)] {
                assert_eq!(
                    decide(&s, None, &ctx),
                    Verdict::Reject(RejectReason::ParametersMissing)
                );
            }
        }
    }

    #[test]
    fn test_unset_mode_rejects() {
        // A zeroed record would otherwise match uid 0 / pid 0
        let params = FilterParameters::default();
        let s = session(FilterMode::from_raw(7));
        assert_eq!(s.mode, FilterMode::Unset);
        for ctx in [event(0, 0, 0), event(1, 0, 1), event(555, 1000, 10)] {
            assert_eq!(
                decide(&s, Some(&params), &ctx),
                Verdict::Reject(RejectReason::ModeUnset)
            );
        }
    }

    #[test]
    fn test_verdict_is_repeatable() {
        let params = FilterParameters::uid(1000).blacklist_pid(200).unwrap();
        let s = session(FilterMode::Uid);
        let ctx = event(300, 1000, 9);
        let first = decide(&s, Some(&params), &ctx);
        for _ in 0..16 {
            assert_eq!(decide(&s, Some(&params), &ctx), first);
        }
    }

    #[test]
    fn test_verdict_helpers() {
        assert!(Verdict::Accept.is_accept());
        assert_eq!(Verdict::Accept.reject_reason(), None);
        let rejected = Verdict::Reject(RejectReason::OutOfScope);
        assert!(!rejected.is_accept());
        assert_eq!(rejected.reject_reason(), Some(RejectReason::OutOfScope));
    }
}
