// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sector state machine planner.
//!
//! [`apply`] is a pure function of the current record and one event. It
//! never performs I/O; the driver persists the record it returns and runs the
//! entry action of the new state.

use cid::Cid;
use strum::IntoStaticStr;

use super::errors::FailureCause;
use crate::sector::{SealSeed, SealTicket, SectorInfo, SectorLog, SectorState};
use crate::worker::{RequestId, SealOutput, SealRes, TaskKind};

/// Notifications a sector reacts to. Worker results, chain confirmations and
/// timers all arrive through the sector's event queue as one of these.
#[derive(Clone, Debug, PartialEq, Eq, IntoStaticStr)]
pub enum SectorEvent {
    /// Open the sector for packing.
    Start,
    TicketDrawn { ticket: SealTicket },
    TaskDispatched { kind: TaskKind },
    /// The task could not be handed to the scheduler, or its inputs could
    /// not be gathered.
    DispatchFailed { kind: TaskKind, reason: String },
    /// Result of the worker task the driver submitted as `request`.
    TaskDone {
        request: RequestId,
        kind: TaskKind,
        result: SealRes,
    },
    PreCommitSubmitted { message: Cid },
    PreCommitLanded { seed: SealSeed },
    CommitSubmitted { message: Cid },
    CommitLanded,
    /// A message could not be submitted or failed on chain.
    ChainRejected { reason: String },
    Finalized,
    FinalizeFailed { reason: String },
    /// Retry timer of a failed or stalled stage fired.
    Retry,
    FaultDetected { reason: String },
    FaultDeclared { message: Cid },
    FaultLanded,
    /// Administrative override. Bypasses the transition table.
    Force { state: SectorState },
}

impl SectorEvent {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied(SectorInfo),
    /// The event does not apply to the sector in its current state.
    Ignored(String),
}

/// Computes the record resulting from `event`. An applied event appends
/// exactly one log entry.
pub fn apply(info: &SectorInfo, event: &SectorEvent, max_retries: u64) -> Outcome {
    use SectorEvent as E;
    use SectorState::*;

    let from = info.state;
    let mut next = info.clone();
    let (to, message) = match (from, event) {
        (_, E::Force { state }) => (*state, format!("forced from {from}")),
        (Empty, E::Start) => (Packing, format!("packing {} pieces", info.pieces.len())),

        (Unsealed, E::TicketDrawn { ticket }) if info.ticket.is_none() => {
            next.ticket = Some(ticket.clone());
            (Unsealed, format!("ticket drawn at epoch {}", ticket.epoch))
        }
        (Unsealed, E::TaskDispatched { kind: TaskKind::PreCommit }) if info.ticket.is_some() => {
            (PreCommitting, "precommit task dispatched".into())
        }
        (WaitSeed, E::TaskDispatched { kind: TaskKind::Commit }) => {
            (Committing, "commit task dispatched".into())
        }
        (_, E::DispatchFailed { kind, reason }) if dispatch_kind(from) == Some(*kind) => {
            let failed = if from == Packing {
                PackingFailed
            } else {
                failed_state(*kind)
            };
            fail(
                &mut next,
                failed,
                FailureCause::RetryableTaskFailure(reason.clone()),
            )
        }
        (_, E::TaskDone { kind, result, .. }) if result_kind(info) == Some(*kind) => {
            task_done(&mut next, *kind, result)
        }

        (PreCommitting, E::PreCommitSubmitted { message })
            if info.comm_r.is_some() && info.precommit_message.is_none() =>
        {
            next.precommit_message = Some(*message);
            (PreCommitting, format!("precommit submitted in message {message}"))
        }
        (PreCommitting, E::PreCommitLanded { seed }) if info.precommit_message.is_some() => {
            next.seed.get_or_insert_with(|| seed.clone());
            next.last_err = None;
            (
                WaitSeed,
                format!("precommit landed, seed drawn at epoch {}", seed.epoch),
            )
        }
        (PreCommitting, E::ChainRejected { reason }) if info.comm_r.is_some() => {
            next.precommit_message = None;
            fail(
                &mut next,
                PreCommitFailed,
                FailureCause::ChainRejection(reason.clone()),
            )
        }

        (CommitWait, E::CommitSubmitted { message }) if info.commit_message.is_none() => {
            next.commit_message = Some(*message);
            (CommitWait, format!("commit submitted in message {message}"))
        }
        (CommitWait, E::CommitLanded) if info.commit_message.is_some() => {
            next.last_err = None;
            (FinalizeSector, "commit landed".into())
        }
        (CommitWait, E::ChainRejected { reason }) => {
            next.commit_message = None;
            fail(
                &mut next,
                CommitFailed,
                FailureCause::ChainRejection(reason.clone()),
            )
        }

        (FinalizeSector, E::Finalized) => {
            next.last_err = None;
            (
                Proving,
                format!("{} sealed refs recorded", info.pieces.len()),
            )
        }
        (FinalizeSector, E::FinalizeFailed { reason }) => {
            next.last_err = Some(reason.clone());
            (FinalizeSector, format!("finalize failed: {reason}"))
        }
        (FinalizeSector | Faulty, E::Retry) => (from, "retrying in place".into()),
        (failed, E::Retry) if failed.is_failed() => retry(&mut next, max_retries),

        (Proving, E::FaultDetected { reason }) => {
            next.last_err = Some(reason.clone());
            (Faulty, format!("fault detected: {reason}"))
        }
        (Faulty, E::FaultDeclared { message }) => {
            next.fault_message = Some(*message);
            (FaultReported, format!("fault declared in message {message}"))
        }
        (Faulty, E::ChainRejected { reason }) => {
            next.last_err = Some(FailureCause::ChainRejection(reason.clone()).to_string());
            (Faulty, format!("fault declaration failed: {reason}"))
        }
        (FaultReported, E::FaultLanded) => (FaultedFinal, "fault declaration landed".into()),
        (FaultReported, E::ChainRejected { reason }) => {
            next.fault_message = None;
            next.last_err = Some(FailureCause::ChainRejection(reason.clone()).to_string());
            (Faulty, format!("fault declaration rejected: {reason}"))
        }

        _ => {
            return Outcome::Ignored(format!(
                "{} does not apply to a {from} sector",
                event.name()
            ));
        }
    };

    debug_assert!(
        from == to || matches!(event, E::Force { .. }) || from.can_transition_to(to),
        "planned {from} -> {to}"
    );
    next.state = to;
    next.log.push(SectorLog::new(
        format!("event;{}", event.name()),
        message,
        format!("{from} -> {to}"),
    ));
    Outcome::Applied(next)
}

/// Task kind a state hands to the scheduler.
pub fn dispatch_kind(state: SectorState) -> Option<TaskKind> {
    match state {
        SectorState::Packing => Some(TaskKind::Seal),
        SectorState::Unsealed | SectorState::PreCommitting => Some(TaskKind::PreCommit),
        SectorState::WaitSeed | SectorState::Committing => Some(TaskKind::Commit),
        _ => None,
    }
}

/// Task kind whose result the sector is waiting for.
fn result_kind(info: &SectorInfo) -> Option<TaskKind> {
    match info.state {
        SectorState::Packing => Some(TaskKind::Seal),
        SectorState::PreCommitting if info.comm_r.is_none() => Some(TaskKind::PreCommit),
        SectorState::Committing => Some(TaskKind::Commit),
        _ => None,
    }
}

fn failed_state(kind: TaskKind) -> SectorState {
    match kind {
        TaskKind::Seal => SectorState::SealFailed,
        TaskKind::PreCommit => SectorState::PreCommitFailed,
        TaskKind::Commit => SectorState::SealCommitFailed,
    }
}

fn fail(
    next: &mut SectorInfo,
    failed: SectorState,
    cause: FailureCause,
) -> (SectorState, String) {
    let to = match cause {
        FailureCause::UnrecoverableTaskFailure(_) => SectorState::FailedUnrecoverable,
        _ => {
            next.retries = next.retries.saturating_add(1);
            failed
        }
    };
    let message = cause.to_string();
    next.last_err = Some(message.clone());
    (to, message)
}

fn task_done(next: &mut SectorInfo, kind: TaskKind, result: &SealRes) -> (SectorState, String) {
    let output = match result {
        SealRes::Success(output) => output,
        SealRes::Failure {
            diagnostic,
            retryable,
        } => {
            let cause = if *retryable {
                FailureCause::RetryableTaskFailure(diagnostic.clone())
            } else {
                FailureCause::UnrecoverableTaskFailure(diagnostic.clone())
            };
            return fail(next, failed_state(kind), cause);
        }
    };
    let to = match (kind, output) {
        (TaskKind::Seal, SealOutput::Sealed { comm_d }) => {
            next.comm_d.get_or_insert_with(|| comm_d.clone());
            SectorState::Unsealed
        }
        (TaskKind::PreCommit, SealOutput::PreCommitted { comm_r }) => {
            next.comm_r.get_or_insert_with(|| comm_r.clone());
            SectorState::PreCommitting
        }
        (TaskKind::Commit, SealOutput::Committed { proof }) => {
            next.proof.get_or_insert_with(|| proof.clone());
            SectorState::CommitWait
        }
        _ => {
            let reason = format!("{kind} task returned the wrong output");
            let cause = FailureCause::RetryableTaskFailure(reason);
            return fail(next, failed_state(kind), cause);
        }
    };
    next.last_err = None;
    (to, format!("{kind} task done"))
}

/// `retries` already counts the failure being retried, so a sector gets
/// `max_retries` retries in total.
fn retry(next: &mut SectorInfo, max_retries: u64) -> (SectorState, String) {
    if next.retries > max_retries {
        return (
            SectorState::FailedUnrecoverable,
            format!("giving up after {} failures", next.retries),
        );
    }
    let origin = match next.state {
        SectorState::PackingFailed | SectorState::SealFailed => SectorState::Packing,
        // the precommit task must run again unless only the message failed
        SectorState::PreCommitFailed if next.comm_r.is_none() => SectorState::Unsealed,
        SectorState::PreCommitFailed => SectorState::PreCommitting,
        SectorState::SealCommitFailed => SectorState::WaitSeed,
        _ => SectorState::CommitWait,
    };
    (origin, format!("retry {} of {max_retries}", next.retries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::{Piece, RegisteredSealProof};
    use multihash_codetable::{Code, MultihashDigest};
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;
    use rstest::rstest;
    use SectorState::*;

    const MAX_RETRIES: u64 = 3;

    fn message(tag: &[u8]) -> Cid {
        Cid::new_v1(0x71, Code::Blake2b256.digest(tag))
    }

    fn failure(retryable: bool) -> SealRes {
        SealRes::Failure {
            diagnostic: "boom".into(),
            retryable,
        }
    }

    fn done(kind: TaskKind, output: SealOutput) -> SectorEvent {
        SectorEvent::TaskDone {
            request: 1,
            kind,
            result: SealRes::Success(output),
        }
    }

    fn dispatch_failed(kind: TaskKind) -> SectorEvent {
        SectorEvent::DispatchFailed {
            kind,
            reason: "full".into(),
        }
    }

    fn failed(kind: TaskKind, retryable: bool) -> SectorEvent {
        SectorEvent::TaskDone {
            request: 1,
            kind,
            result: failure(retryable),
        }
    }

    fn happy_path() -> Vec<SectorEvent> {
        vec![
            SectorEvent::Start,
            done(TaskKind::Seal, SealOutput::Sealed { comm_d: vec![1; 32] }),
            SectorEvent::TicketDrawn {
                ticket: SealTicket {
                    epoch: 85,
                    value: vec![2; 32],
                },
            },
            SectorEvent::TaskDispatched {
                kind: TaskKind::PreCommit,
            },
            done(
                TaskKind::PreCommit,
                SealOutput::PreCommitted { comm_r: vec![3; 32] },
            ),
            SectorEvent::PreCommitSubmitted {
                message: message(b"precommit"),
            },
            SectorEvent::PreCommitLanded {
                seed: SealSeed {
                    epoch: 110,
                    value: vec![4; 32],
                },
            },
            SectorEvent::TaskDispatched {
                kind: TaskKind::Commit,
            },
            done(TaskKind::Commit, SealOutput::Committed { proof: vec![5; 192] }),
            SectorEvent::CommitSubmitted {
                message: message(b"commit"),
            },
            SectorEvent::CommitLanded,
            SectorEvent::Finalized,
            SectorEvent::FaultDetected {
                reason: "disk gone".into(),
            },
            SectorEvent::FaultDeclared {
                message: message(b"fault"),
            },
            SectorEvent::FaultLanded,
        ]
    }

    fn fresh() -> SectorInfo {
        SectorInfo::new(
            1,
            RegisteredSealProof::StackedDrg2KiBV1,
            vec![Piece {
                key: "piece".into(),
                deal_id: Some(42),
                size: 1016,
            }],
        )
    }

    fn applied(info: &SectorInfo, event: &SectorEvent) -> SectorInfo {
        match apply(info, event, MAX_RETRIES) {
            Outcome::Applied(next) => next,
            Outcome::Ignored(reason) => panic!("{reason}"),
        }
    }

    /// Walks the happy path until the sector first enters `state`.
    fn at(state: SectorState) -> SectorInfo {
        let mut info = fresh();
        for event in happy_path() {
            if info.state == state {
                return info;
            }
            info = applied(&info, &event);
        }
        assert_eq!(info.state, state);
        info
    }

    #[test]
    fn happy_path_reaches_faulted_final() {
        let mut info = fresh();
        let mut states = vec![];
        for event in happy_path() {
            info = applied(&info, &event);
            states.push(info.state);
        }
        assert_eq!(
            states,
            vec![
                Packing,
                Unsealed,
                Unsealed,
                PreCommitting,
                PreCommitting,
                PreCommitting,
                WaitSeed,
                Committing,
                CommitWait,
                CommitWait,
                FinalizeSector,
                Proving,
                Faulty,
                FaultReported,
                FaultedFinal,
            ]
        );
        assert_eq!(info.log.len(), happy_path().len());
        assert_eq!(info.log[0].kind, "event;Start");
        assert_eq!(info.log[1].trace, "Packing -> Unsealed");
        assert_eq!(info.retries, 0);
        assert_eq!(info.proof, Some(vec![5; 192]));
    }

    #[rstest]
    #[case(Packing, done(TaskKind::Seal, SealOutput::Committed { proof: vec![] }), SealFailed)]
    #[case(Packing, failed(TaskKind::Seal, true), SealFailed)]
    #[case(Packing, dispatch_failed(TaskKind::Seal), PackingFailed)]
    #[case(Unsealed, dispatch_failed(TaskKind::PreCommit), PreCommitFailed)]
    #[case(PreCommitting, failed(TaskKind::PreCommit, true), PreCommitFailed)]
    #[case(WaitSeed, dispatch_failed(TaskKind::Commit), SealCommitFailed)]
    #[case(Committing, failed(TaskKind::Commit, true), SealCommitFailed)]
    #[case(Committing, failed(TaskKind::Commit, false), FailedUnrecoverable)]
    #[case(CommitWait, SectorEvent::ChainRejected { reason: "out of gas".into() }, CommitFailed)]
    fn failure_routing(
        #[case] state: SectorState,
        #[case] event: SectorEvent,
        #[case] expected: SectorState,
    ) {
        let next = applied(&at(state), &event);
        assert_eq!(next.state, expected);
        assert!(next.last_err.is_some());
        // every retryable failure is counted
        assert_eq!(next.retries, u64::from(expected != FailedUnrecoverable));
    }

    #[test]
    fn precommit_retry_target_depends_on_comm_r() {
        let task_failed = applied(&at(PreCommitting), &failed(TaskKind::PreCommit, true));
        assert_eq!(applied(&task_failed, &SectorEvent::Retry).state, Unsealed);

        let mut submitted = at(PreCommitting);
        for event in &happy_path()[4..6] {
            submitted = applied(&submitted, event);
        }
        let rejected = applied(
            &submitted,
            &SectorEvent::ChainRejected {
                reason: "bad proof".into(),
            },
        );
        assert_eq!(rejected.state, PreCommitFailed);
        assert_eq!(rejected.precommit_message, None);
        assert_eq!(
            rejected.last_err.as_deref(),
            Some("chain rejection: bad proof")
        );
        let retried = applied(&rejected, &SectorEvent::Retry);
        assert_eq!(retried.state, PreCommitting);
        assert_eq!(retried.retries, 1);
    }

    #[test]
    fn retry_ceiling_is_final() {
        let mut info = at(Packing);
        for attempt in 0..=MAX_RETRIES {
            info = applied(&info, &failed(TaskKind::Seal, true));
            assert_eq!(info.state, SealFailed);
            assert_eq!(info.retries, attempt + 1);
            info = applied(&info, &SectorEvent::Retry);
            if attempt < MAX_RETRIES {
                assert_eq!(info.state, Packing);
                assert_eq!(info.retries, attempt + 1);
            }
        }
        assert_eq!(info.state, FailedUnrecoverable);
        assert_eq!(info.retries, MAX_RETRIES + 1);
        assert_eq!(
            info.last_err.as_deref(),
            Some("retryable task failure: boom")
        );
        assert!(matches!(
            apply(&info, &SectorEvent::Retry, MAX_RETRIES),
            Outcome::Ignored(_)
        ));
    }

    #[test]
    fn success_clears_last_err() {
        let mut info = at(Packing);
        info = applied(&info, &failed(TaskKind::Seal, true));
        info = applied(&info, &SectorEvent::Retry);
        assert!(info.last_err.is_some());
        info = applied(&info, &happy_path()[1]);
        assert_eq!(info.state, Unsealed);
        assert_eq!(info.last_err, None);
        assert_eq!(info.retries, 1);
    }

    #[rstest]
    #[case(Packing, SectorEvent::CommitLanded)]
    #[case(Packing, done(TaskKind::Commit, SealOutput::Committed { proof: vec![] }))]
    #[case(Committing, done(TaskKind::Seal, SealOutput::Sealed { comm_d: vec![] }))]
    #[case(Proving, SectorEvent::Retry)]
    #[case(CommitWait, SectorEvent::Start)]
    fn stale_events_are_ignored(#[case] state: SectorState, #[case] event: SectorEvent) {
        let info = at(state);
        assert!(matches!(
            apply(&info, &event, MAX_RETRIES),
            Outcome::Ignored(_)
        ));
    }

    #[test]
    fn set_once_values_are_kept() {
        let info = at(PreCommitting);
        let info = applied(&info, &happy_path()[4]);
        // second precommit result after comm_r is known
        assert!(matches!(
            apply(
                &info,
                &done(
                    TaskKind::PreCommit,
                    SealOutput::PreCommitted { comm_r: vec![9; 32] }
                ),
                MAX_RETRIES
            ),
            Outcome::Ignored(_)
        ));
        let redrawn = SectorEvent::TicketDrawn {
            ticket: SealTicket {
                epoch: 1,
                value: vec![],
            },
        };
        assert!(matches!(
            apply(&at(Unsealed), &redrawn, MAX_RETRIES),
            Outcome::Applied(_)
        ));
        let drawn = applied(&at(Unsealed), &happy_path()[2]);
        assert!(matches!(
            apply(&drawn, &redrawn, MAX_RETRIES),
            Outcome::Ignored(_)
        ));
    }

    #[test]
    fn force_bypasses_table() {
        let info = applied(&at(Proving), &SectorEvent::Force { state: Packing });
        assert_eq!(info.state, Packing);
        let last = info.log.last().unwrap();
        assert_eq!(last.kind, "event;Force");
        assert_eq!(last.message, "forced from Proving");
        assert!(!Proving.can_transition_to(Packing));
    }

    #[test]
    fn rejected_fault_declaration_is_redeclared() {
        let info = at(FaultReported);
        let info = applied(
            &info,
            &SectorEvent::ChainRejected {
                reason: "nonce".into(),
            },
        );
        assert_eq!(info.state, Faulty);
        assert_eq!(info.fault_message, None);
        assert_eq!(applied(&info, &SectorEvent::Retry).state, Faulty);
    }

    #[derive(Clone, Debug)]
    struct Events(Vec<SectorEvent>);

    impl Arbitrary for Events {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut pool = happy_path();
            pool.extend([
                SectorEvent::Retry,
                failed(TaskKind::Seal, true),
                failed(TaskKind::PreCommit, true),
                failed(TaskKind::Commit, bool::arbitrary(g)),
                SectorEvent::DispatchFailed {
                    kind: TaskKind::PreCommit,
                    reason: "busy".into(),
                },
                SectorEvent::ChainRejected {
                    reason: "rejected".into(),
                },
                SectorEvent::FinalizeFailed {
                    reason: "io".into(),
                },
            ]);
            let len = usize::arbitrary(g) % 64;
            Events(
                (0..len)
                    .filter_map(|_| g.choose(&pool).cloned())
                    .collect(),
            )
        }
    }

    #[quickcheck]
    fn log_grows_by_prefix(events: Events) -> bool {
        let mut info = fresh();
        for event in &events.0 {
            let before = info.clone();
            match apply(&info, event, MAX_RETRIES) {
                Outcome::Applied(next) => {
                    let prefix_kept = next.log.len() == before.log.len() + 1
                        && next.log[..before.log.len()] == before.log[..];
                    let moved_on_edge = before.state == next.state
                        || before.state.can_transition_to(next.state);
                    let deals_kept = next.deals == before.deals;
                    if !(prefix_kept && moved_on_edge && deals_kept) {
                        return false;
                    }
                    info = next;
                }
                Outcome::Ignored(_) => {}
            }
            if before.state.is_absorbing() && info.state != before.state {
                return false;
            }
        }
        true
    }
}
