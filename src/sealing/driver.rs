// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{sync::Arc, time::Duration};

use ahash::HashMap;
use anyhow::Context as _;
use cid::Cid;
use tracing::{debug, error, info, warn};

use super::{
    Shared,
    chain::{ChainApi, MsgLookup},
    fsm::{self, Outcome, SectorEvent},
};
use crate::db::SectorStore;
use crate::metrics::{self, SectorStateLabel};
use crate::sector::{ChainEpoch, SealSeed, SealTicket, SectorInfo, SectorNumber, SectorState};
use crate::worker::{RequestId, TaskInput, TaskKind, TaskRequest};

/// Sectors in these states have nothing left to do until an outside signal
/// arrives, so their driver shuts down.
pub(super) fn is_idle(state: SectorState) -> bool {
    matches!(state, SectorState::Proving | SectorState::Undefined) || state.is_absorbing()
}

/// Single writer of one sector's record.
///
/// The driver consumes the sector's event queue in order, persists every
/// applied event and runs the entry action of the state it lands in.
/// Anything that suspends (chain waits, retry timers) runs in a spawned task
/// that reports back through the queue.
pub(super) struct SectorDriver<DB> {
    shared: Arc<Shared<DB>>,
    info: SectorInfo,
    events: flume::Receiver<SectorEvent>,
    queue: flume::Sender<SectorEvent>,
    /// Request handed to the scheduler and not reported back yet. Results
    /// of any other request are stale.
    dispatched: Option<(TaskKind, RequestId)>,
}

impl<DB: SectorStore + 'static> SectorDriver<DB> {
    /// Starts a driver for `info` and registers its queue. The caller holds
    /// the driver table lock.
    pub fn spawn(
        shared: &Arc<Shared<DB>>,
        drivers: &mut HashMap<SectorNumber, flume::Sender<SectorEvent>>,
        info: SectorInfo,
    ) -> flume::Sender<SectorEvent> {
        let (tx, rx) = flume::unbounded();
        drivers.insert(info.sector_id, tx.clone());
        let driver = Self {
            shared: shared.clone(),
            info,
            events: rx,
            queue: tx.clone(),
            dispatched: None,
        };
        tokio::spawn(driver.run());
        tx
    }

    async fn run(self) {
        let shared = self.shared.clone();
        let sector = self.info.sector_id;
        if let Err(e) = self.drive().await {
            error!("sector {sector} stopped: {e:#}");
            shared.drivers.lock().remove(&sector);
            let _ = shared.fatal.send(e);
        }
    }

    async fn drive(mut self) -> anyhow::Result<()> {
        debug!(
            "sector {} driver started in {}",
            self.info.sector_id, self.info.state
        );
        let mut pending = self.enter(None);
        loop {
            while let Some(event) = pending.take() {
                pending = self.step(event)?;
            }
            if is_idle(self.info.state) && self.retire() {
                debug!(
                    "sector {} driver retired in {}",
                    self.info.sector_id, self.info.state
                );
                return Ok(());
            }
            // the driver holds a sender itself, so the queue never closes
            pending = self.events.recv_async().await.ok();
        }
    }

    /// Applies one event. Returns a follow-up event the entry action
    /// produced without suspending.
    fn step(&mut self, event: SectorEvent) -> anyhow::Result<Option<SectorEvent>> {
        let sector = self.info.sector_id;
        if let SectorEvent::TaskDone { request, kind, .. } = &event
            && self.dispatched != Some((*kind, *request))
        {
            warn!("sector {sector}: dropping result of superseded {kind} request {request}");
            return Ok(None);
        }
        let seen = self.info.log.len();
        let next = match fsm::apply(&self.info, &event, self.shared.config.max_retries) {
            Outcome::Applied(next) => next,
            Outcome::Ignored(reason) => {
                warn!("sector {sector}: {reason}");
                return Ok(None);
            }
        };
        match event {
            SectorEvent::Force { state } => {
                let cancelled = self.shared.scheduler.cancel_sector(sector);
                warn!(
                    "sector {sector} forced from {} to {state}, {cancelled} tasks cancelled",
                    self.info.state
                );
                self.dispatched = None;
            }
            SectorEvent::TaskDone { .. } => self.dispatched = None,
            _ => {}
        }
        // keeps entries appended to the stored log by other writers
        let next = self
            .shared
            .store
            .put_merged(&next, seen)
            .with_context(|| format!("persisting sector {sector}"))?;
        let from = std::mem::replace(&mut self.info, next).state;
        let to = self.info.state;
        if from != to {
            info!("sector {sector}: {from} -> {to}");
            metrics::SECTOR_TRANSITIONS
                .get_or_create(&SectorStateLabel::from(to))
                .inc();
        }
        Ok(self.enter(Some(&event)))
    }

    /// Entry action of the current state.
    fn enter(&mut self, applied: Option<&SectorEvent>) -> Option<SectorEvent> {
        use SectorState::*;

        let sector = self.info.sector_id;
        let retry_later = matches!(
            applied,
            Some(SectorEvent::FinalizeFailed { .. } | SectorEvent::ChainRejected { .. })
        );
        match self.info.state {
            Empty => Some(SectorEvent::Start),
            Packing | Committing => {
                let kind = fsm::dispatch_kind(self.info.state)?;
                self.dispatch(kind).err()
            }
            Unsealed if self.info.ticket.is_none() => {
                let chain = self.shared.chain.clone();
                let lookback = self.shared.config.ticket_lookback;
                self.spawn_waiter(async move {
                    match draw_ticket(chain.as_ref(), lookback).await {
                        Ok(ticket) => SectorEvent::TicketDrawn { ticket },
                        Err(e) => SectorEvent::DispatchFailed {
                            kind: TaskKind::PreCommit,
                            reason: format!("drawing ticket: {e:#}"),
                        },
                    }
                });
                None
            }
            Unsealed => Some(match self.dispatch(TaskKind::PreCommit) {
                Ok(()) => SectorEvent::TaskDispatched {
                    kind: TaskKind::PreCommit,
                },
                Err(failed) => failed,
            }),
            PreCommitting => match (self.info.comm_r.clone(), self.info.precommit_message) {
                (None, _) => self.dispatch(TaskKind::PreCommit).err(),
                (Some(comm_r), None) => {
                    let chain = self.shared.chain.clone();
                    self.spawn_waiter(async move {
                        match chain.submit_pre_commit(sector, &comm_r).await {
                            Ok(message) => SectorEvent::PreCommitSubmitted { message },
                            Err(e) => SectorEvent::ChainRejected {
                                reason: format!("submitting precommit: {e:#}"),
                            },
                        }
                    });
                    None
                }
                (Some(_), Some(message)) => {
                    let chain = self.shared.chain.clone();
                    let delay = self.shared.config.retry_delay;
                    let seed_delay = self.shared.config.seed_delay;
                    self.spawn_waiter(async move {
                        match wait_for_message(chain.as_ref(), message, delay).await {
                            MsgLookup::Confirmed { epoch } => {
                                let seed_epoch = epoch + seed_delay;
                                let value = keep_trying(
                                    &format!("seed at epoch {seed_epoch} for sector {sector}"),
                                    delay,
                                    || chain.seed_for_epoch(seed_epoch),
                                )
                                .await;
                                SectorEvent::PreCommitLanded {
                                    seed: SealSeed {
                                        epoch: seed_epoch,
                                        value,
                                    },
                                }
                            }
                            MsgLookup::Rejected { reason } => {
                                SectorEvent::ChainRejected { reason }
                            }
                        }
                    });
                    None
                }
            },
            WaitSeed => Some(match self.dispatch(TaskKind::Commit) {
                Ok(()) => SectorEvent::TaskDispatched {
                    kind: TaskKind::Commit,
                },
                Err(failed) => failed,
            }),
            CommitWait => match (self.info.proof.clone(), self.info.commit_message) {
                (_, Some(message)) => {
                    self.await_message(message, SectorEvent::CommitLanded);
                    None
                }
                (Some(proof), None) => {
                    let chain = self.shared.chain.clone();
                    self.spawn_waiter(async move {
                        match chain.submit_commit(sector, &proof).await {
                            Ok(message) => SectorEvent::CommitSubmitted { message },
                            Err(e) => SectorEvent::ChainRejected {
                                reason: format!("submitting commit: {e:#}"),
                            },
                        }
                    });
                    None
                }
                (None, None) => Some(SectorEvent::ChainRejected {
                    reason: "no proof to submit".into(),
                }),
            },
            FinalizeSector | Faulty if retry_later => {
                warn!(
                    "sector {sector} {} stalled, retrying in place: {}",
                    self.info.state,
                    self.info.last_err.as_deref().unwrap_or_default()
                );
                self.retry_after_delay();
                None
            }
            FinalizeSector => Some(match self.shared.store.add_refs(&self.info.sealed_refs()) {
                Ok(()) => SectorEvent::Finalized,
                Err(e) => SectorEvent::FinalizeFailed {
                    reason: format!("recording sealed refs: {e:#}"),
                },
            }),
            Faulty => {
                let chain = self.shared.chain.clone();
                self.spawn_waiter(async move {
                    match chain.declare_fault(sector).await {
                        Ok(message) => SectorEvent::FaultDeclared { message },
                        Err(e) => SectorEvent::ChainRejected {
                            reason: format!("declaring fault: {e:#}"),
                        },
                    }
                });
                None
            }
            FaultReported => match self.info.fault_message {
                Some(message) => {
                    self.await_message(message, SectorEvent::FaultLanded);
                    None
                }
                None => Some(SectorEvent::ChainRejected {
                    reason: "no fault declaration to await".into(),
                }),
            },
            state if state.is_failed() => {
                self.retry_after_delay();
                None
            }
            _ => None,
        }
    }

    /// Hands a task for the current stage to the scheduler. Returns the
    /// failure event if the task cannot be queued.
    fn dispatch(&mut self, kind: TaskKind) -> Result<(), SectorEvent> {
        if self.dispatched.is_some_and(|(running, _)| running == kind) {
            return Ok(());
        }
        let failed = move |reason: String| SectorEvent::DispatchFailed { kind, reason };
        let input = self.task_input(kind).map_err(failed)?;
        let request = TaskRequest {
            sector: self.info.sector_id,
            kind,
            proof_type: self.info.proof_type,
            input,
        };
        let id = self
            .shared
            .scheduler
            .submit_task(request)
            .map_err(|e| failed(e.to_string()))?;
        self.dispatched = Some((kind, id));
        Ok(())
    }

    fn task_input(&self, kind: TaskKind) -> Result<TaskInput, String> {
        let info = &self.info;
        let input = TaskInput {
            pieces: info.pieces.clone(),
            ..Default::default()
        };
        Ok(match kind {
            TaskKind::Seal => input,
            TaskKind::PreCommit => TaskInput {
                ticket: Some(info.ticket.clone().ok_or("ticket not drawn")?),
                comm_d: Some(info.comm_d.clone().ok_or("no CommD")?),
                ..input
            },
            TaskKind::Commit => TaskInput {
                ticket: Some(info.ticket.clone().ok_or("ticket not drawn")?),
                seed: Some(info.seed.clone().ok_or("seed not drawn")?),
                comm_d: Some(info.comm_d.clone().ok_or("no CommD")?),
                comm_r: Some(info.comm_r.clone().ok_or("no CommR")?),
                ..input
            },
        })
    }

    fn await_message(&self, message: Cid, landed: SectorEvent) {
        let chain = self.shared.chain.clone();
        let delay = self.shared.config.retry_delay;
        self.spawn_waiter(async move {
            match wait_for_message(chain.as_ref(), message, delay).await {
                MsgLookup::Confirmed { .. } => landed,
                MsgLookup::Rejected { reason } => SectorEvent::ChainRejected { reason },
            }
        });
    }

    fn retry_after_delay(&self) {
        let delay = self.shared.config.retry_delay;
        self.spawn_waiter(async move {
            tokio::time::sleep(delay).await;
            SectorEvent::Retry
        });
    }

    fn spawn_waiter<F>(&self, waiter: F)
    where
        F: Future<Output = SectorEvent> + Send + 'static,
    {
        let queue = self.queue.clone();
        let sector = self.info.sector_id;
        tokio::spawn(async move {
            let event = waiter.await;
            if queue.send(event).is_err() {
                debug!("sector {sector} driver gone, dropping event");
            }
        });
    }

    /// Deregisters the driver unless events are waiting.
    fn retire(&self) -> bool {
        let mut drivers = self.shared.drivers.lock();
        if !self.events.is_empty() {
            return false;
        }
        drivers.remove(&self.info.sector_id);
        true
    }
}

async fn draw_ticket(chain: &dyn ChainApi, lookback: ChainEpoch) -> anyhow::Result<SealTicket> {
    let epoch = (chain.chain_head().await? - lookback).max(0);
    let value = chain.seed_for_epoch(epoch).await?;
    Ok(SealTicket { epoch, value })
}

async fn wait_for_message(chain: &dyn ChainApi, message: Cid, delay: Duration) -> MsgLookup {
    keep_trying(&format!("waiting for message {message}"), delay, || {
        chain.await_confirmation(&message)
    })
    .await
}

/// Repeats a chain call until it succeeds. Chain waits have no deadline.
async fn keep_trying<T, F, Fut>(what: &str, delay: Duration, mut call: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    loop {
        match call().await {
            Ok(value) => return value,
            Err(e) => {
                warn!("{what} failed, retrying in {delay:?}: {e:#}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
