// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sector sealing pipeline.
//!
//! [`Sealing`] owns the sector drivers and the worker [`Scheduler`]. Each
//! sector with work left has exactly one driver task holding the only
//! writable copy of its record; every input to a sector, whether a worker
//! result, a chain notification or an operator override, is an event on that
//! driver's queue.

mod chain;
mod config;
mod driver;
mod errors;
mod fsm;

pub use chain::{ChainApi, MsgLookup};
pub use config::SealingConfig;
pub use errors::{Error, FailureCause};
pub use fsm::{Outcome, SectorEvent, apply};

use std::sync::Arc;

use ahash::HashMap;
use anyhow::Context as _;
use parking_lot::Mutex;
use tracing::{info, warn};

use self::driver::SectorDriver;
use crate::db::SectorStore;
use crate::sector::{Piece, SealedRef, SectorInfo, SectorNumber, SectorState};
use crate::worker::{
    self, Scheduler, SchedulerConfig, SealRes, TaskId, TaskReport, WorkerCfg, WorkerHandle,
    WorkerId, WorkerStats,
};

struct Shared<DB> {
    store: DB,
    chain: Arc<dyn ChainApi>,
    scheduler: Arc<Scheduler>,
    config: SealingConfig,
    /// Event queues of the running drivers.
    drivers: Mutex<HashMap<SectorNumber, flume::Sender<SectorEvent>>>,
    next_sector: Mutex<SectorNumber>,
    fatal: flume::Sender<anyhow::Error>,
}

pub struct Sealing<DB> {
    shared: Arc<Shared<DB>>,
    reports: flume::Receiver<TaskReport>,
    fatal: flume::Receiver<anyhow::Error>,
}

impl<DB: SectorStore + 'static> Sealing<DB> {
    pub fn new(
        store: DB,
        chain: Arc<dyn ChainApi>,
        config: SealingConfig,
        scheduler_config: SchedulerConfig,
    ) -> anyhow::Result<Self> {
        scheduler_config.validate()?;
        let next_sector = store
            .list()
            .context("listing sectors")?
            .last()
            .map_or(0, |last| last.saturating_add(1));
        let (reports_tx, reports) = flume::unbounded();
        let (fatal_tx, fatal) = flume::unbounded();
        let shared = Shared {
            store,
            chain,
            scheduler: Arc::new(Scheduler::new(scheduler_config, reports_tx)),
            config,
            drivers: Mutex::default(),
            next_sector: Mutex::new(next_sector),
            fatal: fatal_tx,
        };
        Ok(Self {
            shared: Arc::new(shared),
            reports,
            fatal,
        })
    }

    /// Resumes every unfinished sector and routes worker results until a
    /// sector store failure occurs.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.restore()?;
        let sweeper = tokio::spawn(self.shared.scheduler.clone().run());
        let result = loop {
            tokio::select! {
                Ok(report) = self.reports.recv_async() => {
                    if let Err(e) = self.route_report(report) {
                        break Err(e);
                    }
                }
                Ok(e) = self.fatal.recv_async() => break Err(e),
                else => break Ok(()),
            }
        };
        sweeper.abort();
        result
    }

    fn restore(&self) -> anyhow::Result<()> {
        let mut drivers = self.shared.drivers.lock();
        let mut resumed = 0;
        for id in self.shared.store.list()? {
            if drivers.contains_key(&id) {
                continue;
            }
            let info = self
                .shared
                .store
                .get(id)?
                .with_context(|| format!("sector {id} is listed but has no record"))?;
            if !driver::is_idle(info.state) {
                SectorDriver::spawn(&self.shared, &mut drivers, info);
                resumed += 1;
            }
        }
        info!("resumed {resumed} unfinished sectors");
        Ok(())
    }

    fn route_report(&self, report: TaskReport) -> anyhow::Result<()> {
        let TaskReport {
            task_id,
            request,
            sector,
            kind,
            result,
        } = report;
        let event = SectorEvent::TaskDone {
            request,
            kind,
            result,
        };
        match self.deliver(sector, event) {
            Ok(()) => Ok(()),
            Err(Error::Store(e)) => Err(e),
            Err(e) => {
                warn!("dropping result of task {task_id}: {e}");
                Ok(())
            }
        }
    }

    /// Queues an event for a sector, starting its driver if none runs.
    fn deliver(&self, sector: SectorNumber, event: SectorEvent) -> Result<(), Error> {
        let mut drivers = self.shared.drivers.lock();
        let event = match drivers.get(&sector) {
            Some(queue) => match queue.send(event) {
                Ok(()) => return Ok(()),
                Err(flume::SendError(event)) => event,
            },
            None => event,
        };
        let info = self
            .shared
            .store
            .get(sector)?
            .ok_or(Error::NotFound(sector))?;
        SectorDriver::spawn(&self.shared, &mut drivers, info)
            .send(event)
            .map_err(|_| anyhow::anyhow!("driver of sector {sector} exited at start"))?;
        Ok(())
    }

    /// Opens a sector holding the given pieces under a fresh number.
    pub fn new_sector(&self, pieces: Vec<Piece>) -> Result<SectorNumber, Error> {
        self.open_next(|_| pieces)
    }

    /// Opens a committed-capacity sector filled with a single pledge piece.
    pub fn pledge_sector(&self) -> Result<SectorNumber, Error> {
        let size = self.shared.config.proof_type.max_unpadded_bytes();
        self.open_next(|id| {
            vec![Piece {
                key: format!("pledge-{id}"),
                deal_id: None,
                size,
            }]
        })
    }

    /// Opens a sector under a caller-chosen number.
    pub fn start_sector(&self, id: SectorNumber, pieces: Vec<Piece>) -> Result<(), Error> {
        let mut next = self.shared.next_sector.lock();
        self.open(id, pieces)?;
        // u64::MAX stays taken, so a later allocation fails with SectorExists
        *next = (*next).max(id.saturating_add(1));
        Ok(())
    }

    fn open_next(
        &self,
        pieces: impl FnOnce(SectorNumber) -> Vec<Piece>,
    ) -> Result<SectorNumber, Error> {
        let mut next = self.shared.next_sector.lock();
        let id = *next;
        self.open(id, pieces(id))?;
        *next = id.saturating_add(1);
        Ok(id)
    }

    fn open(&self, id: SectorNumber, pieces: Vec<Piece>) -> Result<(), Error> {
        let proof_type = self.shared.config.proof_type;
        let size = pieces.iter().map(|p| p.size).fold(0, u64::saturating_add);
        let capacity = proof_type.max_unpadded_bytes();
        if size > capacity {
            return Err(Error::PiecesExceedSector { size, capacity });
        }
        if self.shared.store.get(id)?.is_some() {
            return Err(Error::SectorExists(id));
        }
        let info = SectorInfo::new(id, proof_type, pieces);
        // held across the write so a concurrent restore cannot start a
        // second driver for the new record
        let mut drivers = self.shared.drivers.lock();
        self.shared.store.put(&info)?;
        info!(
            "sector {id} opened with {} pieces and {} deals",
            info.pieces.len(),
            info.deals.len()
        );
        SectorDriver::spawn(&self.shared, &mut drivers, info);
        Ok(())
    }

    pub fn sector_status(&self, id: SectorNumber) -> Result<SectorInfo, Error> {
        self.shared.store.get(id)?.ok_or(Error::NotFound(id))
    }

    pub fn list_sectors(&self) -> Result<Vec<SectorNumber>, Error> {
        Ok(self.shared.store.list()?)
    }

    /// Locations of every finalized piece, keyed by piece key.
    pub fn sector_refs(&self) -> Result<HashMap<String, Vec<SealedRef>>, Error> {
        Ok(self.shared.store.refs()?)
    }

    /// Moves a sector to `state` regardless of the transition table and
    /// drops its queued and running worker tasks. Applied asynchronously, in
    /// order with the sector's other events.
    pub fn force_sector_state(&self, id: SectorNumber, state: SectorState) -> Result<(), Error> {
        warn!("forcing sector {id} to {state}");
        self.deliver(id, SectorEvent::Force { state })
    }

    /// Signals that the data of a proving sector is no longer accessible.
    pub fn report_fault(&self, id: SectorNumber, reason: impl Into<String>) -> Result<(), Error> {
        let info = self.sector_status(id)?;
        if info.state != SectorState::Proving {
            return Err(Error::InvalidTransition {
                from: info.state,
                to: SectorState::Faulty,
            });
        }
        self.deliver(
            id,
            SectorEvent::FaultDetected {
                reason: reason.into(),
            },
        )
    }

    pub fn register_worker(&self, cfg: WorkerCfg) -> WorkerHandle {
        self.shared.scheduler.register_worker(cfg)
    }

    pub fn disconnect_worker(&self, id: WorkerId) -> Result<(), worker::Error> {
        self.shared.scheduler.disconnect_worker(id)
    }

    /// Accepts a worker result. Results of superseded attempts are rejected
    /// with [`worker::Error::UnknownTask`] and never reach the sector.
    pub fn report_result(&self, task_id: TaskId, result: SealRes) -> Result<(), worker::Error> {
        self.shared.scheduler.report_result(task_id, result)
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.shared.scheduler.stats()
    }
}
