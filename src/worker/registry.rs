// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use super::{TaskRequest, WorkerCfg, WorkerHandle, WorkerId, WorkerTask};

struct WorkerEntry {
    cfg: WorkerCfg,
    tasks: flume::Sender<WorkerTask>,
    busy: usize,
}

impl WorkerEntry {
    fn has_free_slot(&self) -> bool {
        self.busy < self.cfg.slots
    }
}

/// Connected workers and their slot usage.
#[derive(Default)]
pub(super) struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerEntry>,
    next_id: WorkerId,
}

impl WorkerRegistry {
    pub fn register(&mut self, cfg: WorkerCfg) -> WorkerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = flume::unbounded();
        self.workers.insert(
            id,
            WorkerEntry {
                cfg,
                tasks: tx,
                busy: 0,
            },
        );
        WorkerHandle { id, tasks: rx }
    }

    /// Drops the worker. Its task stream ends once the worker drained it.
    pub fn remove(&mut self, id: WorkerId) -> bool {
        self.workers.remove(&id).is_some()
    }

    /// Picks the least loaded connected worker that can run the request.
    pub fn select(&self, request: &TaskRequest) -> Option<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, w)| {
                w.has_free_slot() && !w.tasks.is_disconnected() && w.cfg.accepts(request)
            })
            .min_by_key(|(id, w)| (w.busy, **id))
            .map(|(id, _)| *id)
    }

    /// Hands the task to the worker and occupies one of its slots. Returns
    /// the task back if the worker's stream is closed.
    pub fn send(&mut self, id: WorkerId, task: WorkerTask) -> Result<(), WorkerTask> {
        let Some(worker) = self.workers.get_mut(&id) else {
            return Err(task);
        };
        worker.tasks.send(task).map_err(|e| e.into_inner())?;
        worker.busy += 1;
        Ok(())
    }

    pub fn release(&mut self, id: WorkerId) {
        if let Some(worker) = self.workers.get_mut(&id) {
            worker.busy = worker.busy.saturating_sub(1);
        }
    }

    /// Workers whose task stream has been dropped.
    pub fn disconnected(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, w)| w.tasks.is_disconnected())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn total_slots(&self) -> usize {
        self.workers.values().map(|w| w.cfg.slots).sum()
    }

    pub fn busy_slots(&self) -> usize {
        self.workers.values().map(|w| w.busy).sum()
    }
}
