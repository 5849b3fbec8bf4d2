// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{collections::VecDeque, time::Instant};

use ahash::HashMap;

use super::{RequestId, TaskId, TaskKind, TaskRequest, WorkerId, WorkerTask};
use crate::sector::SectorNumber;

/// A submitted request. Its id survives requeueing.
pub(super) struct Queued {
    pub id: RequestId,
    pub request: TaskRequest,
}

pub(super) struct InFlight {
    pub worker: WorkerId,
    pub queued: Queued,
    pub deadline: Instant,
}

/// Pending requests and the attempts currently owned by workers.
pub(super) struct TaskQueue {
    pending: VecDeque<Queued>,
    in_flight: HashMap<TaskId, InFlight>,
    next_id: TaskId,
    next_request: RequestId,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: HashMap::default(),
            // 0 is never handed out
            next_id: 1,
            next_request: 1,
        }
    }
}

impl TaskQueue {
    /// Whether the sector already has a queued or running task of this kind.
    pub fn contains(&self, sector: SectorNumber, kind: TaskKind) -> bool {
        self.pending
            .iter()
            .chain(self.in_flight.values().map(|f| &f.queued))
            .any(|q| q.request.sector == sector && q.request.kind == kind)
    }

    /// Queues a new request behind the pending ones.
    pub fn submit(&mut self, request: TaskRequest) -> RequestId {
        let id = self.next_request;
        self.next_request += 1;
        self.pending.push_back(Queued { id, request });
        id
    }

    /// Requeued work goes ahead of fresh requests.
    pub fn push_front(&mut self, queued: Queued) {
        self.pending.push_front(queued);
    }

    pub fn take_pending(&mut self) -> VecDeque<Queued> {
        std::mem::take(&mut self.pending)
    }

    /// Binds a request to a fresh task identifier. The attempt is not
    /// tracked until [`TaskQueue::start`] is called.
    pub fn assign(&mut self, request: &TaskRequest) -> WorkerTask {
        let id = self.next_id;
        self.next_id += 1;
        WorkerTask {
            id,
            sector: request.sector,
            kind: request.kind,
            proof_type: request.proof_type,
            input: request.input.clone(),
        }
    }

    pub fn start(&mut self, id: TaskId, in_flight: InFlight) {
        self.in_flight.insert(id, in_flight);
    }

    pub fn finish(&mut self, id: TaskId) -> Option<InFlight> {
        self.in_flight.remove(&id)
    }

    /// Attempts past their deadline with the worker owning them.
    pub fn expired(&self, now: Instant) -> Vec<(TaskId, WorkerId)> {
        self.in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(id, f)| (*id, f.worker))
            .collect()
    }

    pub fn owned_by(&self, worker: WorkerId) -> Vec<TaskId> {
        self.in_flight
            .iter()
            .filter(|(_, f)| f.worker == worker)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Drops every queued and running task of the sector. Returns the
    /// dropped attempts so their worker slots can be released.
    pub fn cancel_sector(&mut self, sector: SectorNumber) -> Vec<InFlight> {
        self.pending.retain(|q| q.request.sector != sector);
        let ids: Vec<_> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.queued.request.sector == sector)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter_map(|id| self.finish(id)).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}
