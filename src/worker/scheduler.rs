// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{sync::Arc, time::Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    Error, RequestId, SchedulerConfig, SealRes, TaskId, TaskReport, TaskRequest, WorkerCfg,
    WorkerHandle, WorkerId, WorkerStats,
    queue::{InFlight, TaskQueue},
    registry::WorkerRegistry,
};
use crate::{metrics, sector::SectorNumber};

#[derive(Default)]
struct Inner {
    workers: WorkerRegistry,
    queue: TaskQueue,
}

/// Matches sector task requests to registered workers.
///
/// Validated results are forwarded on the report channel given at
/// construction; the scheduler never touches sector state itself.
pub struct Scheduler {
    inner: Mutex<Inner>,
    config: SchedulerConfig,
    reports: flume::Sender<TaskReport>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, reports: flume::Sender<TaskReport>) -> Self {
        Self {
            inner: Mutex::default(),
            config,
            reports,
        }
    }

    /// Registers a worker and returns its task stream.
    pub fn register_worker(&self, cfg: WorkerCfg) -> WorkerHandle {
        let mut inner = self.inner.lock();
        let slots = cfg.slots;
        let handle = inner.workers.register(cfg);
        info!("worker {} registered with {slots} slots", handle.id);
        self.dispatch(&mut inner, Instant::now());
        handle
    }

    /// Deregisters a worker, returning its running tasks to the queue.
    pub fn disconnect_worker(&self, id: WorkerId) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if !inner.workers.remove(id) {
            return Err(Error::UnknownWorker(id));
        }
        let requeued = Self::requeue_owned(&mut inner, id);
        info!("worker {id} disconnected, {requeued} tasks requeued");
        self.dispatch(&mut inner, Instant::now());
        Ok(())
    }

    /// Enqueues a task request. At most one task per sector and kind may be
    /// queued or running at a time. Reports for the request carry the
    /// returned id whichever attempt finishes it.
    pub fn submit_task(&self, request: TaskRequest) -> Result<RequestId, Error> {
        let mut inner = self.inner.lock();
        if inner.queue.contains(request.sector, request.kind) {
            return Err(Error::DuplicateTask {
                sector: request.sector,
                kind: request.kind,
            });
        }
        debug!("queued {} task for sector {}", request.kind, request.sector);
        let id = inner.queue.submit(request);
        self.dispatch(&mut inner, Instant::now());
        Ok(id)
    }

    /// Accepts a worker result for a running attempt.
    pub fn report_result(&self, task_id: TaskId, result: SealRes) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let Some(flight) = inner.queue.finish(task_id) else {
            metrics::STALE_TASK_RESULTS.inc();
            warn!("discarding result for unknown task {task_id}");
            return Err(Error::UnknownTask(task_id));
        };
        inner.workers.release(flight.worker);
        let report = TaskReport {
            task_id,
            request: flight.queued.id,
            sector: flight.queued.request.sector,
            kind: flight.queued.request.kind,
            result,
        };
        if let Err(e) = self.reports.send(report) {
            warn!("report of task {task_id} dropped: {e}");
        }
        self.dispatch(&mut inner, Instant::now());
        Ok(())
    }

    /// Drops all queued and running tasks of a sector. Late results of the
    /// dropped attempts are rejected as unknown.
    pub fn cancel_sector(&self, sector: SectorNumber) -> usize {
        let mut inner = self.inner.lock();
        let queued = inner.queue.pending_len();
        let cancelled = inner.queue.cancel_sector(sector);
        for flight in &cancelled {
            inner.workers.release(flight.worker);
        }
        let dropped = queued - inner.queue.pending_len() + cancelled.len();
        if dropped > 0 {
            debug!("dropped {dropped} tasks of sector {sector}");
        }
        self.dispatch(&mut inner, Instant::now());
        dropped
    }

    /// Requeues tasks of disconnected workers and of workers holding a task
    /// past its deadline; the latter are deregistered. Returns the number of
    /// requeued tasks.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let mut requeued = 0;
        for worker in inner.workers.disconnected() {
            inner.workers.remove(worker);
            let count = Self::requeue_owned(&mut inner, worker);
            info!("worker {worker} stream closed, {count} tasks requeued");
            requeued += count;
        }
        // a worker that let a task time out is presumed lost, so none of its
        // tasks go back to it
        for (id, worker) in inner.queue.expired(now) {
            if !inner.workers.remove(worker) {
                continue;
            }
            let count = Self::requeue_owned(&mut inner, worker);
            warn!("task {id} timed out, worker {worker} dropped and {count} tasks requeued");
            requeued += count;
        }
        self.dispatch(&mut inner, now);
        requeued
    }

    pub fn stats(&self) -> WorkerStats {
        let inner = self.inner.lock();
        WorkerStats {
            workers: inner.workers.len(),
            total_slots: inner.workers.total_slots(),
            busy_slots: inner.workers.busy_slots(),
            queued_tasks: inner.queue.pending_len(),
            in_flight_tasks: inner.queue.in_flight_len(),
        }
    }

    /// Periodically sweeps for lost workers and timed out tasks.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        loop {
            ticker.tick().await;
            self.sweep(Instant::now());
        }
    }

    fn requeue_owned(inner: &mut Inner, worker: WorkerId) -> usize {
        let owned = inner.queue.owned_by(worker);
        let count = owned.len();
        for id in owned {
            if let Some(flight) = inner.queue.finish(id) {
                inner.queue.push_front(flight.queued);
                metrics::TASKS_REQUEUED.inc();
            }
        }
        count
    }

    /// Hands queued requests to free workers in queue order. Requests no
    /// worker qualifies for stay queued.
    fn dispatch(&self, inner: &mut Inner, now: Instant) {
        let mut pending = inner.queue.take_pending();
        let mut waiting = std::collections::VecDeque::new();
        while let Some(queued) = pending.pop_front() {
            let Some(worker) = inner.workers.select(&queued.request) else {
                waiting.push_back(queued);
                continue;
            };
            let task = inner.queue.assign(&queued.request);
            let id = task.id;
            match inner.workers.send(worker, task) {
                Ok(()) => {
                    debug!(
                        "task {id} ({} for sector {}) dispatched to worker {worker}",
                        queued.request.kind, queued.request.sector
                    );
                    metrics::TASKS_DISPATCHED.inc();
                    inner.queue.start(
                        id,
                        InFlight {
                            worker,
                            queued,
                            deadline: now + self.config.task_timeout,
                        },
                    );
                }
                Err(_) => {
                    // stream closed between selection and send
                    inner.workers.remove(worker);
                    Self::requeue_owned(inner, worker);
                    let mut front = inner.queue.take_pending();
                    front.push_back(queued);
                    front.append(&mut pending);
                    pending = front;
                }
            }
        }
        for queued in waiting.into_iter().rev() {
            inner.queue.push_front(queued);
        }
    }
}
