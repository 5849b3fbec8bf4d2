// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Remote worker protocol.
//!
//! Workers register with a [`WorkerCfg`] and receive [`WorkerTask`]s over
//! their task stream until they disconnect. Each task carries everything the
//! worker needs to run one sealing step; the worker answers with a
//! [`SealRes`] for the task identifier it was given. Identifiers are fresh
//! for every dispatch attempt, so a result for an attempt that has since been
//! requeued is rejected with [`Error::UnknownTask`].

mod config;
mod queue;
mod registry;
mod scheduler;

pub use config::SchedulerConfig;
pub use scheduler::Scheduler;

use crate::sector::{Piece, RegisteredSealProof, SealSeed, SealTicket, SectorNumber};
use serde::{Deserialize, Serialize};
use strum::Display;

pub type TaskId = u64;
/// Identifies a submitted request across all of its dispatch attempts.
pub type RequestId = u64;
pub type WorkerId = u64;

/// Pipeline step a task performs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum TaskKind {
    /// Pack the pieces into the staged sector and compute `CommD`.
    Seal,
    /// Replicate the sector and compute `CommR`.
    PreCommit,
    /// Generate the seal proof from ticket and seed.
    Commit,
}

impl TaskKind {
    /// Scratch space a task needs, in multiples of the sector size.
    fn scratch_factor(self) -> u64 {
        match self {
            TaskKind::Seal => 1,
            // SDR layers plus the replica
            TaskKind::PreCommit => 12,
            TaskKind::Commit => 1,
        }
    }
}

/// Capabilities a worker declares when it registers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCfg {
    /// Free scratch space in bytes.
    pub scratch_space: u64,
    pub proof_types: Vec<RegisteredSealProof>,
    /// Number of tasks the worker runs concurrently.
    pub slots: usize,
    #[serde(default)]
    pub no_seal: bool,
    #[serde(default)]
    pub no_pre_commit: bool,
    #[serde(default)]
    pub no_commit: bool,
}

impl WorkerCfg {
    pub fn accepts(&self, request: &TaskRequest) -> bool {
        let kind_allowed = match request.kind {
            TaskKind::Seal => !self.no_seal,
            TaskKind::PreCommit => !self.no_pre_commit,
            TaskKind::Commit => !self.no_commit,
        };
        kind_allowed
            && self.proof_types.contains(&request.proof_type)
            && self.scratch_space >= request.scratch_space()
    }
}

/// Input material of a task.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInput {
    pub pieces: Vec<Piece>,
    pub ticket: Option<SealTicket>,
    pub seed: Option<SealSeed>,
    pub comm_d: Option<Vec<u8>>,
    pub comm_r: Option<Vec<u8>>,
}

/// Work requested by a sector, before it is bound to a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRequest {
    pub sector: SectorNumber,
    pub kind: TaskKind,
    pub proof_type: RegisteredSealProof,
    pub input: TaskInput,
}

impl TaskRequest {
    pub fn scratch_space(&self) -> u64 {
        self.proof_type.sector_size() * self.kind.scratch_factor()
    }
}

/// A task as delivered to a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub id: TaskId,
    pub sector: SectorNumber,
    pub kind: TaskKind,
    pub proof_type: RegisteredSealProof,
    pub input: TaskInput,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SealOutput {
    Sealed { comm_d: Vec<u8> },
    PreCommitted { comm_r: Vec<u8> },
    Committed { proof: Vec<u8> },
}

/// Result a worker reports for a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SealRes {
    Success(SealOutput),
    Failure { diagnostic: String, retryable: bool },
}

/// A validated worker result, forwarded to the owner of the sector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskReport {
    pub task_id: TaskId,
    /// Request the finished attempt belongs to.
    pub request: RequestId,
    pub sector: SectorNumber,
    pub kind: TaskKind,
    pub result: SealRes,
}

/// Task stream of a registered worker. Dropping it deregisters the worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub tasks: flume::Receiver<WorkerTask>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub workers: usize,
    pub total_slots: usize,
    pub busy_slots: usize,
    pub queued_tasks: usize,
    pub in_flight_tasks: usize,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),
    #[error("{kind} task for sector {sector} is already queued or running")]
    DuplicateTask { sector: SectorNumber, kind: TaskKind },
}
