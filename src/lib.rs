// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sector lifecycle management for Filecoin storage miners.
//!
//! A [`Sealing`] service drives every sector from packing through precommit,
//! seed wait and commit to proving, delegating the heavy proof steps to
//! remote workers through its [`Scheduler`] and the chain
//! interaction to a [`ChainApi`] implementation. Sector records, including
//! their append-only event logs, live in a [`SectorStore`].

mod config;
mod db;
mod logger;
mod metrics;
mod sealing;
mod sector;
mod worker;

pub use config::{Config, LogConfig, LogValue};
pub use db::{
    DbColumn, MemoryDB, SectorDb, SectorStore, parity_db::ParityDb,
    parity_db_config::ParityDbConfig,
};
pub use logger::setup_logger;
pub use metrics::{default_registry, encode as encode_metrics};
pub use sealing::{
    ChainApi, Error, FailureCause, MsgLookup, Outcome, SectorEvent, Sealing, SealingConfig, apply,
};
pub use sector::{
    ChainEpoch, DealId, Piece, Randomness, RegisteredSealProof, SealSeed, SealTicket, SealedRef,
    SectorInfo, SectorLog, SectorNumber, SectorState,
};
pub use worker::{
    Error as WorkerError, Scheduler, SchedulerConfig, SealOutput, SealRes, TaskId, TaskInput,
    TaskKind, TaskReport, TaskRequest, WorkerCfg, WorkerHandle, WorkerId, WorkerStats, WorkerTask,
};
