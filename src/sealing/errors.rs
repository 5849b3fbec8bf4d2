// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

use crate::sector::{SectorNumber, SectorState};

/// Errors surfaced to callers of the sealing service.
#[derive(Debug, Error)]
pub enum Error {
    #[error("sector {0} not found")]
    NotFound(SectorNumber),
    #[error("sector cannot move from {from} to {to}")]
    InvalidTransition { from: SectorState, to: SectorState },
    #[error("sector {0} already exists")]
    SectorExists(SectorNumber),
    #[error("pieces take {size} bytes but the sector holds at most {capacity}")]
    PiecesExceedSector { size: u64, capacity: u64 },
    /// Durability failure of the sector store. Fatal to the process.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Why a sector left its stage. The `Display` output is recorded as the
/// sector's last error.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error("retryable task failure: {0}")]
    RetryableTaskFailure(String),
    #[error("unrecoverable task failure: {0}")]
    UnrecoverableTaskFailure(String),
    #[error("chain rejection: {0}")]
    ChainRejection(String),
}
