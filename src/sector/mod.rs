// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod state;

pub use state::SectorState;

use cid::Cid;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use strum::{Display, EnumIter};

pub type SectorNumber = u64;
pub type DealId = u64;
pub type ChainEpoch = i64;
pub type Randomness = Vec<u8>;

/// Seal proof flavours a sector can be sealed with. Only the sector size
/// matters to the scheduler.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum RegisteredSealProof {
    StackedDrg2KiBV1,
    StackedDrg8MiBV1,
    StackedDrg512MiBV1,
    #[default]
    StackedDrg32GiBV1,
    StackedDrg64GiBV1,
}

impl RegisteredSealProof {
    /// Sector size in bytes.
    pub fn sector_size(self) -> u64 {
        match self {
            Self::StackedDrg2KiBV1 => 2 << 10,
            Self::StackedDrg8MiBV1 => 8 << 20,
            Self::StackedDrg512MiBV1 => 512 << 20,
            Self::StackedDrg32GiBV1 => 32 << 30,
            Self::StackedDrg64GiBV1 => 64 << 30,
        }
    }

    /// Maximum amount of client bytes that fit into a sector (fr32 padding
    /// takes 1/128 of the space).
    pub fn max_unpadded_bytes(self) -> u64 {
        self.sector_size() - self.sector_size() / 128
    }
}

/// A piece of data bound to a sector at packing time. Pledge pieces carry no
/// deal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub key: String,
    pub deal_id: Option<DealId>,
    /// Unpadded size in bytes.
    pub size: u64,
}

/// Location of a piece inside a sealed sector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SealedRef {
    pub sector_id: SectorNumber,
    pub offset: u64,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorLog {
    pub kind: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub trace: String,
    pub message: String,
}

impl SectorLog {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        trace: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            timestamp: u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default(),
            trace: trace.into(),
            message: message.into(),
        }
    }
}

/// Randomness drawn from the chain for the precommit proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealTicket {
    pub epoch: ChainEpoch,
    pub value: Randomness,
}

/// Interactive randomness drawn after the precommit landed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealSeed {
    pub epoch: ChainEpoch,
    pub value: Randomness,
}

/// Durable record of one sector.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorInfo {
    pub sector_id: SectorNumber,
    pub state: SectorState,
    pub proof_type: RegisteredSealProof,
    pub pieces: Vec<Piece>,
    pub deals: Vec<DealId>,
    pub comm_d: Option<Vec<u8>>,
    pub comm_r: Option<Vec<u8>>,
    pub proof: Option<Vec<u8>>,
    pub ticket: Option<SealTicket>,
    pub seed: Option<SealSeed>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub precommit_message: Option<Cid>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub commit_message: Option<Cid>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub fault_message: Option<Cid>,
    pub retries: u64,
    pub last_err: Option<String>,
    pub log: Vec<SectorLog>,
}

impl SectorInfo {
    /// A freshly opened sector in the `Empty` state.
    pub fn new(
        sector_id: SectorNumber,
        proof_type: RegisteredSealProof,
        pieces: Vec<Piece>,
    ) -> Self {
        let deals = pieces.iter().filter_map(|p| p.deal_id).collect();
        Self {
            sector_id,
            state: SectorState::Empty,
            proof_type,
            pieces,
            deals,
            comm_d: None,
            comm_r: None,
            proof: None,
            ticket: None,
            seed: None,
            precommit_message: None,
            commit_message: None,
            fault_message: None,
            retries: 0,
            last_err: None,
            log: vec![],
        }
    }

    /// Refs of every piece in this sector, keyed by piece key. Offsets are
    /// the running sum of the preceding piece sizes.
    pub fn sealed_refs(&self) -> Vec<(String, SealedRef)> {
        let mut offset = 0;
        self.pieces
            .iter()
            .map(|piece| {
                let sealed_ref = SealedRef {
                    sector_id: self.sector_id,
                    offset,
                    size: piece.size,
                };
                offset += piece.size;
                (piece.key.clone(), sealed_ref)
            })
            .collect()
    }
}
