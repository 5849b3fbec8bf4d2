// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use async_trait::async_trait;
use cid::Cid;

use crate::sector::{ChainEpoch, Randomness, SectorNumber};

/// Outcome of a message on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MsgLookup {
    Confirmed { epoch: ChainEpoch },
    Rejected { reason: String },
}

/// Chain client the sealing pipeline submits messages through.
///
/// `Err` results are transport failures; the caller retries them. A message
/// that made it to the chain but failed there is reported as
/// [`MsgLookup::Rejected`].
#[async_trait]
pub trait ChainApi: Send + Sync + 'static {
    async fn submit_pre_commit(&self, sector: SectorNumber, comm_r: &[u8]) -> anyhow::Result<Cid>;

    async fn submit_commit(&self, sector: SectorNumber, proof: &[u8]) -> anyhow::Result<Cid>;

    async fn declare_fault(&self, sector: SectorNumber) -> anyhow::Result<Cid>;

    /// Resolves once the message has been executed.
    async fn await_confirmation(&self, message: &Cid) -> anyhow::Result<MsgLookup>;

    /// Chain randomness at `epoch`. Resolves once the chain reached it.
    async fn seed_for_epoch(&self, epoch: ChainEpoch) -> anyhow::Result<Randomness>;

    async fn chain_head(&self) -> anyhow::Result<ChainEpoch>;
}
