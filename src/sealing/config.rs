// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use smart_default::SmartDefault;
use std::time::Duration;

use crate::sector::{ChainEpoch, RegisteredSealProof};

#[serde_as]
#[derive(SmartDefault, Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(default)]
pub struct SealingConfig {
    /// Number of retries a sector gets before it is failed for good.
    #[default(5)]
    pub max_retries: u64,
    /// Pause before a failed stage is retried.
    #[default(Duration::from_secs(60))]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_delay: Duration,
    /// Epochs between precommit landing and seed drawing.
    #[default(10)]
    pub seed_delay: ChainEpoch,
    /// Epochs behind the head the ticket is drawn at.
    #[default(15)]
    pub ticket_lookback: ChainEpoch,
    /// Proof type new sectors are sealed with.
    pub proof_type: RegisteredSealProof,
}
