// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use smart_default::SmartDefault;
use std::time::Duration;

#[serde_as]
#[derive(SmartDefault, Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long a dispatched task may run before the worker is presumed lost
    /// and the task is handed to another worker.
    #[default(Duration::from_secs(6 * 60 * 60))]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub task_timeout: Duration,
    /// Interval between checks for timed out tasks and disconnected workers.
    #[default(Duration::from_secs(5))]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sweep_interval: Duration,
}

impl SchedulerConfig {
    /// Rejects durations the sweeper cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.task_timeout.is_zero(),
            "scheduler.task_timeout must be positive"
        );
        anyhow::ensure!(
            !self.sweep_interval.is_zero(),
            "scheduler.sweep_interval must be positive"
        );
        Ok(())
    }
}
