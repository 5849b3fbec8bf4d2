// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use parking_lot::{RwLock, RwLockWriteGuard};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::LazyLock;

use crate::sector::SectorState;

static DEFAULT_REGISTRY: LazyLock<RwLock<Registry>> = LazyLock::new(Default::default);

pub fn default_registry<'a>() -> RwLockWriteGuard<'a, Registry> {
    DEFAULT_REGISTRY.write()
}

/// Renders the default registry in the OpenMetrics text format.
pub fn encode() -> anyhow::Result<String> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &DEFAULT_REGISTRY.read())?;
    Ok(buffer)
}

pub static SECTOR_TRANSITIONS: LazyLock<Family<SectorStateLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    default_registry().register(
        "sector_transitions",
        "Number of sector state transitions by target state",
        metric.clone(),
    );
    metric
});
pub static TASKS_DISPATCHED: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    default_registry().register(
        "worker_tasks_dispatched",
        "Number of tasks handed to remote workers",
        metric.clone(),
    );
    metric
});
pub static TASKS_REQUEUED: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    default_registry().register(
        "worker_tasks_requeued",
        "Number of tasks returned to the queue after a timeout or worker loss",
        metric.clone(),
    );
    metric
});
pub static STALE_TASK_RESULTS: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    default_registry().register(
        "worker_stale_results",
        "Number of worker results rejected for unknown task identifiers",
        metric.clone(),
    );
    metric
});

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SectorStateLabel {
    state: String,
}

impl From<SectorState> for SectorStateLabel {
    fn from(state: SectorState) -> Self {
        Self {
            state: state.to_string(),
        }
    }
}
