// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr};

/// Lifecycle state of a sector.
///
/// Discriminants are part of the persisted format. Gaps are reserved for
/// future recovery (reseal) and error states, so new variants take a free
/// code instead of renumbering existing ones.
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
    FromRepr,
    Serialize,
    Deserialize,
)]
#[serde(into = "u64", try_from = "u64")]
#[repr(u64)]
pub enum SectorState {
    #[default]
    Undefined = 0,

    // happy path
    Empty = 1,
    /// Sector not sealed yet and not on chain.
    Packing = 2,
    /// Seal task finished, precommit not dispatched yet.
    Unsealed = 3,
    /// Precommit task running or precommit message on its way to the chain.
    PreCommitting = 4,
    /// Precommit landed, seed captured.
    WaitSeed = 5,
    Committing = 6,
    /// Waiting for the commit message to land on chain.
    CommitWait = 7,
    FinalizeSector = 8,
    Proving = 9,
    // 10..=12 reserved
    // 13..=19 reserved for recovery handling

    // error modes
    FailedUnrecoverable = 20,
    SealFailed = 21,
    PreCommitFailed = 22,
    SealCommitFailed = 23,
    CommitFailed = 24,
    PackingFailed = 25,
    // 26..=28 reserved

    // faults
    /// Sector data is corrupted or gone.
    Faulty = 29,
    /// Fault declaration has been submitted to the chain.
    FaultReported = 30,
    /// Fault declaration landed on chain.
    FaultedFinal = 31,
}

impl From<SectorState> for u64 {
    fn from(state: SectorState) -> Self {
        state as u64
    }
}

impl TryFrom<u64> for SectorState {
    type Error = String;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        Self::from_repr(code).ok_or_else(|| format!("unknown sector state code {code}"))
    }
}

impl SectorState {
    /// Returns `true` if the edge `self -> to` is part of the lifecycle.
    /// Administrative overrides bypass this check.
    pub fn can_transition_to(self, to: SectorState) -> bool {
        use SectorState::*;
        matches!(
            (self, to),
            (Empty, Packing)
                | (Packing, Unsealed | SealFailed | PackingFailed | FailedUnrecoverable)
                | (Unsealed, PreCommitting | PreCommitFailed | FailedUnrecoverable)
                | (PreCommitting, WaitSeed | PreCommitFailed | FailedUnrecoverable)
                | (WaitSeed, Committing | SealCommitFailed | FailedUnrecoverable)
                | (Committing, CommitWait | SealCommitFailed | FailedUnrecoverable)
                | (CommitWait, FinalizeSector | CommitFailed | FailedUnrecoverable)
                | (FinalizeSector, Proving)
                | (Proving, Faulty)
                | (Faulty, FaultReported)
                | (FaultReported, FaultedFinal | Faulty)
                | (PackingFailed, Packing | FailedUnrecoverable)
                | (SealFailed, Packing | FailedUnrecoverable)
                | (PreCommitFailed, Unsealed | PreCommitting | FailedUnrecoverable)
                | (SealCommitFailed, WaitSeed | FailedUnrecoverable)
                | (CommitFailed, CommitWait | FailedUnrecoverable)
        )
    }

    /// States no event can leave.
    pub fn is_absorbing(self) -> bool {
        matches!(
            self,
            SectorState::FaultedFinal | SectorState::FailedUnrecoverable
        )
    }

    /// Retryable failure states.
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            SectorState::SealFailed
                | SectorState::PreCommitFailed
                | SectorState::SealCommitFailed
                | SectorState::CommitFailed
                | SectorState::PackingFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;
    use SectorState::*;

    const EDGES: &[(SectorState, SectorState)] = &[
        (Empty, Packing),
        (Packing, Unsealed),
        (Packing, SealFailed),
        (Packing, PackingFailed),
        (Packing, FailedUnrecoverable),
        (Unsealed, PreCommitting),
        (Unsealed, PreCommitFailed),
        (Unsealed, FailedUnrecoverable),
        (PreCommitting, WaitSeed),
        (PreCommitting, PreCommitFailed),
        (PreCommitting, FailedUnrecoverable),
        (WaitSeed, Committing),
        (WaitSeed, SealCommitFailed),
        (WaitSeed, FailedUnrecoverable),
        (Committing, CommitWait),
        (Committing, SealCommitFailed),
        (Committing, FailedUnrecoverable),
        (CommitWait, FinalizeSector),
        (CommitWait, CommitFailed),
        (CommitWait, FailedUnrecoverable),
        (FinalizeSector, Proving),
        (Proving, Faulty),
        (Faulty, FaultReported),
        (FaultReported, FaultedFinal),
        (FaultReported, Faulty),
        (PackingFailed, Packing),
        (PackingFailed, FailedUnrecoverable),
        (SealFailed, Packing),
        (SealFailed, FailedUnrecoverable),
        (PreCommitFailed, Unsealed),
        (PreCommitFailed, PreCommitting),
        (PreCommitFailed, FailedUnrecoverable),
        (SealCommitFailed, WaitSeed),
        (SealCommitFailed, FailedUnrecoverable),
        (CommitFailed, CommitWait),
        (CommitFailed, FailedUnrecoverable),
    ];

    #[test]
    fn transition_table_is_exhaustive() {
        for from in SectorState::iter() {
            for to in SectorState::iter() {
                assert_eq!(
                    from.can_transition_to(to),
                    EDGES.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn absorbing_states_have_no_exits() {
        for from in SectorState::iter().filter(|s| s.is_absorbing()) {
            assert!(SectorState::iter().all(|to| !from.can_transition_to(to)));
        }
        assert!(!Proving.is_absorbing());
    }

    #[test]
    fn numeric_codes_are_stable() {
        assert_eq!(u64::from(Proving), 9);
        assert_eq!(u64::from(FailedUnrecoverable), 20);
        assert_eq!(u64::from(PackingFailed), 25);
        assert_eq!(u64::from(FaultedFinal), 31);
        assert_eq!(SectorState::try_from(5), Ok(WaitSeed));
        assert!(SectorState::try_from(10).is_err());
        assert!(SectorState::try_from(26).is_err());
    }

    #[test]
    fn serializes_as_code() {
        assert_eq!(serde_json::to_string(&CommitWait).unwrap(), "7");
        assert_eq!(serde_json::from_str::<SectorState>("29").unwrap(), Faulty);
        assert!(serde_json::from_str::<SectorState>("12").is_err());
    }
}
