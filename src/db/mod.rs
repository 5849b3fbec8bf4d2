// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod memory;
pub mod parity_db;
pub mod parity_db_config;

pub use memory::MemoryDB;

use crate::sector::{SealedRef, SectorInfo, SectorLog, SectorNumber};
use ahash::HashMap;
use anyhow::Context as _;
use strum::{Display, EnumIter, FromRepr};

/// Columns of the sealing database.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, FromRepr, EnumIter)]
#[repr(u8)]
pub enum DbColumn {
    /// One [`SectorInfo`] record, log included, per sector number.
    Sectors,
    /// [`SealedRef`]s of finalized sectors keyed by piece key.
    SealedRefs,
}

/// Raw column access. Implementations must make every single write atomic;
/// [`SectorDb::update_bin`] must additionally serialize concurrent updates of
/// the same key.
pub trait SectorDb: Send + Sync {
    fn read_bin(&self, column: DbColumn, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;

    fn write_bin(&self, column: DbColumn, key: &[u8], value: &[u8]) -> anyhow::Result<()>;

    /// Read-modify-write of a single key.
    fn update_bin(
        &self,
        column: DbColumn,
        key: &[u8],
        f: &mut dyn FnMut(Option<Vec<u8>>) -> anyhow::Result<Vec<u8>>,
    ) -> anyhow::Result<()>;

    /// All keys of a column, in ascending byte order.
    fn keys(&self, column: DbColumn) -> anyhow::Result<Vec<Vec<u8>>>;
}

/// Typed access to sector records. Implemented for every [`SectorDb`].
pub trait SectorStore: Send + Sync {
    fn get(&self, id: SectorNumber) -> anyhow::Result<Option<SectorInfo>>;

    /// Full overwrite of the record.
    fn put(&self, info: &SectorInfo) -> anyhow::Result<()>;

    /// Overwrites the record with `info` without losing entries appended to
    /// the stored log behind the writer's back. The first `seen` entries of
    /// `info.log` are the ones the writer last read or wrote; the rest are
    /// new and go after the stored log. Returns the record as written.
    fn put_merged(&self, info: &SectorInfo, seen: usize) -> anyhow::Result<SectorInfo>;

    /// Appends to the stored record's log. Concurrent appends, and appends
    /// racing [`SectorStore::put_merged`], are serialized.
    fn append_log(&self, id: SectorNumber, entry: SectorLog) -> anyhow::Result<()>;

    fn list(&self) -> anyhow::Result<Vec<SectorNumber>>;

    /// Records sealed refs. Refs already present under a key are not
    /// duplicated.
    fn add_refs(&self, refs: &[(String, SealedRef)]) -> anyhow::Result<()>;

    fn refs(&self) -> anyhow::Result<HashMap<String, Vec<SealedRef>>>;
}

fn sector_key(id: SectorNumber) -> [u8; 8] {
    id.to_be_bytes()
}

impl<T: ?Sized + SectorDb> SectorStore for T {
    fn get(&self, id: SectorNumber) -> anyhow::Result<Option<SectorInfo>> {
        match self.read_bin(DbColumn::Sectors, &sector_key(id))? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("malformed record for sector {id}"))?,
            )),
            None => Ok(None),
        }
    }

    fn put(&self, info: &SectorInfo) -> anyhow::Result<()> {
        self.write_bin(
            DbColumn::Sectors,
            &sector_key(info.sector_id),
            &serde_json::to_vec(info)?,
        )
    }

    fn put_merged(&self, info: &SectorInfo, seen: usize) -> anyhow::Result<SectorInfo> {
        let mut written = None;
        self.update_bin(DbColumn::Sectors, &sector_key(info.sector_id), &mut |current| {
            let mut next = info.clone();
            if let Some(bytes) = current {
                let stored: SectorInfo = serde_json::from_slice(&bytes)?;
                if stored.log.len() > seen {
                    next.log = stored.log;
                    next.log.extend(info.log.iter().skip(seen).cloned());
                }
            }
            let bytes = serde_json::to_vec(&next)?;
            written = Some(next);
            Ok(bytes)
        })?;
        written.context("record was not written")
    }

    fn append_log(&self, id: SectorNumber, entry: SectorLog) -> anyhow::Result<()> {
        let mut entry = Some(entry);
        self.update_bin(DbColumn::Sectors, &sector_key(id), &mut |current| {
            let bytes = current.with_context(|| format!("sector {id} not found"))?;
            let mut info: SectorInfo = serde_json::from_slice(&bytes)?;
            info.log.extend(entry.take());
            Ok(serde_json::to_vec(&info)?)
        })
    }

    fn list(&self) -> anyhow::Result<Vec<SectorNumber>> {
        self.keys(DbColumn::Sectors)?
            .into_iter()
            .map(|key| {
                let bytes: [u8; 8] = key
                    .as_slice()
                    .try_into()
                    .context("malformed sector key")?;
                Ok(SectorNumber::from_be_bytes(bytes))
            })
            .collect()
    }

    fn add_refs(&self, refs: &[(String, SealedRef)]) -> anyhow::Result<()> {
        for (piece_key, sealed_ref) in refs {
            self.update_bin(DbColumn::SealedRefs, piece_key.as_bytes(), &mut |current| {
                let mut existing: Vec<SealedRef> = match current {
                    Some(bytes) => serde_json::from_slice(&bytes)?,
                    None => vec![],
                };
                if !existing.contains(sealed_ref) {
                    existing.push(*sealed_ref);
                }
                Ok(serde_json::to_vec(&existing)?)
            })?;
        }
        Ok(())
    }

    fn refs(&self) -> anyhow::Result<HashMap<String, Vec<SealedRef>>> {
        let mut refs = HashMap::default();
        for key in self.keys(DbColumn::SealedRefs)? {
            let Some(bytes) = self.read_bin(DbColumn::SealedRefs, &key)? else {
                continue;
            };
            refs.insert(String::from_utf8(key)?, serde_json::from_slice(&bytes)?);
        }
        Ok(refs)
    }
}

impl<DB: ?Sized + SectorDb> SectorDb for std::sync::Arc<DB> {
    fn read_bin(&self, column: DbColumn, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.as_ref().read_bin(column, key)
    }

    fn write_bin(&self, column: DbColumn, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.as_ref().write_bin(column, key, value)
    }

    fn update_bin(
        &self,
        column: DbColumn,
        key: &[u8],
        f: &mut dyn FnMut(Option<Vec<u8>>) -> anyhow::Result<Vec<u8>>,
    ) -> anyhow::Result<()> {
        self.as_ref().update_bin(column, key, f)
    }

    fn keys(&self, column: DbColumn) -> anyhow::Result<Vec<Vec<u8>>> {
        self.as_ref().keys(column)
    }
}
