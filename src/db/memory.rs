// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{DbColumn, SectorDb};
use ahash::HashMap;
use itertools::Itertools;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory sealing database, used by tests.
#[derive(Debug, Default)]
pub struct MemoryDB {
    columns: RwLock<HashMap<DbColumn, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl SectorDb for MemoryDB {
    fn read_bin(&self, column: DbColumn, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .columns
            .read()
            .get(&column)
            .and_then(|col| col.get(key))
            .cloned())
    }

    fn write_bin(&self, column: DbColumn, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.columns
            .write()
            .entry(column)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn update_bin(
        &self,
        column: DbColumn,
        key: &[u8],
        f: &mut dyn FnMut(Option<Vec<u8>>) -> anyhow::Result<Vec<u8>>,
    ) -> anyhow::Result<()> {
        let mut columns = self.columns.write();
        let col = columns.entry(column).or_default();
        let updated = f(col.get(key).cloned())?;
        col.insert(key.to_vec(), updated);
        Ok(())
    }

    fn keys(&self, column: DbColumn) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(self
            .columns
            .read()
            .get(&column)
            .map(|col| col.keys().cloned().collect_vec())
            .unwrap_or_default())
    }
}
