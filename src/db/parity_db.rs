// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use super::{DbColumn, SectorDb, parity_db_config::ParityDbConfig};

use anyhow::{Context as _, anyhow};
use parity_db::{CompressionType, Db, Options};
use parking_lot::Mutex;
use strum::IntoEnumIterator;
use tracing::warn;

impl DbColumn {
    fn create_column_options(compression: CompressionType) -> Vec<parity_db::ColumnOptions> {
        DbColumn::iter()
            .map(|_| parity_db::ColumnOptions {
                // records are overwritten in place, so no preimage columns
                preimage: false,
                // needed for key listing
                btree_index: true,
                compression,
                ..Default::default()
            })
            .collect()
    }
}

pub struct ParityDb {
    db: parity_db::Db,
    statistics_enabled: bool,
    // serializes read-modify-write cycles against plain writes
    write_lock: Mutex<()>,
}

impl ParityDb {
    fn to_options(path: PathBuf, config: &ParityDbConfig) -> anyhow::Result<Options> {
        let mut options = Options::with_columns(&path, DbColumn::iter().count() as u8);
        options.sync_wal = true;
        options.sync_data = true;
        options.stats = config.enable_statistics;
        options.columns = DbColumn::create_column_options(config.compression()?);
        Ok(options)
    }

    pub fn open(path: impl Into<PathBuf>, config: &ParityDbConfig) -> anyhow::Result<Self> {
        let opts = Self::to_options(path.into(), config)?;
        Ok(Self {
            db: Db::open_or_create(&opts)?,
            statistics_enabled: opts.stats,
            write_lock: Mutex::new(()),
        })
    }

    fn commit(&self, column: DbColumn, key: &[u8], value: Vec<u8>) -> anyhow::Result<()> {
        let tx = [(column as u8, key, Some(value))];
        self.db
            .commit(tx)
            .map_err(|e| anyhow!("error writing to column {column}: {e}"))
    }

    /// Database statistics, if enabled in the configuration.
    pub fn statistics(&self) -> Option<String> {
        if !self.statistics_enabled {
            return None;
        }

        let mut buf = Vec::new();
        if let Err(err) = self.db.write_stats_text(&mut buf, None) {
            warn!("Unable to write database statistics: {err}");
            return None;
        }

        match String::from_utf8(buf) {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Malformed statistics: {e}");
                None
            }
        }
    }
}

impl SectorDb for ParityDb {
    fn read_bin(&self, column: DbColumn, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.db
            .get(column as u8, key)
            .map_err(|e| anyhow!("error from column {column}: {e}"))
    }

    fn write_bin(&self, column: DbColumn, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock();
        self.commit(column, key, value.to_vec())
    }

    fn update_bin(
        &self,
        column: DbColumn,
        key: &[u8],
        f: &mut dyn FnMut(Option<Vec<u8>>) -> anyhow::Result<Vec<u8>>,
    ) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock();
        let updated = f(self.read_bin(column, key)?)?;
        self.commit(column, key, updated)
    }

    fn keys(&self, column: DbColumn) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut iter = self
            .db
            .iter(column as u8)
            .with_context(|| format!("error iterating column {column}"))?;
        iter.seek_to_first()?;
        let mut keys = vec![];
        while let Some((key, _)) = iter.next()? {
            keys.push(key);
        }
        Ok(keys)
    }
}
