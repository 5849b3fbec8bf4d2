// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use parity_db::CompressionType;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// `ParityDb` configuration exposed in the sealer config file.
#[derive(SmartDefault, Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(default)]
pub struct ParityDbConfig {
    pub enable_statistics: bool,
    #[default("lz4".into())]
    pub compression_type: String,
}

impl ParityDbConfig {
    pub(in crate::db) fn compression(&self) -> anyhow::Result<CompressionType> {
        match self.compression_type.to_lowercase().as_str() {
            "none" => Ok(CompressionType::NoCompression),
            "lz4" => Ok(CompressionType::Lz4),
            "snappy" => Ok(CompressionType::Snappy),
            other => anyhow::bail!("unsupported compression type: {other}"),
        }
    }
}
