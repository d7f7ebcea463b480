//! Per-document health report written after each index build

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Documents shorter than this are flagged as sparse
pub const SPARSE_CHAR_THRESHOLD: usize = 200;

/// One row of `embedding_report.csv`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRow {
    pub filename: String,
    pub category: String,
    pub meeting_date: String,
    pub title: String,
    pub tags: String,
    pub valid_from: String,
    pub valid_to: String,
    pub canonical_key: String,
    pub version_ts: String,
    /// Chunks embedded and indexed
    pub chunk_count: usize,
    /// Characters in the source document
    pub char_count: usize,
}

impl HealthRow {
    /// No indexed chunks, or too little text to be useful
    pub fn is_sparse(&self) -> bool {
        self.chunk_count == 0 || self.char_count < SPARSE_CHAR_THRESHOLD
    }
}

pub fn write_report(path: &Path, rows: &[HealthRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VaultError::Io {
            source: e,
            context: format!("Failed to create report directory: {:?}", parent),
        })?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| VaultError::Io {
        source: e,
        context: format!("Failed to write health report: {:?}", path),
    })?;
    Ok(())
}

pub fn read_report(path: &Path) -> Result<Vec<HealthRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<HealthRow>, _>>()?;
    Ok(rows)
}
