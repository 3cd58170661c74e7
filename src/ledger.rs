// 📒 Run Ledger
// Append-only record of every directory that completed the full pipeline

use crate::error::Result;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// What one directory run contributed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub extraction_timestamp: String,
    pub source_directory: String,
    /// Staged rows per staging relation
    pub counts: BTreeMap<String, usize>,
}

/// A ledger row as read back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    #[serde(flatten)]
    pub record: RunRecord,
    pub loaded_at: String,
}

/// Append one row; the counts are stored as a JSON object
pub fn record_run(conn: &Connection, record: &RunRecord) -> Result<i64> {
    let counts = serde_json::to_string(&record.counts)?;
    conn.execute(
        "INSERT INTO etl_load_history (extraction_timestamp, source_directory, stage_counts)
         VALUES (?1, ?2, ?3)",
        params![record.extraction_timestamp, record.source_directory, counts],
    )?;
    let id = conn.last_insert_rowid();
    info!(
        id,
        extraction_ts = %record.extraction_timestamp,
        directory = %record.source_directory,
        relations = record.counts.len(),
        "recorded load"
    );
    Ok(id)
}

/// Every ledger row, oldest first
pub fn load_history(conn: &Connection) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, extraction_timestamp, source_directory, stage_counts, loaded_at
         FROM etl_load_history
         ORDER BY id",
    )?;
    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut entries = Vec::with_capacity(raw.len());
    for (id, extraction_timestamp, source_directory, counts, loaded_at) in raw {
        entries.push(LedgerEntry {
            id,
            record: RunRecord {
                extraction_timestamp,
                source_directory,
                counts: serde_json::from_str(&counts)?,
            },
            loaded_at,
        });
    }
    Ok(entries)
}
