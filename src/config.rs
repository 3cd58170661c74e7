// ⚙️ Loader Configuration
// Settings shared by every directory run; the CLI fills these from flags and env

use crate::staging::DEFAULT_BATCH_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default warehouse file when neither flag nor `TCSI_DB_PATH` is given
pub const DEFAULT_DB_PATH: &str = "tcsi.db";

/// How transform steps are grouped into transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Each step commits on success; a later failure leaves earlier steps in place
    #[default]
    PerStep,
    /// The whole sequence is one transaction, rolled back on any failure
    Atomic,
}

impl std::fmt::Display for CommitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitMode::PerStep => write!(f, "per_step"),
            CommitMode::Atomic => write!(f, "atomic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// SQLite warehouse file
    pub db_path: PathBuf,

    /// Rows between staging progress log lines
    pub batch_size: usize,

    #[serde(default)]
    pub commit_mode: CommitMode,

    /// Overrides the timestamp derived from each directory name
    #[serde(default)]
    pub extraction_timestamp: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            commit_mode: CommitMode::default(),
            extraction_timestamp: None,
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Zero is treated as the default batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size };
        self
    }

    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    pub fn with_extraction_timestamp(mut self, ts: Option<String>) -> Self {
        self.extraction_timestamp = ts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.db_path, PathBuf::from("tcsi.db"));
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.commit_mode, CommitMode::PerStep);
        assert!(config.extraction_timestamp.is_none());
    }

    #[test]
    fn test_builder() {
        let config = LoaderConfig::new()
            .with_db_path("/tmp/w.db")
            .with_batch_size(0)
            .with_commit_mode(CommitMode::Atomic)
            .with_extraction_timestamp(Some("2024-01-01T00:00:00Z".to_string()));
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.commit_mode, CommitMode::Atomic);
        assert_eq!(config.commit_mode.to_string(), "atomic");
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{"db_path": "w.db", "batch_size": 50}"#).unwrap();
        assert_eq!(config.commit_mode, CommitMode::PerStep);
        assert_eq!(config.batch_size, 50);
    }
}
