// TCSI Warehouse - Core Library
// Extract files → staging relations → dimensional warehouse, idempotently

pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod ledger;
pub mod logging;
pub mod query;
pub mod sanitize;
pub mod snapshot;
pub mod source;
pub mod staging;
pub mod transform;

// Re-export commonly used types
pub use classifier::{classify_path, parse_entity_and_year, staging_table_for, ExtractFile, ExtractFormat};
pub use config::{CommitMode, LoaderConfig};
pub use db::{open_database, setup_database, WAREHOUSE_TABLES};
pub use error::{IngestError, Result};
pub use ingest::{extraction_timestamp_for_dir, process_directory, process_sources, process_sources_with, DirectoryReport};
pub use keys::derived_key;
pub use ledger::{load_history, record_run, LedgerEntry, RunRecord};
pub use sanitize::{sanitize_header, sanitize_identifier, ColumnNamer};
pub use snapshot::{SchemaSnapshot, StagingView};
pub use source::{open_source, TabularSource};
pub use staging::{load_extract, load_source, StagedFile};
pub use transform::{run_pipeline, PipelineReport, StepOutcome, PIPELINE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
