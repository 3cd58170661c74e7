// Error taxonomy for extract ingestion
//
// File-level errors (MalformedSource, UnsupportedFormat,
// MissingOptionalDependency) are reported and the directory moves on.
// TransformStepFailure aborts the remaining pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the loader
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("malformed source {path}: {reason}")]
    MalformedSource { path: PathBuf, reason: String },

    #[error("unsupported extract format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("{path} needs the `{feature}` feature, which this build does not include")]
    MissingOptionalDependency {
        path: PathBuf,
        feature: &'static str,
    },

    #[error("transform step `{step}` failed: {source}")]
    TransformStepFailure {
        step: &'static str,
        #[source]
        source: Box<IngestError>,
    },

    #[error("staging relation {relation} has no column {column}")]
    MissingColumn { relation: String, column: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        IngestError::MalformedSource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that only invalidate the current file
    pub fn is_file_scoped(&self) -> bool {
        matches!(
            self,
            IngestError::MalformedSource { .. }
                | IngestError::UnsupportedFormat(_)
                | IngestError::MissingOptionalDependency { .. }
        )
    }

    /// Name of the transform step that failed, if this error came from one
    pub fn failed_step(&self) -> Option<&'static str> {
        match self {
            IngestError::TransformStepFailure { step, .. } => Some(*step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_scoped_errors() {
        assert!(IngestError::malformed("a.csv", "no header").is_file_scoped());
        assert!(IngestError::UnsupportedFormat(PathBuf::from("a.txt")).is_file_scoped());

        let step = IngestError::TransformStepFailure {
            step: "dim_course",
            source: Box::new(IngestError::MissingColumn {
                relation: "stg_hep_courses".to_string(),
                column: "uid5_courses_res_key".to_string(),
            }),
        };
        assert!(!step.is_file_scoped());
        assert!(step.to_string().contains("dim_course"));
    }
}
