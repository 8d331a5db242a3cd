//! Errors shared by the pipeline, trainers, model store and predictor.

use std::path::PathBuf;

use thiserror::Error;

use crate::dataset::DatasetError;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// No model artifact exists at the requested path.
    #[error("Model artifact not found at {path}")]
    NotFound { path: PathBuf },
    /// The artifact exists but cannot be decoded.
    #[error("Corrupt model artifact {path}: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },
    /// A column is missing or has a different type than the fitted pipeline expects.
    #[error("Schema mismatch for column '{column}': expected {expected}, found {found}")]
    SchemaMismatch {
        column: String,
        expected: String,
        found: String,
    },
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),
    #[error("Degenerate dataset: {0}")]
    DegenerateDataset(String),
    #[error("Invalid trainer state transition from {from} to {to}")]
    InvalidState { from: String, to: String },
    #[error("Training failed: {0}")]
    Training(String),
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to decode image: {0}")]
    DecodeImage(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn schema_mismatch(
        column: &str,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        Self::SchemaMismatch {
            column: column.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
