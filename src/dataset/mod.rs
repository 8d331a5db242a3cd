//! Input loaders: labelled image folders, CSV files and train/test splits.

pub mod images;
pub mod split;
pub mod tabular;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset path not found: {0}")]
    MissingPath(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("Invalid split fraction {0} (expected a value between 0 and 1)")]
    InvalidFraction(f64),
}

/// Why a single record could not be turned into a row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("missing column {index} ({name})")]
    MissingField { index: usize, name: &'static str },
    #[error("column {index} ({name}) is not a number: {value:?}")]
    InvalidNumber {
        index: usize,
        name: &'static str,
        value: String,
    },
    #[error("label column {index} ({name}) is empty")]
    MissingLabel { index: usize, name: &'static str },
}
