//! Header-prefixed CSV files mapped to typed records by column position.

use std::io::Read;
use std::path::Path;

use tracing::{info, warn};

use super::{DatasetError, RowError};

/// Malformed rows reported individually before switching to a summary count.
const DETAILED_SKIP_WARNINGS: usize = 5;

/// A record that can be built from one CSV row.
pub trait TabularRecord: Sized {
    fn from_record(record: &csv::StringRecord) -> Result<Self, RowError>;
}

/// Load every well-formed row of `path`, skipping malformed ones with a warning.
pub fn load_csv<T: TabularRecord>(path: &Path) -> Result<Vec<T>, DatasetError> {
    if !path.is_file() {
        return Err(DatasetError::MissingPath(path.to_path_buf()));
    }
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|source| DatasetError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    collect_records(reader, path)
}

/// Same as [`load_csv`] over any reader; `source` only labels log lines and errors.
pub fn read_csv<T: TabularRecord, R: Read>(input: R, source: &Path) -> Result<Vec<T>, DatasetError> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);
    collect_records(reader, source)
}

fn collect_records<T: TabularRecord, R: Read>(
    mut reader: csv::Reader<R>,
    source: &Path,
) -> Result<Vec<T>, DatasetError> {
    let mut out = Vec::new();
    let mut skipped = 0usize;
    for (idx, result) in reader.records().enumerate() {
        // Line 1 is the header.
        let line = idx + 2;
        let outcome = match result {
            Ok(record) => T::from_record(&record).map_err(|err| err.to_string()),
            Err(err) if err.is_io_error() => {
                return Err(DatasetError::Csv {
                    path: source.to_path_buf(),
                    source: err,
                });
            }
            Err(err) => Err(err.to_string()),
        };
        match outcome {
            Ok(row) => out.push(row),
            Err(reason) => {
                skipped += 1;
                if skipped <= DETAILED_SKIP_WARNINGS {
                    warn!("Skipping {} line {line}: {reason}", source.display());
                }
            }
        }
    }
    if skipped > 0 {
        warn!("Skipped {skipped} malformed rows in {}", source.display());
    }
    info!(rows = out.len(), "Loaded {}", source.display());
    Ok(out)
}

/// Text field at `index`.
pub fn text_field(
    record: &csv::StringRecord,
    index: usize,
    name: &'static str,
) -> Result<String, RowError> {
    record
        .get(index)
        .map(|value| value.trim().to_string())
        .ok_or(RowError::MissingField { index, name })
}

/// Numeric field at `index`; an empty field is a missing value (`NaN`).
pub fn number_field(
    record: &csv::StringRecord,
    index: usize,
    name: &'static str,
) -> Result<f32, RowError> {
    let raw = record
        .get(index)
        .ok_or(RowError::MissingField { index, name })?
        .trim();
    if raw.is_empty() {
        return Ok(f32::NAN);
    }
    raw.parse::<f32>().map_err(|_| RowError::InvalidNumber {
        index,
        name,
        value: raw.to_string(),
    })
}

/// Numeric label at `index`; rows without a label cannot be used.
pub fn number_label(
    record: &csv::StringRecord,
    index: usize,
    name: &'static str,
) -> Result<f32, RowError> {
    let value = number_field(record, index, name)?;
    if value.is_nan() {
        return Err(RowError::MissingLabel { index, name });
    }
    Ok(value)
}

/// Text label at `index`; rows without a label cannot be used.
pub fn text_label(
    record: &csv::StringRecord,
    index: usize,
    name: &'static str,
) -> Result<String, RowError> {
    let value = text_field(record, index, name)?;
    if value.is_empty() {
        return Err(RowError::MissingLabel { index, name });
    }
    Ok(value)
}
