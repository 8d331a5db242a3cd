//! Saving and loading fitted pipelines as zip artifacts.
//!
//! An artifact holds three JSON entries: `manifest.json` (format and crate
//! version, task, run id), `schema.json` (the data schema the model was
//! trained against) and `pipeline.json` (the fitted pipeline).

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::FittedPipeline;
use crate::pipeline::data::Schema;

/// Current artifact layout version.
pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_ENTRY: &str = "manifest.json";
const SCHEMA_ENTRY: &str = "schema.json";
const PIPELINE_ENTRY: &str = "pipeline.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format_version: u32,
    /// Version of the crate that wrote the artifact.
    pub crate_version: String,
    /// Workflow that produced the model (`regression`, `text`, `image`).
    pub task: String,
    pub run_id: Uuid,
    pub created_at_unix: u64,
}

impl ArtifactManifest {
    fn new(task: &str) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            task: task.to_string(),
            run_id: Uuid::new_v4(),
            created_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

/// Everything read back from an artifact.
#[derive(Debug, Clone)]
pub struct SavedModel {
    pub manifest: ArtifactManifest,
    pub schema: Schema,
    pub pipeline: FittedPipeline,
}

/// Write `pipeline` and `schema` to `path`, replacing any existing artifact.
///
/// The archive is written to a temporary file next to `path` and renamed
/// into place, so readers never observe a partially written model.
pub fn save(
    path: &Path,
    task: &str,
    pipeline: &FittedPipeline,
    schema: &Schema,
) -> PipelineResult<ArtifactManifest> {
    let manifest = ArtifactManifest::new(task);
    write_archive(path, &manifest, schema, pipeline)?;
    info!(run_id = %manifest.run_id, "Saved model to {}", path.display());
    Ok(manifest)
}

/// Read an artifact written by [`save`].
///
/// A missing file is `NotFound`. An archive that cannot be read, or whose
/// pipeline is internally inconsistent, is `CorruptArtifact`.
pub fn load(path: &Path) -> PipelineResult<SavedModel> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            PipelineError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            PipelineError::ReadFile {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| corrupt(path, format!("not a zip archive: {err}")))?;

    let manifest: ArtifactManifest = read_entry(&mut archive, MANIFEST_ENTRY, path)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(corrupt(
            path,
            format!("unsupported format_version {}", manifest.format_version),
        ));
    }
    check_crate_version(&manifest.crate_version, env!("CARGO_PKG_VERSION"))
        .map_err(|reason| corrupt(path, reason))?;

    let schema = read_entry(&mut archive, SCHEMA_ENTRY, path)?;
    let pipeline: FittedPipeline = read_entry(&mut archive, PIPELINE_ENTRY, path)?;
    pipeline
        .validate()
        .map_err(|reason| corrupt(path, format!("inconsistent pipeline: {reason}")))?;
    info!(run_id = %manifest.run_id, task = %manifest.task, "Loaded model from {}", path.display());
    Ok(SavedModel {
        manifest,
        schema,
        pipeline,
    })
}

fn write_archive(
    path: &Path,
    manifest: &ArtifactManifest,
    schema: &Schema,
    pipeline: &FittedPipeline,
) -> PipelineResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    {
        let mut zip = zip::ZipWriter::new(tmp.as_file_mut());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        let entries = [
            (MANIFEST_ENTRY, serde_json::to_vec_pretty(manifest)?),
            (SCHEMA_ENTRY, serde_json::to_vec_pretty(schema)?),
            (PIPELINE_ENTRY, serde_json::to_vec(pipeline)?),
        ];
        for (name, data) in entries {
            zip.start_file(name, options).map_err(zip_io)?;
            zip.write_all(&data)?;
        }
        zip.finish().map_err(zip_io)?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn read_entry<T: DeserializeOwned>(
    archive: &mut zip::ZipArchive<File>,
    name: &str,
    path: &Path,
) -> PipelineResult<T> {
    let mut entry = archive
        .by_name(name)
        .map_err(|err| corrupt(path, format!("missing {name}: {err}")))?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(|err| corrupt(path, format!("unreadable {name}: {err}")))?;
    serde_json::from_slice(&bytes).map_err(|err| corrupt(path, format!("invalid {name}: {err}")))
}

/// Reject artifacts written by an incompatible (newer) crate version.
fn check_crate_version(saved: &str, current: &str) -> Result<(), String> {
    let saved = semver::Version::parse(saved)
        .map_err(|err| format!("invalid crate_version {saved:?}: {err}"))?;
    let current = semver::Version::parse(current)
        .map_err(|err| format!("invalid current version {current:?}: {err}"))?;
    let newer = if current.major == 0 && saved.major == 0 {
        saved.minor > current.minor
    } else {
        saved.major > current.major
    };
    if newer {
        return Err(format!(
            "artifact written by newer version {saved} (this is {current})"
        ));
    }
    Ok(())
}

fn corrupt(path: &Path, reason: String) -> PipelineError {
    PipelineError::CorruptArtifact {
        path: path.to_path_buf(),
        reason,
    }
}

fn zip_io(err: zip::result::ZipError) -> std::io::Error {
    std::io::Error::other(err.to_string())
}
