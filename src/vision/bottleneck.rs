//! On-disk cache of backbone outputs for a training or validation set.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineResult;

/// Which set a cache file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BottleneckSet {
    Train,
    Validation,
}

impl BottleneckSet {
    fn file_name(self) -> &'static str {
        match self {
            Self::Train => "train_bottleneck.json",
            Self::Validation => "validation_bottleneck.json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BottleneckFile {
    backbone_id: String,
    fingerprint: String,
    vectors: Vec<Vec<f32>>,
}

/// Bottleneck cache rooted at `<workspace>/bottleneck`.
#[derive(Debug, Clone)]
pub struct BottleneckCache {
    dir: PathBuf,
}

impl BottleneckCache {
    pub fn new(workspace: &Path) -> Self {
        Self {
            dir: workspace.join("bottleneck"),
        }
    }

    pub fn path(&self, set: BottleneckSet) -> PathBuf {
        self.dir.join(set.file_name())
    }

    /// Cached vectors if the file matches both `backbone_id` and `fingerprint`.
    ///
    /// Unreadable or corrupt files are logged and treated as a miss.
    pub fn load(
        &self,
        set: BottleneckSet,
        backbone_id: &str,
        fingerprint: &str,
    ) -> Option<Vec<Vec<f32>>> {
        let path = self.path(set);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("Ignoring unreadable bottleneck cache {}: {err}", path.display());
                return None;
            }
        };
        let file: BottleneckFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(err) => {
                warn!("Ignoring corrupt bottleneck cache {}: {err}", path.display());
                return None;
            }
        };
        if file.backbone_id != backbone_id || file.fingerprint != fingerprint {
            debug!("Bottleneck cache {} is stale", path.display());
            return None;
        }
        Some(file.vectors)
    }

    pub fn store(
        &self,
        set: BottleneckSet,
        backbone_id: &str,
        fingerprint: &str,
        vectors: &[Vec<f32>],
    ) -> PipelineResult<()> {
        fs::create_dir_all(&self.dir)?;
        let file = BottleneckFile {
            backbone_id: backbone_id.to_string(),
            fingerprint: fingerprint.to_string(),
            vectors: vectors.to_vec(),
        };
        fs::write(self.path(set), serde_json::to_vec(&file)?)?;
        Ok(())
    }
}

/// Content fingerprint of an ordered labelled image set.
pub fn fingerprint<'a>(items: impl IntoIterator<Item = (&'a [u8], u32)>) -> String {
    let mut hasher = blake3::Hasher::new();
    for (bytes, label) in items {
        hasher.update(blake3::hash(bytes).as_bytes());
        hasher.update(&label.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
