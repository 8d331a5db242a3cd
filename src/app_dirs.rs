//! Project directory layout shared by the three workflows.
//!
//! Everything is anchored to one project root: `assets/` holds training data,
//! `test/` holds images for prediction and `workspace/` receives the model,
//! bottleneck caches and logs. The root is `MLPIPE_PROJECT_DIR` when set,
//! otherwise the current directory.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub const PROJECT_DIR_ENV: &str = "MLPIPE_PROJECT_DIR";
pub const CONFIG_FILE_NAME: &str = "mlpipe.toml";
pub const MODEL_FILE_NAME: &str = "model.zip";

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Unable to determine the current directory: {0}")]
    NoCurrentDir(std::io::Error),
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Well-known paths under a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the project root from the environment.
    pub fn resolve() -> Result<Self, LayoutError> {
        resolve_with(std::env::var_os(PROJECT_DIR_ENV).map(PathBuf::from))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    pub fn test_dir(&self) -> PathBuf {
        self.root.join("test")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.workspace_dir().join("logs")
    }

    pub fn model_path(&self) -> PathBuf {
        self.workspace_dir().join(MODEL_FILE_NAME)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Return the workspace directory, creating it if needed.
    pub fn ensure_workspace(&self) -> Result<PathBuf, LayoutError> {
        ensure_dir(self.workspace_dir())
    }

    /// Return the logs directory, creating it if needed.
    pub fn ensure_logs_dir(&self) -> Result<PathBuf, LayoutError> {
        ensure_dir(self.logs_dir())
    }
}

fn resolve_with(override_root: Option<PathBuf>) -> Result<ProjectLayout, LayoutError> {
    match override_root.filter(|path| !path.as_os_str().is_empty()) {
        Some(root) => Ok(ProjectLayout::new(root)),
        None => std::env::current_dir()
            .map(ProjectLayout::new)
            .map_err(LayoutError::NoCurrentDir),
    }
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, LayoutError> {
    std::fs::create_dir_all(&path).map_err(|source| LayoutError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_hang_off_the_root() {
        let layout = ProjectLayout::new("/project");
        assert_eq!(layout.assets_dir(), Path::new("/project/assets"));
        assert_eq!(layout.test_dir(), Path::new("/project/test"));
        assert_eq!(layout.model_path(), Path::new("/project/workspace/model.zip"));
        assert_eq!(layout.logs_dir(), Path::new("/project/workspace/logs"));
        assert_eq!(layout.config_path(), Path::new("/project/mlpipe.toml"));
    }

    #[test]
    fn override_wins_and_empty_override_is_ignored() {
        let layout = resolve_with(Some(PathBuf::from("/elsewhere"))).unwrap();
        assert_eq!(layout.root(), Path::new("/elsewhere"));
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(resolve_with(Some(PathBuf::new())).unwrap().root(), cwd);
        assert_eq!(resolve_with(None).unwrap().root(), cwd);
    }

    #[test]
    fn ensure_logs_dir_creates_nested_folders() {
        let base = tempdir().unwrap();
        let layout = ProjectLayout::new(base.path());
        let logs = layout.ensure_logs_dir().unwrap();
        assert!(logs.is_dir());
        assert!(layout.workspace_dir().is_dir());
    }
}
