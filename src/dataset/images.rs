//! Lazy enumeration of labelled images under a folder.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::DatasetError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png"];

/// How an image's label is derived from its location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    /// Name of the directory containing the file.
    #[default]
    FolderName,
    /// Leading alphabetic characters of the file name (`cat12.jpg` -> `cat`).
    FileNamePrefix,
}

/// A labelled image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub image_path: PathBuf,
    pub label: String,
}

/// Depth-first walk over `root` yielding labelled images in sorted path order.
///
/// Entries are read one directory at a time, so very large trees are never
/// listed up front. Unreadable subdirectories are logged and skipped.
pub struct ImageFiles {
    mode: LabelMode,
    /// Pending entries per open directory, reversed so `pop` yields sorted order.
    stack: Vec<Vec<PathBuf>>,
}

impl ImageFiles {
    pub fn new(root: &Path, mode: LabelMode) -> Result<Self, DatasetError> {
        if !root.is_dir() {
            return Err(DatasetError::MissingPath(root.to_path_buf()));
        }
        let entries = sorted_entries(root).map_err(|source| DatasetError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self {
            mode,
            stack: vec![entries],
        })
    }
}

impl Iterator for ImageFiles {
    type Item = ImageData;

    fn next(&mut self) -> Option<ImageData> {
        loop {
            let dir = self.stack.last_mut()?;
            let Some(path) = dir.pop() else {
                self.stack.pop();
                continue;
            };
            if path.is_dir() {
                match sorted_entries(&path) {
                    Ok(entries) => self.stack.push(entries),
                    Err(err) => warn!("Skipping unreadable folder {}: {err}", path.display()),
                }
                continue;
            }
            if !has_image_extension(&path) {
                continue;
            }
            match label_for(&path, self.mode) {
                Some(label) => {
                    return Some(ImageData {
                        image_path: path,
                        label,
                    });
                }
                None => warn!("Skipping {}: no label could be derived", path.display()),
            }
        }
    }
}

/// Collect every labelled image under `root`.
pub fn load_images_from_directory(root: &Path, mode: LabelMode) -> Result<Vec<ImageData>, DatasetError> {
    Ok(ImageFiles::new(root, mode)?.collect())
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    entries.reverse();
    Ok(entries)
}

/// True for `.jpg` and `.png` files. The extension match ignores case, so
/// `.JPG` and `.Png` are accepted too.
fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

fn label_for(path: &Path, mode: LabelMode) -> Option<String> {
    let label = match mode {
        LabelMode::FolderName => path
            .parent()
            .and_then(Path::file_name)?
            .to_string_lossy()
            .trim()
            .to_string(),
        LabelMode::FileNamePrefix => path
            .file_stem()?
            .to_string_lossy()
            .chars()
            .take_while(|c| c.is_alphabetic())
            .collect(),
    };
    (!label.is_empty()).then_some(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn folder_labels_in_sorted_order() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("dog/b.PNG"));
        touch(&dir.path().join("dog/a.jpg"));
        touch(&dir.path().join("cat/x.jpg"));
        touch(&dir.path().join("cat/notes.txt"));
        let images = load_images_from_directory(dir.path(), LabelMode::FolderName).unwrap();
        let got: Vec<_> = images
            .iter()
            .map(|img| {
                (
                    img.label.as_str(),
                    img.image_path.file_name().unwrap().to_string_lossy().to_string(),
                )
            })
            .collect();
        assert_eq!(
            got,
            vec![
                ("cat", "x.jpg".to_string()),
                ("dog", "a.jpg".to_string()),
                ("dog", "b.PNG".to_string()),
            ]
        );
    }

    #[test]
    fn nested_folders_use_the_immediate_parent() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("animals/cat/1.jpg"));
        let images = load_images_from_directory(dir.path(), LabelMode::FolderName).unwrap();
        assert_eq!(images[0].label, "cat");
    }

    #[test]
    fn file_name_prefix_labels() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("cat12.jpg"));
        touch(&dir.path().join("42.jpg"));
        let images = load_images_from_directory(dir.path(), LabelMode::FileNamePrefix).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].label, "cat");
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load_images_from_directory(&dir.path().join("nope"), LabelMode::FolderName)
            .unwrap_err();
        assert!(matches!(err, DatasetError::MissingPath(_)));
    }

    #[test]
    fn empty_root_yields_nothing() {
        let dir = tempdir().unwrap();
        assert!(
            load_images_from_directory(dir.path(), LabelMode::FolderName)
                .unwrap()
                .is_empty()
        );
    }
}
