use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Transformer;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::data::{ColumnType, Row, Schema, Value};

/// Reads image files named by a path column into a bytes column.
///
/// The stage has nothing to learn; the file read happens in `transform_row`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBytesLoader {
    pub input: String,
    pub output: String,
    /// Base folder for relative paths. Absolute paths are used as-is.
    pub image_folder: PathBuf,
}

impl ImageBytesLoader {
    pub fn new(input: &str, output: &str, image_folder: &Path) -> Self {
        Self {
            input: input.to_string(),
            output: output.to_string(),
            image_folder: image_folder.to_path_buf(),
        }
    }
}

impl Transformer for ImageBytesLoader {
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema> {
        input.require(&self.input, &ColumnType::Text)?;
        let mut schema = input.clone();
        schema.set(&self.output, ColumnType::Bytes);
        Ok(schema)
    }

    fn transform_row(&self, row: &mut Row) -> PipelineResult<()> {
        let path = self.image_folder.join(row.text(&self.input)?);
        let bytes = std::fs::read(&path).map_err(|source| PipelineError::ReadFile {
            path: path.clone(),
            source,
        })?;
        row.set(&self.output, Value::Bytes(Arc::from(bytes)));
        Ok(())
    }
}
