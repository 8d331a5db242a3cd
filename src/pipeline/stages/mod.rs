//! Fitted feature transforms.

mod categorical;
mod concat;
mod image_bytes;
mod key;
mod text;

pub use categorical::OneHotEncoder;
pub use concat::ConcatenateColumns;
pub use image_bytes::ImageBytesLoader;
pub use key::{KeyOrdinality, KeyToValueMapper, ValueToKeyMapper};
pub use text::{TextFeaturizer, TextFeaturizerOptions};

use crate::error::PipelineResult;
use crate::pipeline::data::{Row, Schema};

/// A fitted, row-at-a-time transform.
pub trait Transformer {
    /// Schema after this stage, failing if `input` lacks a required column.
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema>;
    /// Add or replace this stage's output columns on `row`.
    fn transform_row(&self, row: &mut Row) -> PipelineResult<()>;
}
