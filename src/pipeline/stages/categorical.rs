use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::Transformer;
use crate::error::PipelineResult;
use crate::pipeline::data::{ColumnType, DataView, Row, Schema, Value};

/// One-hot encoding of a text column over the categories seen at fit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    pub input: String,
    pub output: String,
    /// Categories in order of first occurrence; slot `i` encodes `categories[i]`.
    pub categories: Vec<String>,
}

impl OneHotEncoder {
    pub fn fit(input: &str, output: &str, data: &DataView) -> PipelineResult<Self> {
        data.schema().require(input, &ColumnType::Text)?;
        let mut seen = HashSet::new();
        let mut categories = Vec::new();
        for row in data.rows() {
            let value = row.text(input)?;
            if seen.insert(value.to_string()) {
                categories.push(value.to_string());
            }
        }
        Ok(Self {
            input: input.to_string(),
            output: output.to_string(),
            categories,
        })
    }
}

impl Transformer for OneHotEncoder {
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema> {
        input.require(&self.input, &ColumnType::Text)?;
        let mut schema = input.clone();
        schema.set(
            &self.output,
            ColumnType::Vector {
                len: self.categories.len(),
            },
        );
        Ok(schema)
    }

    fn transform_row(&self, row: &mut Row) -> PipelineResult<()> {
        let value = row.text(&self.input)?;
        let mut encoded = vec![0.0f32; self.categories.len()];
        // Unseen categories encode as all zeros.
        if let Some(slot) = self.categories.iter().position(|c| c == value) {
            encoded[slot] = 1.0;
        }
        row.set(&self.output, Value::Vector(encoded));
        Ok(())
    }
}
