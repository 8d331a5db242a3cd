use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Transformer;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::data::{ColumnType, DataView, Row, Schema, Value};

/// Order in which dictionary keys are assigned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrdinality {
    #[default]
    ByOccurrence,
    ByValue,
}

/// Maps label strings to 1-based integer keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueToKeyMapper {
    pub input: String,
    pub output: String,
    /// `values[key - 1]` is the string behind `key`.
    pub values: Vec<String>,
}

impl ValueToKeyMapper {
    pub fn fit(
        input: &str,
        output: &str,
        ordinality: KeyOrdinality,
        data: &DataView,
    ) -> PipelineResult<Self> {
        data.schema().require(input, &ColumnType::Text)?;
        let mut values: Vec<String> = Vec::new();
        let mut seen = HashMap::new();
        for row in data.rows() {
            let value = row.text(input)?;
            if !seen.contains_key(value) {
                seen.insert(value.to_string(), values.len());
                values.push(value.to_string());
            }
        }
        if ordinality == KeyOrdinality::ByValue {
            values.sort();
        }
        Ok(Self {
            input: input.to_string(),
            output: output.to_string(),
            values,
        })
    }

    /// Key for `value`, `0` when it was not seen at fit time.
    pub fn key_of(&self, value: &str) -> u32 {
        self.values
            .iter()
            .position(|v| v == value)
            .map(|idx| idx as u32 + 1)
            .unwrap_or(0)
    }
}

impl Transformer for ValueToKeyMapper {
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema> {
        input.require(&self.input, &ColumnType::Text)?;
        let mut schema = input.clone();
        schema.set_key(&self.output, self.values.clone());
        Ok(schema)
    }

    fn transform_row(&self, row: &mut Row) -> PipelineResult<()> {
        let key = self.key_of(row.text(&self.input)?);
        row.set(&self.output, Value::Key(key));
        Ok(())
    }
}

/// Maps keys back to the strings recorded by the stage that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyToValueMapper {
    pub input: String,
    pub output: String,
    pub values: Vec<String>,
}

impl KeyToValueMapper {
    /// Only the schema is needed: the dictionary travels with the key column.
    pub fn fit_schema(input: &str, output: &str, schema: &Schema) -> PipelineResult<Self> {
        schema.require_kind(input, "key", |ty| matches!(ty, ColumnType::Key { .. }))?;
        let values = schema.key_values(input).ok_or_else(|| {
            PipelineError::schema_mismatch(input, "key with value dictionary", "key without values")
        })?;
        Ok(Self {
            input: input.to_string(),
            output: output.to_string(),
            values: values.to_vec(),
        })
    }

    pub fn value_of(&self, key: u32) -> &str {
        key.checked_sub(1)
            .and_then(|idx| self.values.get(idx as usize))
            .map(String::as_str)
            .unwrap_or("")
    }
}

impl Transformer for KeyToValueMapper {
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema> {
        input.require(
            &self.input,
            &ColumnType::Key {
                cardinality: self.values.len() as u32,
            },
        )?;
        let mut schema = input.clone();
        schema.set(&self.output, ColumnType::Text);
        Ok(schema)
    }

    fn transform_row(&self, row: &mut Row) -> PipelineResult<()> {
        let value = self.value_of(row.key(&self.input)?).to_string();
        row.set(&self.output, Value::Text(value));
        Ok(())
    }
}
