use serde::{Deserialize, Serialize};

use super::Transformer;
use crate::error::PipelineResult;
use crate::pipeline::data::{ColumnType, Row, Schema, Value};

/// Concatenates number and vector columns into one feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatenateColumns {
    pub output: String,
    pub inputs: Vec<String>,
    /// Types seen at fit time; the output length is their summed length.
    pub input_types: Vec<ColumnType>,
}

impl ConcatenateColumns {
    pub fn fit_schema(
        output: &str,
        inputs: &[String],
        schema: &Schema,
    ) -> PipelineResult<Self> {
        let input_types = inputs
            .iter()
            .map(|name| {
                schema
                    .require_kind(name, "number or vector", |ty| ty.feature_len().is_some())
                    .cloned()
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(Self {
            output: output.to_string(),
            inputs: inputs.to_vec(),
            input_types,
        })
    }

    pub fn output_len(&self) -> usize {
        self.input_types
            .iter()
            .filter_map(ColumnType::feature_len)
            .sum()
    }
}

impl Transformer for ConcatenateColumns {
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema> {
        for (name, ty) in self.inputs.iter().zip(&self.input_types) {
            input.require(name, ty)?;
        }
        let mut schema = input.clone();
        schema.set(
            &self.output,
            ColumnType::Vector {
                len: self.output_len(),
            },
        );
        Ok(schema)
    }

    fn transform_row(&self, row: &mut Row) -> PipelineResult<()> {
        let mut features = Vec::with_capacity(self.output_len());
        for name in &self.inputs {
            row.extend_features(name, &mut features)?;
        }
        row.set(&self.output, Value::Vector(features));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_in_declared_order() {
        let schema = Schema::new()
            .with("a", ColumnType::Vector { len: 2 })
            .with("b", ColumnType::Number);
        let stage =
            ConcatenateColumns::fit_schema("Features", &["b".into(), "a".into()], &schema).unwrap();
        assert_eq!(stage.output_len(), 3);

        let mut row = Row::new()
            .with("a", Value::Vector(vec![1.0, 2.0]))
            .with("b", Value::Number(9.0));
        stage.transform_row(&mut row).unwrap();
        assert_eq!(row.vector("Features").unwrap(), &[9.0, 1.0, 2.0]);
    }

    #[test]
    fn rejects_text_input() {
        let schema = Schema::new().with("t", ColumnType::Text);
        assert!(ConcatenateColumns::fit_schema("F", &["t".into()], &schema).is_err());
    }

    #[test]
    fn vector_length_change_is_schema_mismatch() {
        let fitted_on = Schema::new().with("a", ColumnType::Vector { len: 2 });
        let stage = ConcatenateColumns::fit_schema("F", &["a".into()], &fitted_on).unwrap();
        let other = Schema::new().with("a", ColumnType::Vector { len: 4 });
        assert!(stage.output_schema(&other).is_err());
    }
}
