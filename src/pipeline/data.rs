//! Column values, schemas and the in-memory data view the pipeline operates on.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Declared type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Number,
    /// Fixed-length `f32` vector; the length is part of the type.
    Vector { len: usize },
    Bytes,
    /// 1-based key into a dictionary of `cardinality` values; `0` is "missing".
    Key { cardinality: u32 },
}

impl ColumnType {
    /// Length of the column when read as a feature vector.
    pub fn feature_len(&self) -> Option<usize> {
        match self {
            Self::Number => Some(1),
            Self::Vector { len } => Some(*len),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Number => write!(f, "number"),
            Self::Vector { len } => write!(f, "vector[{len}]"),
            Self::Bytes => write!(f, "bytes"),
            Self::Key { cardinality } => write!(f, "key[{cardinality}]"),
        }
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    /// Missing numeric inputs are stored as `NaN`.
    Number(f32),
    Vector(Vec<f32>),
    Bytes(Arc<[u8]>),
    Key(u32),
}

impl Value {
    pub fn describe(&self) -> String {
        match self {
            Self::Text(_) => "text".to_string(),
            Self::Number(_) => "number".to_string(),
            Self::Vector(values) => format!("vector[{}]", values.len()),
            Self::Bytes(_) => "bytes".to_string(),
            Self::Key(_) => "key".to_string(),
        }
    }

    pub fn conforms_to(&self, column_type: &ColumnType) -> bool {
        match (self, column_type) {
            (Self::Text(_), ColumnType::Text) => true,
            (Self::Number(_), ColumnType::Number) => true,
            (Self::Vector(values), ColumnType::Vector { len }) => values.len() == *len,
            (Self::Bytes(_), ColumnType::Bytes) => true,
            (Self::Key(key), ColumnType::Key { cardinality }) => key <= cardinality,
            _ => false,
        }
    }
}

/// Schema entry for one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Values behind a key column, indexed by `key - 1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_values: Option<Vec<String>>,
}

/// Ordered list of named, typed columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<SchemaColumn>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append.
    pub fn with(mut self, name: &str, column_type: ColumnType) -> Self {
        self.set(name, column_type);
        self
    }

    /// Insert or replace a column, keeping the original position on replace.
    pub fn set(&mut self, name: &str, column_type: ColumnType) {
        self.set_column(SchemaColumn {
            name: name.to_string(),
            column_type,
            key_values: None,
        });
    }

    /// Insert or replace a key column together with its value dictionary.
    pub fn set_key(&mut self, name: &str, values: Vec<String>) {
        self.set_column(SchemaColumn {
            name: name.to_string(),
            column_type: ColumnType::Key {
                cardinality: values.len() as u32,
            },
            key_values: Some(values),
        });
    }

    fn set_column(&mut self, column: SchemaColumn) {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
    }

    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ColumnType> {
        self.column(name).map(|c| &c.column_type)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = &SchemaColumn> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Fail unless `name` exists with exactly `expected` as its type.
    pub fn require(&self, name: &str, expected: &ColumnType) -> PipelineResult<()> {
        match self.get(name) {
            Some(found) if found == expected => Ok(()),
            Some(found) => Err(PipelineError::schema_mismatch(name, expected, found)),
            None => Err(PipelineError::schema_mismatch(name, expected, "missing column")),
        }
    }

    /// Look up a column whose type must satisfy `accept`; `expected` names the
    /// accepted kinds for the error message.
    pub fn require_kind(
        &self,
        name: &str,
        expected: &str,
        accept: impl Fn(&ColumnType) -> bool,
    ) -> PipelineResult<&ColumnType> {
        match self.get(name) {
            Some(found) if accept(found) => Ok(found),
            Some(found) => Err(PipelineError::schema_mismatch(name, expected, found)),
            None => Err(PipelineError::schema_mismatch(name, expected, "missing column")),
        }
    }

    /// Key dictionary for a key column, if one was recorded.
    pub fn key_values(&self, name: &str) -> Option<&[String]> {
        self.column(name).and_then(|c| c.key_values.as_deref())
    }
}

/// One record flowing through the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn text(&self, name: &str) -> PipelineResult<&str> {
        match self.values.get(name) {
            Some(Value::Text(text)) => Ok(text),
            other => Err(mismatch(name, "text", other)),
        }
    }

    pub fn number(&self, name: &str) -> PipelineResult<f32> {
        match self.values.get(name) {
            Some(Value::Number(value)) => Ok(*value),
            other => Err(mismatch(name, "number", other)),
        }
    }

    pub fn vector(&self, name: &str) -> PipelineResult<&[f32]> {
        match self.values.get(name) {
            Some(Value::Vector(values)) => Ok(values),
            other => Err(mismatch(name, "vector", other)),
        }
    }

    pub fn bytes(&self, name: &str) -> PipelineResult<&Arc<[u8]>> {
        match self.values.get(name) {
            Some(Value::Bytes(bytes)) => Ok(bytes),
            other => Err(mismatch(name, "bytes", other)),
        }
    }

    pub fn key(&self, name: &str) -> PipelineResult<u32> {
        match self.values.get(name) {
            Some(Value::Key(key)) => Ok(*key),
            other => Err(mismatch(name, "key", other)),
        }
    }

    /// Read a `Number` or `Vector` column as a feature slice.
    pub fn extend_features(&self, name: &str, out: &mut Vec<f32>) -> PipelineResult<()> {
        match self.values.get(name) {
            Some(Value::Number(value)) => out.push(*value),
            Some(Value::Vector(values)) => out.extend_from_slice(values),
            other => return Err(mismatch(name, "number or vector", other)),
        }
        Ok(())
    }

    /// Check every schema column is present with a conforming value.
    pub fn validate(&self, schema: &Schema) -> PipelineResult<()> {
        for column in schema.columns() {
            match self.values.get(&column.name) {
                Some(value) if value.conforms_to(&column.column_type) => {}
                other => return Err(mismatch(&column.name, &column.column_type, other)),
            }
        }
        Ok(())
    }
}

fn mismatch(name: &str, expected: impl ToString, found: Option<&Value>) -> PipelineError {
    let found = found
        .map(Value::describe)
        .unwrap_or_else(|| "missing column".to_string());
    PipelineError::schema_mismatch(name, expected, found)
}

/// Typed records that can enter a pipeline.
pub trait IntoRow {
    /// Schema of rows produced by [`IntoRow::to_row`].
    fn schema() -> Schema;
    fn to_row(&self) -> Row;
}

/// Schema-checked collection of rows.
#[derive(Debug, Clone, Default)]
pub struct DataView {
    schema: Schema,
    rows: Vec<Row>,
}

impl DataView {
    pub fn from_rows(schema: Schema, rows: Vec<Row>) -> PipelineResult<Self> {
        for row in &rows {
            row.validate(&schema)?;
        }
        Ok(Self { schema, rows })
    }

    pub fn from_records<T: IntoRow>(records: &[T]) -> Self {
        Self {
            schema: T::schema(),
            rows: records.iter().map(IntoRow::to_row).collect(),
        }
    }

    /// Build a view whose rows were produced by already-validated transforms.
    pub(crate) fn from_parts(schema: Schema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy of the rows at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            schema: self.schema.clone(),
            rows: indices
                .iter()
                .filter_map(|&idx| self.rows.get(idx).cloned())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_column_in_place() {
        let mut schema = Schema::new()
            .with("a", ColumnType::Text)
            .with("b", ColumnType::Number);
        schema.set("a", ColumnType::Vector { len: 3 });
        let names: Vec<_> = schema.columns().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(schema.get("a"), Some(&ColumnType::Vector { len: 3 }));
    }

    #[test]
    fn require_reports_missing_and_wrong_type() {
        let schema = Schema::new().with("x", ColumnType::Number);
        assert!(schema.require("x", &ColumnType::Number).is_ok());
        let err = schema.require("x", &ColumnType::Text).unwrap_err();
        assert!(err.to_string().contains("expected text, found number"));
        let err = schema.require("y", &ColumnType::Text).unwrap_err();
        assert!(err.to_string().contains("missing column"));
    }

    #[test]
    fn data_view_rejects_row_with_wrong_vector_length() {
        let schema = Schema::new().with("v", ColumnType::Vector { len: 2 });
        let rows = vec![Row::new().with("v", Value::Vector(vec![1.0, 2.0, 3.0]))];
        assert!(DataView::from_rows(schema, rows).is_err());
    }

    #[test]
    fn key_column_records_dictionary() {
        let mut schema = Schema::new();
        schema.set_key("label", vec!["cat".into(), "dog".into()]);
        assert_eq!(schema.get("label"), Some(&ColumnType::Key { cardinality: 2 }));
        assert_eq!(schema.key_values("label").unwrap()[1], "dog");
        assert!(Value::Key(2).conforms_to(schema.get("label").unwrap()));
        assert!(!Value::Key(3).conforms_to(schema.get("label").unwrap()));
    }
}
