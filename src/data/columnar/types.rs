//! Column-major data model for the columnar engine
//!
//! Data crosses the engine seam as a [`ColumnSet`]: ordered
//! `(name, Vec<Value>)` pairs with equal column lengths. Cell values are
//! `serde_json::Value`; nested structures serialize to JSON text and UUIDs
//! canonicalize to strings at the insert boundary.

use serde_json::Value;

/// Name of the engine-internal row identifier column materialized by
/// `select(..., with_row_ids = true)`.
pub const ROW_ID_COLUMN: &str = "$row_id";

/// Column data types understood by the engine seam.
///
/// The schema-match contract is string equality of the [`Self::as_str`]
/// descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    String,
    Int64,
    Float64,
    Boolean,
    Timestamp,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered table schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub fields: Vec<Field>,
}

impl TableSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Whether every field of `self` exists in `existing` with an identical
    /// type descriptor. Extra fields in `existing` are allowed.
    pub fn satisfied_by(&self, existing: &TableSchema) -> bool {
        self.fields.iter().all(|field| {
            existing
                .field(&field.name)
                .is_some_and(|f| f.data_type.as_str() == field.data_type.as_str())
        })
    }

    /// Fields of `self` missing from `existing` (candidates for evolution)
    pub fn missing_from<'a>(&'a self, existing: &TableSchema) -> Vec<&'a Field> {
        self.fields
            .iter()
            .filter(|f| !existing.contains(&f.name))
            .collect()
    }
}

/// Engine-reported table statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub total_rows: u64,
}

/// Column-major dataset: ordered columns of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSet {
    names: Vec<String>,
    columns: Vec<Vec<Value>>,
}

impl ColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column. Returns `false` (and drops the column) when its
    /// length disagrees with the existing columns.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> bool {
        let name = name.into();
        if !self.columns.is_empty() && values.len() != self.num_rows() {
            tracing::warn!(
                column = %name,
                expected = self.num_rows(),
                got = values.len(),
                "Dropping column with mismatched length"
            );
            return false;
        }
        self.names.push(name);
        self.columns.push(values);
        true
    }

    /// Build from `(name, values)` pairs; mismatched columns are dropped.
    pub fn from_columns(pairs: Vec<(String, Vec<Value>)>) -> Self {
        let mut set = Self::new();
        for (name, values) in pairs {
            set.push_column(name, values);
        }
        set
    }

    /// Build from row-major maps, using the first row's key order.
    pub fn from_rows(rows: &[serde_json::Map<String, Value>]) -> Self {
        let mut set = Self::new();
        let Some(first) = rows.first() else {
            return set;
        };
        for key in first.keys() {
            let values = rows
                .iter()
                .map(|row| row.get(key).cloned().unwrap_or(Value::Null))
                .collect();
            set.push_column(key.clone(), values);
        }
        set
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column(&self, name: &str) -> Option<&Vec<Value>> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(&self.columns[idx])
    }

    /// Remove and return a column by name.
    pub fn take_column(&mut self, name: &str) -> Option<Vec<Value>> {
        let idx = self.names.iter().position(|n| n == name)?;
        self.names.remove(idx);
        Some(self.columns.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Vec<Value>)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter())
    }

    /// Copy of the row range `[start, end)` across all columns.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.num_rows());
        let start = start.min(end);
        Self {
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|col| col[start..end].to_vec())
                .collect(),
        }
    }

    /// Truncate every column to at most `limit` rows.
    pub fn truncate(&mut self, limit: usize) {
        for col in &mut self.columns {
            col.truncate(limit);
        }
    }

    /// Convert to row-major maps preserving column order.
    pub fn to_rows(&self) -> Vec<serde_json::Map<String, Value>> {
        (0..self.num_rows())
            .map(|row| {
                self.iter()
                    .map(|(name, col)| (name.to_string(), col[row].clone()))
                    .collect()
            })
            .collect()
    }

    /// Single cell accessor.
    pub fn cell(&self, name: &str, row: usize) -> Option<&Value> {
        self.column(name).and_then(|col| col.get(row))
    }

    /// Canonicalize every cell for insertion: nested objects and arrays
    /// become JSON text, scalars pass through.
    pub fn canonicalized(mut self) -> Self {
        for col in &mut self.columns {
            for value in col.iter_mut() {
                if let Some(canonical) = canonicalize(value) {
                    *value = canonical;
                }
            }
        }
        self
    }
}

/// Canonical insert form of a cell: `Some(replacement)` when the value needs
/// rewriting (nested structures serialize to JSON text), `None` otherwise.
fn canonicalize(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) | Value::Array(_) => Some(Value::String(
            serde_json::to_string(value).unwrap_or_default(),
        )),
        _ => None,
    }
}
