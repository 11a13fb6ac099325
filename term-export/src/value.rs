//! Row data model: scalar values, immutable row batches and normalized keys.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// A scalar cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 text
    Str(String),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical text form used for keys, hashing and delimited output.
    ///
    /// Integral floats render without a fractional part so `1`, `1.0` and `"1"`
    /// share a canonical form. Returns `None` for null.
    pub fn canonical(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(canonical_float(*f)),
            Value::Str(s) => Some(s.clone()),
        }
    }
}

fn canonical_float(f: f64) -> String {
    // 2^53: beyond this integral floats are no longer exact
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical() {
            Some(text) => f.write_str(&text),
            None => f.write_str("null"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// An ordered sequence of rows sharing one fixed column list.
///
/// Batches are never mutated once built; filtering and projection produce new
/// batches.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RowBatch {
    /// Builds a batch, checking that column names are unique and every row has
    /// one value per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut seen = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if seen.insert(column.as_str(), idx).is_some() {
                return Err(ExportError::configuration(format!(
                    "duplicate column '{column}' in batch"
                )));
            }
        }
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(ExportError::configuration(format!(
                "row {idx} has {} values but the batch has {} columns",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// An empty batch with the given columns.
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a batch from rows of `(column, value)` pairs.
    ///
    /// The column list is taken from the first record; every record must carry
    /// the same column set.
    pub fn from_records<K, V>(records: Vec<Vec<(K, V)>>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let pairs: Vec<(String, Value)> = record
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect();
            match &columns {
                None => {
                    columns = Some(pairs.iter().map(|(k, _)| k.clone()).collect());
                    rows.push(pairs.into_iter().map(|(_, v)| v).collect());
                }
                Some(cols) => {
                    let mut row = vec![Value::Null; cols.len()];
                    if pairs.len() != cols.len() {
                        return Err(ExportError::configuration(
                            "all records must share the same columns",
                        ));
                    }
                    for (k, v) in pairs {
                        let idx = cols.iter().position(|c| *c == k).ok_or_else(|| {
                            ExportError::configuration(format!(
                                "record has unexpected column '{k}'"
                            ))
                        })?;
                        row[idx] = v;
                    }
                    rows.push(row);
                }
            }
        }
        Self::new(columns.unwrap_or_default(), rows)
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `column`, if present.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Borrowed view of row `idx`.
    pub fn row(&self, idx: usize) -> Option<RowRef<'_>> {
        self.rows.get(idx).map(|values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    /// Iterates over borrowed rows.
    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(move |values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    /// Raw row values.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// A new batch holding the rows at `indices`, in the given order.
    pub fn take(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    /// Returns true when both column lists hold the same names, in any order.
    pub fn same_column_set(&self, other: &[String]) -> bool {
        self.columns.len() == other.len() && other.iter().all(|c| self.column_index(c).is_some())
    }

    /// Reorders columns to `order`, which must be a permutation of this batch's
    /// columns.
    pub fn project(&self, order: &[String]) -> Result<Self> {
        if !self.same_column_set(order) {
            return Err(ExportError::Internal(format!(
                "cannot project columns {:?} onto {order:?}",
                self.columns
            )));
        }
        let positions: Vec<usize> = order
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| positions.iter().map(|&p| row[p].clone()).collect())
            .collect();
        Ok(Self {
            columns: order.to_vec(),
            rows,
        })
    }

    /// Appends the rows of `other` after this batch's rows.
    ///
    /// `other` is projected onto this batch's column order first.
    pub fn concat(&self, other: &RowBatch) -> Result<Self> {
        let other = other.project(&self.columns)?;
        let mut rows = self.rows.clone();
        rows.extend(other.rows);
        Ok(Self {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// A batch with the same columns and every value passed through `f`.
    pub fn map_values(&self, f: impl Fn(&Value) -> Value) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|row| row.iter().map(&f).collect())
                .collect(),
        }
    }
}

/// A borrowed row: an ordered mapping from column to value.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowRef<'a> {
    /// Value of `column`, if the column exists.
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Values in column order.
    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    /// Column names in order.
    pub fn columns(&self) -> &'a [String] {
        self.columns
    }
}

/// One component of a [`NormalizedKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    /// Null sentinel, never equal to any text
    Null,
    /// Canonical text of a non-null value
    Text(String),
}

impl From<&Value> for KeyPart {
    fn from(value: &Value) -> Self {
        match value.canonical() {
            Some(text) => KeyPart::Text(text),
            None => KeyPart::Null,
        }
    }
}

/// A tuple of key parts with type-insensitive equality.
///
/// Values compare by canonical text, so a key read back from a text file
/// matches the typed value that produced it. Null is a distinct sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedKey(Vec<KeyPart>);

impl NormalizedKey {
    /// Normalizes the values at `positions` of `values`.
    pub fn from_positions(values: &[Value], positions: &[usize]) -> Self {
        Self(positions.iter().map(|&p| KeyPart::from(&values[p])).collect())
    }

    /// Normalizes a sequence of values.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self(values.into_iter().map(|v| KeyPart::from(&v)).collect())
    }

    /// The key's parts.
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let err = RowBatch::new(cols(&["id", "name"]), vec![vec![Value::Int(1)]]).unwrap_err();
        assert!(matches!(err, ExportError::Configuration(_)));
    }

    #[test]
    fn test_new_rejects_duplicate_columns() {
        assert!(RowBatch::new(cols(&["id", "id"]), vec![]).is_err());
    }

    #[test]
    fn test_from_records_aligns_columns() {
        let batch = RowBatch::from_records(vec![
            vec![("id", Value::from(1)), ("name", Value::from("Ada"))],
            vec![("name", Value::from("Bob")), ("id", Value::from(2))],
        ])
        .unwrap();
        assert_eq!(batch.columns(), &cols(&["id", "name"]));
        assert_eq!(batch.row(1).unwrap().get("name"), Some(&Value::from("Bob")));
        assert_eq!(batch.row(1).unwrap().get("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_canonical_forms() {
        assert_eq!(Value::Float(1.0).canonical().as_deref(), Some("1"));
        assert_eq!(Value::Float(1.5).canonical().as_deref(), Some("1.5"));
        assert_eq!(Value::Bool(true).canonical().as_deref(), Some("true"));
        assert_eq!(Value::Null.canonical(), None);
    }

    #[test]
    fn test_normalized_key_equality() {
        let typed = NormalizedKey::from_values(vec![Value::Int(1), Value::from("a")]);
        let text = NormalizedKey::from_values(vec![Value::from("1"), Value::from("a")]);
        assert_eq!(typed, text);

        let null = NormalizedKey::from_values(vec![Value::Null]);
        let literal = NormalizedKey::from_values(vec![Value::from("null")]);
        let empty = NormalizedKey::from_values(vec![Value::from("")]);
        assert_ne!(null, literal);
        assert_ne!(null, empty);
    }

    #[test]
    fn test_project_and_concat() {
        let a = RowBatch::new(cols(&["id", "name"]), vec![vec![1.into(), "Ada".into()]]).unwrap();
        let b = RowBatch::new(cols(&["name", "id"]), vec![vec!["Bob".into(), 2.into()]]).unwrap();
        let merged = a.concat(&b).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.rows()[1], vec![Value::Int(2), Value::from("Bob")]);
        assert!(a.project(&cols(&["id"])).is_err());
    }
}
