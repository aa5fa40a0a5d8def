//! Value types for gridway-rdbc
//!
//! A scalar value model wide enough for the record sets the broker serves:
//! primitives, decimal, temporal types, UUID, JSON and arrays. Wire payloads
//! arrive as JSON, so conversion to and from `serde_json::Value` is part of
//! the contract, not an afterthought.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// SQL value type that can hold any scalar the broker moves between a wire
/// request and a database parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer (covers TINYINT through BIGINT)
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
    /// Arbitrary precision decimal (NUMERIC, DECIMAL)
    Decimal(Decimal),
    /// Text string (VARCHAR, TEXT, CHAR)
    String(String),
    /// Binary data (BYTEA, BLOB, VARBINARY)
    Bytes(Vec<u8>),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Time without date (TIME)
    Time(NaiveTime),
    /// Timestamp without timezone (TIMESTAMP)
    DateTime(NaiveDateTime),
    /// UUID
    Uuid(Uuid),
    /// JSON value
    Json(serde_json::Value),
    /// Array of values
    Array(Vec<SqlValue>),
}

impl SqlValue {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int64(n) => Some(*n != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(n) => Some(*n),
            Self::Float64(n) if n.is_finite() => Some(*n as i64),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(n) => Some(*n as f64),
            Self::Float64(n) => Some(*n),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Build a value from a wire-level JSON scalar.
    ///
    /// Objects become [`SqlValue::Json`]; arrays convert element-wise.
    pub fn from_json(value: &serde_json::Value) -> SqlValue {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int64(i)
                } else {
                    SqlValue::Float64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => SqlValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                SqlValue::Array(items.iter().map(SqlValue::from_json).collect())
            }
            serde_json::Value::Object(_) => SqlValue::Json(value.clone()),
        }
    }

    /// Render this value as wire-level JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int64(n) => serde_json::Value::from(*n),
            Self::Float64(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Decimal(d) => serde_json::Value::String(d.to_string()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
            Self::Date(d) => serde_json::Value::String(d.to_string()),
            Self::Time(t) => serde_json::Value::String(t.to_string()),
            Self::DateTime(dt) => serde_json::Value::String(dt.to_string()),
            Self::Uuid(u) => serde_json::Value::String(u.to_string()),
            Self::Json(j) => j.clone(),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(SqlValue::to_json).collect())
            }
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int64(i64::from(v))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Self::Null,
        }
    }
}

/// A result-set row: ordered column labels and their values.
///
/// Lookups are by label because the broker decodes rows by field name
/// (queries alias every column back to its descriptor field).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row from parallel column/value lists.
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from (label, value) pairs.
    pub fn from_pairs(pairs: Vec<(String, SqlValue)>) -> Self {
        let (columns, values) = pairs.into_iter().unzip();
        Self { columns, values }
    }

    /// Column labels in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in result order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get a value by column label.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Get a value by column label, failing if the column is absent.
    pub fn try_get(&self, column: &str) -> Result<&SqlValue> {
        self.get(column)
            .ok_or_else(|| Error::type_conversion(format!("no column '{column}' in row")))
    }

    /// Render the row as a JSON object keyed by column label.
    pub fn to_json_object(&self) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .map(|(c, v)| (c.clone(), v.to_json()))
            .collect()
    }

    /// Render the row as a field-name → value map.
    pub fn to_map(&self) -> HashMap<String, SqlValue> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_detection() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Int64(0).is_null());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(SqlValue::Int64(42).as_i64(), Some(42));
        assert_eq!(SqlValue::String("42".into()).as_i64(), Some(42));
        assert_eq!(SqlValue::Bool(true).as_bool(), Some(true));
        assert_eq!(SqlValue::String("yes".into()).as_bool(), Some(true));
        assert_eq!(SqlValue::Float64(1.5).as_f64(), Some(1.5));
        assert_eq!(SqlValue::String("abc".into()).as_str(), Some("abc"));
        assert_eq!(SqlValue::Int64(1).as_str(), None);
    }

    #[test]
    fn test_json_round_trip_scalars() {
        for json in [json!(null), json!(true), json!(7), json!(2.5), json!("x")] {
            let value = SqlValue::from_json(&json);
            assert_eq!(value.to_json(), json);
        }
    }

    #[test]
    fn test_from_json_array_and_object() {
        let arr = SqlValue::from_json(&json!([1, "a", null]));
        assert_eq!(
            arr,
            SqlValue::Array(vec![
                SqlValue::Int64(1),
                SqlValue::String("a".into()),
                SqlValue::Null
            ])
        );

        let obj = SqlValue::from_json(&json!({"k": 1}));
        assert!(matches!(obj, SqlValue::Json(_)));
    }

    #[test]
    fn test_row_lookup() {
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![SqlValue::Int64(1), SqlValue::String("Malta".into())],
        );

        assert_eq!(row.get("id"), Some(&SqlValue::Int64(1)));
        assert_eq!(row.get("missing"), None);
        assert!(row.try_get("missing").is_err());
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_row_to_json_object() {
        let row = Row::from_pairs(vec![
            ("id".to_string(), SqlValue::Int64(3)),
            ("name".to_string(), SqlValue::Null),
        ]);
        let obj = row.to_json_object();
        assert_eq!(obj.get("id"), Some(&json!(3)));
        assert_eq!(obj.get("name"), Some(&json!(null)));
    }
}
