//! Column values and rows

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single column value as stored by the relational backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// 64-bit signed integer
    Integer(i64),
    /// Double precision float
    Real(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Whether the value is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view of the value, if it has one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Real(v) if v.fract() == 0.0 => Some(*v as i64),
            SqlValue::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Float view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(v) => Some(*v as f64),
            SqlValue::Real(v) => Some(*v),
            SqlValue::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text view of the value, if it is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(v) => write!(f, "{}", v),
            SqlValue::Real(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "{}", v),
            SqlValue::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// A full row keyed by column name
pub type Row = BTreeMap<String, SqlValue>;

/// Quote an identifier for use in generated SQL
///
/// Dotted names (`schema.table`) are quoted part by part.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Columns whose values differ between two versions of the same row
///
/// Columns present on only one side count as changed.
pub fn changed_columns(before: &Row, after: &Row) -> Vec<String> {
    let mut changed: Vec<String> = before
        .iter()
        .filter(|(column, value)| after.get(*column) != Some(*value))
        .map(|(column, _)| column.clone())
        .collect();

    for column in after.keys() {
        if !before.contains_key(column) {
            changed.push(column.clone());
        }
    }

    changed.sort();
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, SqlValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_quote_ident_plain() {
        assert_eq!(quote_ident("units"), "\"units\"");
    }

    #[test]
    fn test_quote_ident_dotted_and_embedded_quote() {
        assert_eq!(quote_ident("main.units"), "\"main\".\"units\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_changed_columns() {
        let before = row(&[
            ("id", SqlValue::Integer(1)),
            ("attack", SqlValue::Integer(10)),
            ("name", SqlValue::from("archer")),
        ]);
        let after = row(&[
            ("id", SqlValue::Integer(1)),
            ("attack", SqlValue::Integer(11)),
            ("name", SqlValue::from("archer")),
            ("bonus", SqlValue::Null),
        ]);

        assert_eq!(changed_columns(&before, &after), vec!["attack", "bonus"]);
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(SqlValue::Integer(42).as_i64(), Some(42));
        assert_eq!(SqlValue::Real(3.0).as_i64(), Some(3));
        assert_eq!(SqlValue::Real(3.5).as_i64(), None);
        assert_eq!(SqlValue::from("7").as_i64(), Some(7));
        assert_eq!(SqlValue::Null.as_f64(), None);
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<i64> = None;
        assert!(SqlValue::from(none).is_null());
        assert_eq!(SqlValue::from(Some(5i64)), SqlValue::Integer(5));
    }

    #[test]
    fn test_value_serialization_tags() {
        let json = serde_json::to_string(&SqlValue::Integer(3)).unwrap();
        assert_eq!(json, r#"{"type":"integer","value":3}"#);
        let back: SqlValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SqlValue::Integer(3));
    }
}
