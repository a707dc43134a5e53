//! Tagged bind values and decoded rows
//!
//! Callers build parameters as [`Value`]s once, at the type boundary, instead of
//! the driver guessing a bind type per call.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::DbError;

/// A single SQL parameter or column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Order-sensitive, type-tagged encoding used in fingerprints.
    ///
    /// Text is length-prefixed so `["a,b"]` and `["a", "b"]` never collide.
    pub(crate) fn fingerprint_into(&self, out: &mut String) {
        use std::fmt::Write;
        let _ = match self {
            Self::Null => write!(out, "n;"),
            Self::Bool(b) => write!(out, "b{};", u8::from(*b)),
            Self::Int(i) => write!(out, "i{};", i),
            Self::Float(f) => write!(out, "f{:?};", f),
            Self::Text(s) => write!(out, "t{}:{};", s.len(), s),
        };
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Text(v.format("%Y-%m-%d").to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Column name to value, for insert/update payloads and equality conditions.
pub type Fields = BTreeMap<String, Value>;

/// One decoded result row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.0.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }

    fn require(&self, column: &str) -> Result<&Value, DbError> {
        self.0.get(column).ok_or_else(|| DbError::Decode {
            column: column.to_string(),
            reason: "is missing from the result".to_string(),
        })
    }

    fn mismatch(column: &str, expected: &str, found: &Value) -> DbError {
        DbError::Decode {
            column: column.to_string(),
            reason: format!("expected {}, found {:?}", expected, found),
        }
    }

    pub fn opt_i64(&self, column: &str) -> Result<Option<i64>, DbError> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Int(i) => Ok(Some(*i)),
            Value::Bool(b) => Ok(Some(i64::from(*b))),
            // SQLite and MySQL text affinity can hand back numeric strings
            Value::Text(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Self::mismatch(column, "integer", &Value::Text(s.clone()))),
            other => Err(Self::mismatch(column, "integer", other)),
        }
    }

    pub fn i64(&self, column: &str) -> Result<i64, DbError> {
        self.opt_i64(column)?
            .ok_or_else(|| Self::mismatch(column, "integer", &Value::Null))
    }

    pub fn opt_f64(&self, column: &str) -> Result<Option<f64>, DbError> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Float(f) => Ok(Some(*f)),
            Value::Int(i) => Ok(Some(*i as f64)),
            Value::Text(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Self::mismatch(column, "float", &Value::Text(s.clone()))),
            other => Err(Self::mismatch(column, "float", other)),
        }
    }

    pub fn f64(&self, column: &str) -> Result<f64, DbError> {
        self.opt_f64(column)?
            .ok_or_else(|| Self::mismatch(column, "float", &Value::Null))
    }

    /// Booleans are stored as 0/1 integers on every dialect.
    pub fn bool(&self, column: &str) -> Result<bool, DbError> {
        match self.require(column)? {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            other => Err(Self::mismatch(column, "boolean", other)),
        }
    }

    pub fn opt_text(&self, column: &str) -> Result<Option<String>, DbError> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.clone())),
            Value::Int(i) => Ok(Some(i.to_string())),
            Value::Float(f) => Ok(Some(f.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
        }
    }

    pub fn text(&self, column: &str) -> Result<String, DbError> {
        self.opt_text(column)?
            .ok_or_else(|| Self::mismatch(column, "text", &Value::Null))
    }

    pub fn date(&self, column: &str) -> Result<NaiveDate, DbError> {
        let raw = self.text(column)?;
        // DATETIME-shaped values carry a date prefix
        let prefix = raw.get(..10).unwrap_or(&raw);
        NaiveDate::parse_from_str(prefix, "%Y-%m-%d")
            .map_err(|_| Self::mismatch(column, "date (YYYY-MM-DD)", &Value::Text(raw.clone())))
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Build a positional parameter list: `params![id, "pending", None::<i64>]`.
#[macro_export]
macro_rules! params {
    () => { ::std::vec::Vec::<$crate::db::Value>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::db::Value::from($value)),+]
    };
}

/// Build a [`Fields`] map: `fields! { "name" => "Asha", "room" => 12 }`.
#[macro_export]
macro_rules! fields {
    () => { $crate::db::Fields::new() };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::db::Fields::new();
        $( map.insert(::std::string::String::from($column), $crate::db::Value::from($value)); )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_encoding_is_unambiguous() {
        let mut a = String::new();
        Value::from("a;b").fingerprint_into(&mut a);

        let mut b = String::new();
        Value::from("a").fingerprint_into(&mut b);
        Value::from("b").fingerprint_into(&mut b);

        assert_ne!(a, b);
    }

    #[test]
    fn int_and_text_of_same_digits_differ() {
        let mut a = String::new();
        Value::Int(5).fingerprint_into(&mut a);
        let mut b = String::new();
        Value::from("5").fingerprint_into(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn row_getters_coerce_storage_shapes() {
        let mut row = Row::new();
        row.insert("id", Value::Int(7));
        row.insert("active", Value::Int(1));
        row.insert("rating", Value::Int(4));
        row.insert("count", Value::Text("12".into()));
        row.insert("booking_date", Value::Text("2025-03-14".into()));
        row.insert("note", Value::Null);

        assert_eq!(row.i64("id").unwrap(), 7);
        assert!(row.bool("active").unwrap());
        assert_eq!(row.f64("rating").unwrap(), 4.0);
        assert_eq!(row.i64("count").unwrap(), 12);
        assert_eq!(row.date("booking_date").unwrap(), NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        assert_eq!(row.opt_text("note").unwrap(), None);
    }

    #[test]
    fn missing_column_is_decode_error() {
        let row = Row::new();
        assert!(matches!(row.i64("id"), Err(DbError::Decode { .. })));
    }

    #[test]
    fn macros_build_values() {
        let p = params![1_i64, "x", None::<i64>, true];
        assert_eq!(p, vec![Value::Int(1), Value::Text("x".into()), Value::Null, Value::Bool(true)]);

        let f = fields! { "name" => "Asha", "room" => 12 };
        assert_eq!(f.get("room"), Some(&Value::Int(12)));
    }
}
