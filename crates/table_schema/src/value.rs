use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;

/// One cell of a fragment or table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Text(s) => parse_date(s),
            _ => None,
        }
    }

    /// Canonical text form used for join keys and uniqueness checks.
    /// `Int(5)`, `Float(5.0)` and `Text("5")` share one key, so ids compare
    /// equal whichever way the provider encoded them.
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(float_text(*f)),
            Value::Text(s) => Some(s.trim().to_string()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            other => write!(f, "{}", other.key().unwrap_or_default()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// Semantic column type declared by a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Int,
    Float,
    Bool,
    Date,
}

impl ColumnType {
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::Date => "date",
        }
    }

    /// Coerce `value` into this type. Blank strings become null for every
    /// non-text type. The error carries a human-readable reason.
    pub fn coerce(self, value: Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if let Value::Text(s) = &value {
            if self != ColumnType::Text && s.trim().is_empty() {
                return Ok(Value::Null);
            }
        }

        let coerced = match (self, &value) {
            (ColumnType::Text, Value::Text(_)) => Some(value.clone()),
            (ColumnType::Text, other) => other.key().map(Value::Text),

            (ColumnType::Int, Value::Int(_)) => Some(value.clone()),
            (ColumnType::Int, Value::Float(f)) if is_whole(*f) => Some(Value::Int(*f as i64)),
            (ColumnType::Int, Value::Bool(b)) => Some(Value::Int(i64::from(*b))),
            (ColumnType::Int, Value::Text(s)) => parse_int(s).map(Value::Int),

            (ColumnType::Float, Value::Float(_)) => Some(value.clone()),
            (ColumnType::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (ColumnType::Float, Value::Text(s)) => s.trim().parse::<f64>().ok().map(Value::Float),

            (ColumnType::Bool, Value::Bool(_)) => Some(value.clone()),
            (ColumnType::Bool, Value::Int(0)) => Some(Value::Bool(false)),
            (ColumnType::Bool, Value::Int(1)) => Some(Value::Bool(true)),
            (ColumnType::Bool, Value::Float(f)) if *f == 0.0 || *f == 1.0 => Some(Value::Bool(*f == 1.0)),
            (ColumnType::Bool, Value::Text(s)) => parse_bool(s).map(Value::Bool),

            (ColumnType::Date, Value::Date(_)) => Some(value.clone()),
            (ColumnType::Date, Value::Text(s)) => parse_date(s).map(Value::Date),

            _ => None,
        };

        coerced.ok_or_else(|| format!("cannot coerce {value:?} to {}", self.name()))
    }
}

fn is_whole(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15
}

fn float_text(f: f64) -> String {
    if is_whole(f) {
        format!("{f:.0}")
    } else {
        f.to_string()
    }
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().filter(|f| is_whole(*f)).map(|f| f as i64))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "y" | "yes" => Some(true),
        "false" | "f" | "0" | "n" | "no" => Some(false),
        _ => None,
    }
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%b %d, %Y", "%B %d, %Y"];

/// Parses the date shapes the provider emits (`2023-10-24`,
/// `2023-10-24T00:00:00`, `10/24/2023`, `OCT 24, 2023`).
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok().map(|dt| dt.date()))
        .or_else(|| DATE_FORMATS.iter().find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok()))
}
