//! Typed scalar values.
//!
//! Request payloads carry untyped JSON scalars. Before a value reaches a
//! predicate it is coerced to the native kind of the column it is compared
//! against, so a numeric group key binds as a number and never as text.

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{EngineError, EngineResult};
use crate::registry::DataKind;
use crate::sql::expr::{lit_bool, lit_date, lit_float, lit_int, lit_null, lit_str, Expr};

/// A scalar value in a plan or a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

const DATE_FORMAT: &str = "%Y-%m-%d";

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Untyped conversion, used for rows and custom columns.
    pub fn from_json(raw: &serde_json::Value) -> Value {
        match raw {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    /// Coerce a raw JSON scalar to the native type of a column.
    pub fn coerce(raw: &serde_json::Value, kind: DataKind, field: &str) -> EngineResult<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match kind {
            DataKind::Number => coerce_number(raw, field),
            DataKind::Text => Ok(match raw {
                serde_json::Value::String(s) => Value::Text(s.clone()),
                other => Value::Text(other.to_string()),
            }),
            DataKind::Date => match raw {
                serde_json::Value::String(s) => parse_date(s)
                    .map(Value::Date)
                    .ok_or_else(|| EngineError::invalid_value(field, s, "a date (yyyy-MM-dd)")),
                other => Err(EngineError::invalid_value(field, other, "a date string")),
            },
            // Stored as ISO text; comparisons are lexicographic.
            DataKind::DateString => match raw {
                serde_json::Value::String(s) => parse_date(s)
                    .map(|d| Value::Text(d.format(DATE_FORMAT).to_string()))
                    .ok_or_else(|| EngineError::invalid_value(field, s, "a date (yyyy-MM-dd)")),
                other => Err(EngineError::invalid_value(field, other, "a date string")),
            },
            DataKind::Boolean => match raw {
                serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
                serde_json::Value::String(s) if s.eq_ignore_ascii_case("true") => {
                    Ok(Value::Bool(true))
                }
                serde_json::Value::String(s) if s.eq_ignore_ascii_case("false") => {
                    Ok(Value::Bool(false))
                }
                other => Err(EngineError::invalid_value(field, other, "a boolean")),
            },
            DataKind::Custom => Ok(Value::from_json(raw)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
        }
    }

    /// SQL literal for this value.
    pub fn to_sql_literal(&self) -> Expr {
        match self {
            Value::Null => lit_null(),
            Value::Bool(b) => lit_bool(*b),
            Value::Int(i) => lit_int(*i),
            Value::Float(f) => lit_float(*f),
            Value::Text(s) => lit_str(s),
            Value::Date(d) => lit_date(&d.format(DATE_FORMAT).to_string()),
        }
    }

    /// Ordering between two non-null values of compatible kinds.
    ///
    /// Returns `None` when either side is null or the kinds don't compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order for sorting: nulls first, then by `compare`.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

fn coerce_number(raw: &serde_json::Value, field: &str) -> EngineResult<Value> {
    match raw {
        serde_json::Value::Number(_) => Ok(Value::from_json(raw)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Ok(Value::Int(i))
            } else {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(Value::Float)
                    .ok_or_else(|| EngineError::invalid_value(field, s, "a number"))
            }
        }
        other => Err(EngineError::invalid_value(field, other, "a number")),
    }
}

/// Parse `yyyy-MM-dd`, `yyyy-MM-dd HH:mm:ss` or the `T`-separated form,
/// keeping only the calendar date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
        return Some(d);
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date())
}
