//! Runtime values produced by sensors and the evaluator.
//!
//! Coercion rules live here so the evaluator and the built-in functions agree
//! on them:
//!
//! - *numeric view*: numbers are themselves; strings whose trimmed text is a
//!   plain decimal (`-?digits(.digits)?`, e.g. `12`, `-0.5`) are that number;
//!   exponents, a leading `+` or `.`, `inf` and `NaN` are not numbers.
//!   Booleans and [`Value::Absent`] have none.
//! - *text view*: `true`/`false`, the shortest decimal for numbers (no
//!   fraction for integers), the string itself, and the empty string for
//!   absent.
//! - *logical view*: booleans are themselves, the strings `true`/`false`
//!   (ASCII case-insensitive) are booleans, absent is `false`, anything else
//!   has none.

use std::fmt;

use serde::Serialize;

/// A value in the expression language.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Str(String),
    /// A sensor had nothing meaningful to report (e.g. no active session).
    Absent,
}

impl Value {
    /// The canonical `true` result.
    pub const TRUE: Value = Value::Bool(true);
    /// The canonical `false` result.
    pub const FALSE: Value = Value::Bool(false);

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Whether this is exactly the canonical `true`.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Short name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Absent => "absent",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => parse_decimal(s.trim()),
            Value::Bool(_) | Value::Absent => None,
        }
    }

    pub fn as_logical(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Str(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Value::Str(s) if s.eq_ignore_ascii_case("false") => Some(false),
            Value::Absent => Some(false),
            _ => None,
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Absent => String::new(),
        }
    }

    /// Whether two observations of a sensor are the same value. Unlike `==`,
    /// `NaN` is the same as `NaN`.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    /// `=` semantics: absent equals only absent, then numeric comparison when
    /// both sides have a numeric view, else text comparison.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Absent, Value::Absent) => true,
            (Value::Absent, _) | (_, Value::Absent) => false,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => self.to_text() == other.to_text(),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Absent => f.write_str("<absent>"),
            other => f.write_str(&other.to_text()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Absent, Into::into)
    }
}

/// `-?digits(.digits)?`, finite.
fn parse_decimal(text: &str) -> Option<f64> {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(int) || frac.is_some_and(|f| !digits(f)) {
        return None;
    }
    text.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
