//! Integer-or-float numbers used by ranges, `$random` bounds and expressions.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

/// A number that remembers whether it was written as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    /// Parse a literal the way templates write it: a decimal point makes a
    /// float, anything else must be an integer.
    pub fn parse_literal(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.contains('.') {
            s.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Num::Float)
        } else {
            s.parse::<i64>().ok().map(Num::Int)
        }
    }

    /// Read a JSON number, keeping integers as integers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Num::Int)
                .or_else(|| n.as_f64().map(Num::Float)),
            _ => None,
        }
    }

    /// Convert to a JSON value; `None` for NaN or infinity.
    pub fn to_value(self) -> Option<Value> {
        match self {
            Num::Int(i) => Some(Value::from(i)),
            Num::Float(f) => Number::from_f64(f).map(Value::Number),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(self, Num::Int(_))
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Num::Int(i) => write!(f, "{}", i),
            Num::Float(x) => write!(f, "{}", x),
        }
    }
}
