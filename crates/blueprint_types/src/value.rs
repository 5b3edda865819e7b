//! Runtime values that flow between nodes during evaluation
//!
//! Every non-signal [`ValueType`](crate::ValueType) has a matching variant here.
//! Values also serve as node literals (constants, port defaults), so they carry
//! their own binary encoding for node payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{Reader, Writer};
use crate::types::{too_deep, MAX_NESTING};
use crate::DecodeError;

const TAG_NUMBER: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_BOOLEAN: u8 = 3;
const TAG_PLAYER: u8 = 4;
const TAG_LIST: u8 = 5;
const TAG_STRUCT: u8 = 6;

// ─────────────────────────────────────────────────────────────────────────────
// Value Type
// ─────────────────────────────────────────────────────────────────────────────

/// A concrete value produced by a node output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Player name
    Player(String),
    List(Vec<Value>),
    /// Struct instance with fields in declaration order
    Struct {
        name: String,
        fields: Vec<(String, Value)>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Accessors
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_player(&self) -> Option<&str> {
        match self {
            Value::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get a struct field by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct { fields, .. } => {
                fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Short name of the variant, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Boolean(_) => "boolean",
            Value::Player(_) => "player",
            Value::List(_) => "list",
            Value::Struct { .. } => "struct",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Binary Encoding
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    pub fn encode(&self, out: &mut Writer) {
        match self {
            Value::Number(n) => {
                out.u8(TAG_NUMBER);
                out.f64(*n);
            }
            Value::Text(s) => {
                out.u8(TAG_TEXT);
                out.string(s);
            }
            Value::Boolean(b) => {
                out.u8(TAG_BOOLEAN);
                out.bool(*b);
            }
            Value::Player(p) => {
                out.u8(TAG_PLAYER);
                out.string(p);
            }
            Value::List(items) => {
                out.u8(TAG_LIST);
                out.count(items.len());
                for item in items {
                    item.encode(out);
                }
            }
            Value::Struct { name, fields } => {
                out.u8(TAG_STRUCT);
                out.string(name);
                out.count(fields.len());
                for (field, value) in fields {
                    out.string(field);
                    value.encode(out);
                }
            }
        }
    }

    pub fn decode(input: &mut Reader) -> Result<Self, DecodeError> {
        Self::decode_nested(input, 0)
    }

    fn decode_nested(input: &mut Reader, depth: usize) -> Result<Self, DecodeError> {
        if depth >= MAX_NESTING {
            return Err(too_deep());
        }
        let value = match input.u8()? {
            TAG_NUMBER => Value::Number(input.f64()?),
            TAG_TEXT => Value::Text(input.string()?),
            TAG_BOOLEAN => Value::Boolean(input.bool()?),
            TAG_PLAYER => Value::Player(input.string()?),
            TAG_LIST => {
                let count = input.count()?;
                let mut items = Vec::with_capacity(count.min(input.remaining()));
                for _ in 0..count {
                    items.push(Value::decode_nested(input, depth + 1)?);
                }
                Value::List(items)
            }
            TAG_STRUCT => {
                let name = input.string()?;
                let count = input.count()?;
                let mut fields = Vec::with_capacity(count.min(input.remaining()));
                for _ in 0..count {
                    let field = input.string()?;
                    fields.push((field, Value::decode_nested(input, depth + 1)?));
                }
                Value::Struct { name, fields }
            }
            other => return Err(DecodeError::UnknownValueTag(other)),
        };
        Ok(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversions
// ─────────────────────────────────────────────────────────────────────────────

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(f64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Player(p) => write!(f, "@{}", p),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Struct { name, fields } => {
                write!(f, "{} {{", name)?;
                for (i, (field, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, " {}: {}", field, value)?;
                }
                f.write_str(" }")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
