// Blueprint Types - Type descriptors and port declarations
//
// A `ValueType` describes what flows through a port: a primitive, a list, a
// user-defined struct, or a signal (control flow with no data). Port declarations
// pair a name with a type and an optional literal default.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{Reader, Writer};
use crate::{DecodeError, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Type Descriptors
// ─────────────────────────────────────────────────────────────────────────────

const TAG_SIGNAL: u8 = 0;
const TAG_NUMBER: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_BOOLEAN: u8 = 3;
const TAG_PLAYER: u8 = 4;
const TAG_LIST: u8 = 5;
const TAG_STRUCT: u8 = 6;

/// Deepest list/struct nesting accepted when reading types and values
pub const MAX_NESTING: usize = 64;

pub(crate) fn too_deep() -> DecodeError {
    DecodeError::Malformed(format!("nesting deeper than {MAX_NESTING} levels"))
}

/// Data types that can flow through ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueType {
    /// Control flow (no data)
    Signal,
    /// 64-bit floating point
    Number,
    /// UTF-8 text
    Text,
    Boolean,
    /// Reference to a player by name
    Player,
    /// Homogeneous list
    List { element: Box<ValueType> },
    /// User-defined struct
    Struct { schema: Arc<StructType> },
}

impl ValueType {
    pub fn list(element: ValueType) -> Self {
        ValueType::List {
            element: Box::new(element),
        }
    }

    pub fn structure(schema: Arc<StructType>) -> Self {
        ValueType::Struct { schema }
    }

    /// Check if this is a signal (control flow) type
    pub fn is_signal(&self) -> bool {
        matches!(self, ValueType::Signal)
    }

    /// Human-readable name, e.g. `list<number>` or the declared struct name
    pub fn display_name(&self) -> String {
        match self {
            ValueType::Signal => "signal".to_string(),
            ValueType::Number => "number".to_string(),
            ValueType::Text => "text".to_string(),
            ValueType::Boolean => "boolean".to_string(),
            ValueType::Player => "player".to_string(),
            ValueType::List { element } => format!("list<{}>", element.display_name()),
            ValueType::Struct { schema } => schema.name.clone(),
        }
    }

    /// Parse a name produced by [`ValueType::display_name`]; struct names resolve
    /// against `known`. Signal is not a value type and never parses.
    pub fn parse(name: &str, known: &dyn StructLookup) -> Option<Self> {
        Self::parse_nested(name, known, 0)
    }

    fn parse_nested(name: &str, known: &dyn StructLookup, depth: usize) -> Option<Self> {
        if depth >= MAX_NESTING {
            return None;
        }
        let name = name.trim();
        match name {
            "number" => Some(ValueType::Number),
            "text" => Some(ValueType::Text),
            "boolean" => Some(ValueType::Boolean),
            "player" => Some(ValueType::Player),
            _ => match name.strip_prefix("list<").and_then(|s| s.strip_suffix('>')) {
                Some(element) => ValueType::parse_nested(element, known, depth + 1).map(ValueType::list),
                None => known.lookup_struct(name).map(ValueType::structure),
            },
        }
    }

    /// Whether this type mentions the named struct anywhere (directly or via lists)
    pub fn references_struct(&self, name: &str) -> bool {
        match self {
            ValueType::List { element } => element.references_struct(name),
            ValueType::Struct { schema } => schema.name == name,
            _ => false,
        }
    }

    /// The struct this type holds, looking through lists
    pub fn struct_schema(&self) -> Option<&Arc<StructType>> {
        match self {
            ValueType::List { element } => element.struct_schema(),
            ValueType::Struct { schema } => Some(schema),
            _ => None,
        }
    }

    /// Check that a runtime value has this shape
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Number, Value::Number(_))
            | (ValueType::Text, Value::Text(_))
            | (ValueType::Boolean, Value::Boolean(_))
            | (ValueType::Player, Value::Player(_)) => true,
            (ValueType::List { element }, Value::List(items)) => {
                items.iter().all(|item| element.accepts(item))
            }
            (ValueType::Struct { schema }, Value::Struct { fields, .. }) => {
                schema.fields.len() == fields.len()
                    && schema
                        .fields
                        .iter()
                        .zip(fields)
                        .all(|(decl, (name, v))| decl.name == *name && decl.value_type.accepts(v))
            }
            _ => false,
        }
    }

    /// Encode this descriptor. Structs are written by name only.
    pub fn encode(&self, out: &mut Writer) {
        match self {
            ValueType::Signal => out.u8(TAG_SIGNAL),
            ValueType::Number => out.u8(TAG_NUMBER),
            ValueType::Text => out.u8(TAG_TEXT),
            ValueType::Boolean => out.u8(TAG_BOOLEAN),
            ValueType::Player => out.u8(TAG_PLAYER),
            ValueType::List { element } => {
                out.u8(TAG_LIST);
                element.encode(out);
            }
            ValueType::Struct { schema } => {
                out.u8(TAG_STRUCT);
                out.string(&schema.name);
            }
        }
    }

    /// Decode a descriptor, resolving struct names against already-known structs
    pub fn decode(input: &mut Reader, known: &dyn StructLookup) -> Result<Self, DecodeError> {
        Self::decode_nested(input, known, 0)
    }

    fn decode_nested(input: &mut Reader, known: &dyn StructLookup, depth: usize) -> Result<Self, DecodeError> {
        if depth >= MAX_NESTING {
            return Err(too_deep());
        }
        let tag = input.u8()?;
        let value_type = match tag {
            TAG_SIGNAL => ValueType::Signal,
            TAG_NUMBER => ValueType::Number,
            TAG_TEXT => ValueType::Text,
            TAG_BOOLEAN => ValueType::Boolean,
            TAG_PLAYER => ValueType::Player,
            TAG_LIST => ValueType::list(ValueType::decode_nested(input, known, depth + 1)?),
            TAG_STRUCT => {
                let name = input.string()?;
                let schema = known
                    .lookup_struct(&name)
                    .ok_or(DecodeError::UnknownStructReference(name))?;
                ValueType::Struct { schema }
            }
            other => return Err(DecodeError::UnknownTypeTag(other)),
        };
        Ok(value_type)
    }

    /// Copy one encoded descriptor from `input` to `out` without resolving structs.
    ///
    /// Used by format migrations, which must walk type tables before any struct
    /// definitions are available.
    pub fn transcode(input: &mut Reader, out: &mut Writer) -> Result<(), DecodeError> {
        // Lists are the only nesting, so walk them without recursing
        for _ in 0..MAX_NESTING {
            let tag = input.u8()?;
            out.u8(tag);
            match tag {
                TAG_SIGNAL | TAG_NUMBER | TAG_TEXT | TAG_BOOLEAN | TAG_PLAYER => return Ok(()),
                TAG_LIST => continue,
                TAG_STRUCT => {
                    out.string(&input.string()?);
                    return Ok(());
                }
                other => return Err(DecodeError::UnknownTypeTag(other)),
            }
        }
        Err(too_deep())
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Struct Schemas
// ─────────────────────────────────────────────────────────────────────────────

/// A named field of a struct or a named parameter of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

impl Field {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Shape of a user-defined struct
///
/// Equality is structural: two schemas are equal when their fields match in
/// order, name and type. The declared name is only a lookup key.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<Field>,
}

impl PartialEq for StructType {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl StructType {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Get a field index by name
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Resolves struct names while decoding
pub trait StructLookup {
    fn lookup_struct(&self, name: &str) -> Option<Arc<StructType>>;
}

impl StructLookup for HashMap<String, Arc<StructType>> {
    fn lookup_struct(&self, name: &str) -> Option<Arc<StructType>> {
        self.get(name).cloned()
    }
}

impl StructLookup for Vec<Arc<StructType>> {
    fn lookup_struct(&self, name: &str) -> Option<Arc<StructType>> {
        self.iter().find(|s| s.name == name).cloned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Port Declarations
// ─────────────────────────────────────────────────────────────────────────────

/// Declaration of a single input or output port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDef {
    /// Port name (display only; ports are addressed by index)
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Literal used when an input has no wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PortDef {
    /// Create a signal port
    pub fn signal(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value_type: ValueType::Signal,
            default: None,
        }
    }

    /// Create a value port
    pub fn value(name: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            value_type,
            default: None,
        }
    }

    /// Create a value input with a default used when unconnected
    pub fn with_default(name: &str, value_type: ValueType, default: Value) -> Self {
        Self {
            name: name.to_string(),
            value_type,
            default: Some(default),
        }
    }

    pub fn is_signal(&self) -> bool {
        self.value_type.is_signal()
    }
}

impl From<&Field> for PortDef {
    fn from(field: &Field) -> Self {
        PortDef::value(&field.name, field.value_type.clone())
    }
}

/// Ordered input and output declarations of a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePorts {
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
}

impl NodePorts {
    pub fn new(inputs: Vec<PortDef>, outputs: Vec<PortDef>) -> Self {
        Self { inputs, outputs }
    }

    /// Find an output port index by name
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name == name)
    }

    /// Find an input port index by name
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name == name)
    }
}
