//! Positional records exchanged with the host runtime.
//!
//! A [`Record`] is an ordered list of up to four [`Slot`]s laid out as
//! `id, body, properties, groupBy`. Trailing slots may be omitted; the codec
//! decides what each slot means from the record length alone.

use serde_json::Value;

use crate::{codec::CodecError, envelope::Properties};

/// Name of the identity slot.
pub const ID_FIELD: &str = "id";
/// Name of the body slot.
pub const BODY_FIELD: &str = "body";
/// Name of the properties slot.
pub const PROPERTIES_FIELD: &str = "properties";
/// Name of the partition key slot.
pub const GROUP_BY_FIELD: &str = "groupBy";

/// Slot names in positional order, for hosts that declare output fields.
pub const FIELDS: [&str; 4] = [ID_FIELD, BODY_FIELD, PROPERTIES_FIELD, GROUP_BY_FIELD];

/// A single value inside a positional record.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Explicitly absent value.
    Null,
    /// Textual value, e.g. an id, a partition key or a serialized body.
    Text(String),
    /// Raw byte sequence, typically a serialized body.
    Bytes(Vec<u8>),
    /// String-keyed mapping.
    Map(Properties),
    /// Any other structured value (numbers, arrays, booleans).
    Json(Value),
}

impl Slot {
    /// Short name of the slot shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Slot::Null => "null",
            Slot::Text(_) => "text",
            Slot::Bytes(_) => "bytes",
            Slot::Map(_) => "map",
            Slot::Json(Value::String(_)) => "text",
            Slot::Json(Value::Object(_)) => "map",
            Slot::Json(Value::Null) => "null",
            Slot::Json(_) => "value",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Slot::Null | Slot::Json(Value::Null))
    }

    /// Return the slot as text if it is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Slot::Text(text) => Some(text),
            Slot::Json(Value::String(text)) => Some(text),
            _ => None,
        }
    }

    /// Return the slot as a string-keyed mapping if it is map-shaped.
    pub fn as_map(&self) -> Option<&Properties> {
        match self {
            Slot::Map(map) => Some(map),
            Slot::Json(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for Slot {
    fn from(value: &str) -> Self {
        Slot::Text(value.to_owned())
    }
}

impl From<String> for Slot {
    fn from(value: String) -> Self {
        Slot::Text(value)
    }
}

impl From<Vec<u8>> for Slot {
    fn from(value: Vec<u8>) -> Self {
        Slot::Bytes(value)
    }
}

impl From<&[u8]> for Slot {
    fn from(value: &[u8]) -> Self {
        Slot::Bytes(value.to_vec())
    }
}

impl From<Properties> for Slot {
    fn from(value: Properties) -> Self {
        Slot::Map(value)
    }
}

/// Normalizes JSON strings, objects and nulls into their dedicated variants.
impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Slot::Null,
            Value::String(text) => Slot::Text(text),
            Value::Object(map) => Slot::Map(map),
            other => Slot::Json(other),
        }
    }
}

impl<T: Into<Slot>> From<Option<T>> for Slot {
    fn from(value: Option<T>) -> Self {
        value.map_or(Slot::Null, Into::into)
    }
}

/// Ordered list of slots delivered by, or handed back to, the host runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(Vec<Slot>);

impl Record {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self(slots)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.0.get(index)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.0
    }

    pub fn into_slots(self) -> Vec<Slot> {
        self.0
    }
}

impl From<Vec<Slot>> for Record {
    fn from(value: Vec<Slot>) -> Self {
        Self(value)
    }
}

impl FromIterator<Slot> for Record {
    fn from_iter<I: IntoIterator<Item = Slot>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl AsRef<Record> for Record {
    fn as_ref(&self) -> &Record {
        self
    }
}

/// Build a record from a JSON array, one slot per element.
impl TryFrom<Value> for Record {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => Ok(items.into_iter().map(Slot::from).collect()),
            other => Err(CodecError::malformed(format!(
                "a record must be a JSON array, got {other}"
            ))),
        }
    }
}
