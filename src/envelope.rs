use serde_json::Value;

use crate::record::Slot;

/// String-keyed message metadata.
///
/// Keys are unique and ordering carries no meaning.
pub type Properties = serde_json::Map<String, Value>;

/// Canonical in-memory representation of one message.
///
/// `Envelope` carries an identity, a typed body, free-form properties and the
/// partition key used when the message is written to a partitioned stream.
///
/// ## Body representations
///
/// The body is held in two forms:
///
/// - `raw_body`: the slot exactly as it arrived in the positional record,
///   before any type-directed deserialization
/// - `body`: the strongly typed value, present only when deserialization
///   against `T` succeeded
///
/// A record carrying only a body slot is decoded into `raw_body` alone. When
/// deserialization fails the codec leaves `body` empty, so callers check
/// [`Envelope::body`] rather than expecting an error.
///
/// ## Example
///
/// ```rust
/// use serde_json::json;
/// use streampost::Envelope;
///
/// let mut envelope = Envelope::new(json!({"temp": 42}))
///     .with_id("m-1")
///     .with_group_key("sensor-7");
/// envelope.set_property("unit", "C");
///
/// assert_eq!(envelope.property_as::<String>("unit").as_deref(), Some("C"));
/// assert_eq!(envelope.property_as::<i64>("unit"), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Upstream-assigned identity, used for traceability.
    pub id: Option<String>,
    /// Typed body, once deserialized.
    pub body: Option<T>,
    /// Body slot as received, before deserialization.
    pub raw_body: Option<Slot>,
    /// Message metadata.
    pub properties: Properties,
    /// Partition key; the empty string when none was supplied.
    pub group_key: String,
}

impl<T> Default for Envelope<T> {
    fn default() -> Self {
        Self {
            id: None,
            body: None,
            raw_body: None,
            properties: Properties::new(),
            group_key: String::new(),
        }
    }
}

impl<T> Envelope<T> {
    /// Create an envelope around a typed body.
    pub fn new(body: T) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_group_key(mut self, group_key: impl Into<String>) -> Self {
        self.group_key = group_key.into();
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn body(&self) -> Option<&T> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<T> {
        self.body.take()
    }

    pub fn raw_body(&self) -> Option<&Slot> {
        self.raw_body.as_ref()
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Look up a property and read it as `V`.
    ///
    /// Returns `None` both when the property is missing and when the stored
    /// value has a different JSON kind than `V` expects.
    pub fn property_as<V: FromProperty>(&self, name: &str) -> Option<V> {
        self.property(name).and_then(V::from_property)
    }

    /// Insert or overwrite a property.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }
}

impl<T> From<(String, T)> for Envelope<T> {
    fn from((id, body): (String, T)) -> Self {
        Envelope::new(body).with_id(id)
    }
}

/// Types a property value can be read back as.
///
/// Implementations only accept the JSON kind they correspond to; no coercion
/// between strings, numbers and booleans takes place.
pub trait FromProperty: Sized {
    fn from_property(value: &Value) -> Option<Self>;
}

impl FromProperty for Value {
    fn from_property(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromProperty for String {
    fn from_property(value: &Value) -> Option<Self> {
        value.as_str().map(ToOwned::to_owned)
    }
}

impl FromProperty for bool {
    fn from_property(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromProperty for i64 {
    fn from_property(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromProperty for u64 {
    fn from_property(value: &Value) -> Option<Self> {
        value.as_u64()
    }
}

/// Only floating point numbers; integers stay integers.
impl FromProperty for f64 {
    fn from_property(value: &Value) -> Option<Self> {
        if value.is_f64() { value.as_f64() } else { None }
    }
}

impl FromProperty for Vec<Value> {
    fn from_property(value: &Value) -> Option<Self> {
        value.as_array().cloned()
    }
}

impl FromProperty for Properties {
    fn from_property(value: &Value) -> Option<Self> {
        value.as_object().cloned()
    }
}
