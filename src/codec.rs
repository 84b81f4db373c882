//! Conversion between positional records, envelopes and serialized bodies.
//!
//! The [`Codec`] owns the wire rules of the envelope protocol:
//!
//! - [`Codec::decode`] turns a 1 to 4 slot [`Record`] into an [`Envelope`]
//! - [`Codec::encode`] turns an [`Envelope`] back into a 4 slot [`Record`]
//! - [`Codec::serialize`] / [`Codec::deserialize`] handle the body text
//!
//! Bodies are written as compact JSON with null object members left out, so
//! `Option::None` fields disappear from the wire. Empty strings, arrays and
//! objects are kept: a body must deserialize back into the type that wrote
//! it, and serde does not default missing non-optional fields. Types that
//! want those dropped too use `skip_serializing_if` with `#[serde(default)]`.
//! Types that need a representation other than their serde one are handled
//! by modules installed in a [`ModuleRegistry`].

#[cfg(feature = "geo")]
pub mod geojson;
pub mod module;

use std::{any::Any, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing_error::SpanTrace;

use crate::{
    Envelope,
    envelope::Properties,
    record::{Record, Slot},
};

pub use module::{Module, ModuleRegistry};

/// Envelope and body codec.
///
/// Cloning is cheap; the module registry is shared.
#[derive(Debug, Clone)]
pub struct Codec {
    modules: Arc<ModuleRegistry>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Create a codec with the default modules installed.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CodecBuilder {
        CodecBuilder::default()
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Decode a positional record into an envelope.
    ///
    /// The record length selects which slots are present:
    ///
    /// | slots | `id` | body | `properties` | `group_key` |
    /// |-------|------|------|--------------|-------------|
    /// | 1     | -    | raw only | -        | -           |
    /// | 2     | ✓    | ✓    | -            | -           |
    /// | 3     | ✓    | ✓    | ✓            | -           |
    /// | 4     | ✓    | ✓    | ✓            | ✓           |
    ///
    /// Slot shape errors fail the whole record with a malformed envelope
    /// error. A body that does not deserialize into `T` is logged and left
    /// empty; the raw slot is kept in [`Envelope::raw_body`].
    #[tracing::instrument(skip_all, fields(slots = record.len()))]
    pub fn decode<T>(&self, record: &Record) -> Result<Envelope<T>, CodecError>
    where
        T: DeserializeOwned + 'static,
    {
        let mut envelope = self.decode_raw(record)?;
        if record.len() > 1 {
            self.load_body(&mut envelope);
        }
        Ok(envelope)
    }

    /// Decode the envelope fields of a record without touching the body.
    ///
    /// Slot shapes are checked as in [`decode`](Codec::decode), but the body
    /// slot is only stored in [`Envelope::raw_body`].
    pub fn decode_raw<T>(&self, record: &Record) -> Result<Envelope<T>, CodecError> {
        let mut envelope = Envelope::default();

        let body = match record.slots() {
            [body] => body,
            [id, body] => {
                envelope.id = read_id(id)?;
                body
            }
            [id, body, properties] => {
                envelope.id = read_id(id)?;
                envelope.properties = read_properties(properties)?;
                body
            }
            [id, body, properties, group_key] => {
                envelope.id = read_id(id)?;
                envelope.properties = read_properties(properties)?;
                envelope.group_key = read_group_key(group_key)?;
                body
            }
            slots => {
                return Err(CodecError::malformed(format!(
                    "a record carries 1 to 4 slots, got {}",
                    slots.len()
                )));
            }
        };

        envelope.raw_body = Some(body.clone());
        Ok(envelope)
    }

    /// Encode an envelope into a 4 slot record.
    ///
    /// A typed body is serialized to text; without one the raw body slot is
    /// passed through. Missing ids and empty partition keys become
    /// [`Slot::Null`].
    pub fn encode<T>(&self, envelope: &Envelope<T>) -> Result<Record, CodecError>
    where
        T: Serialize + 'static,
    {
        let body = match (&envelope.body, &envelope.raw_body) {
            (Some(body), _) => Slot::Text(self.serialize(body)?),
            (None, Some(raw)) => raw.clone(),
            (None, None) => Slot::Null,
        };
        let group_key = if envelope.group_key.is_empty() {
            Slot::Null
        } else {
            Slot::Text(envelope.group_key.clone())
        };

        Ok(Record::from(vec![
            Slot::from(envelope.id.clone()),
            body,
            Slot::Map(envelope.properties.clone()),
            group_key,
        ]))
    }

    /// Convert a value into its JSON tree, applying modules and dropping
    /// null object members.
    pub fn to_value<T>(&self, value: &T) -> Result<Value, CodecError>
    where
        T: Serialize + 'static,
    {
        let mut json = match self.modules.encode(value) {
            Some(encoded) => encoded.map_err(CodecError::serialization)?,
            None => serde_json::to_value(value)
                .map_err(|e| CodecError::serialization(Box::new(e)))?,
        };
        prune_nulls(&mut json);
        Ok(json)
    }

    /// Serialize a value to compact JSON text.
    pub fn serialize<T>(&self, value: &T) -> Result<String, CodecError>
    where
        T: Serialize + 'static,
    {
        let json = self.to_value(value)?;
        serde_json::to_string(&json).map_err(|e| CodecError::serialization(Box::new(e)))
    }

    /// Deserialize text or bytes into `T`.
    pub fn deserialize<T>(&self, input: impl AsRef<[u8]>) -> Result<T, CodecError>
    where
        T: DeserializeOwned + 'static,
    {
        let input = input.as_ref();
        if self.modules.contains::<T>() {
            let json: Value = serde_json::from_slice(input)
                .map_err(|e| CodecError::deserialization(Box::new(e)))?;
            self.convert_value(json)
        } else {
            serde_json::from_slice(input).map_err(|e| CodecError::deserialization(Box::new(e)))
        }
    }

    /// Convert an already parsed JSON value into `T`.
    pub fn convert_value<T>(&self, value: Value) -> Result<T, CodecError>
    where
        T: DeserializeOwned + 'static,
    {
        if !self.modules.contains::<T>() {
            return serde_json::from_value(value)
                .map_err(|e| CodecError::deserialization(Box::new(e)));
        }
        match self.modules.decode(value) {
            Some(decoded) => decoded.map_err(CodecError::deserialization),
            None => Err(CodecError::deserialization(
                format!("no decoder registered for {}", std::any::type_name::<T>()).into(),
            )),
        }
    }

    /// Single line rendering of an envelope for diagnostics.
    pub fn describe<T>(&self, envelope: &Envelope<T>) -> String
    where
        T: Serialize + 'static,
    {
        let properties = self.text_or_null(&envelope.properties);
        let body = match &envelope.body {
            Some(body) => self.text_or_null(body),
            None => "null".to_owned(),
        };
        format!(
            "Envelope {{id={}, properties={}, groupKey={}, body={}}}",
            envelope.id.as_deref().unwrap_or("null"),
            properties,
            envelope.group_key,
            body,
        )
    }

    fn text_or_null<T: Serialize + 'static>(&self, value: &T) -> String {
        self.serialize(value).unwrap_or_else(|error| {
            tracing::error!(%error, "Error serializing value");
            "null".to_owned()
        })
    }

    fn load_body<T>(&self, envelope: &mut Envelope<T>)
    where
        T: DeserializeOwned + 'static,
    {
        let Some(slot) = &envelope.raw_body else {
            return;
        };
        envelope.body = match self.read_body(slot) {
            Ok(body) => body,
            Err(error) => {
                tracing::error!(id = envelope.id.as_deref(), %error, "Error deserializing envelope body");
                None
            }
        };
    }

    fn read_body<T>(&self, slot: &Slot) -> Result<Option<T>, CodecError>
    where
        T: DeserializeOwned + 'static,
    {
        let body = match slot {
            Slot::Null | Slot::Json(Value::Null) => return Ok(None),
            Slot::Text(text) => self.deserialize(text)?,
            Slot::Bytes(bytes) => self.deserialize(bytes)?,
            Slot::Map(map) => self.convert_value(Value::Object(map.clone()))?,
            Slot::Json(value) => self.convert_value(value.clone())?,
        };
        Ok(Some(body))
    }
}

fn read_id(slot: &Slot) -> Result<Option<String>, CodecError> {
    if slot.is_null() {
        return Ok(None);
    }
    slot.as_text()
        .map(|id| Some(id.to_owned()))
        .ok_or_else(|| CodecError::malformed(format!("id slot must be text, got {}", slot.kind())))
}

fn read_properties(slot: &Slot) -> Result<Properties, CodecError> {
    if slot.is_null() {
        return Ok(Properties::new());
    }
    slot.as_map().cloned().ok_or_else(|| {
        CodecError::malformed(format!("properties slot must be a map, got {}", slot.kind()))
    })
}

fn read_group_key(slot: &Slot) -> Result<String, CodecError> {
    if slot.is_null() {
        return Ok(String::new());
    }
    slot.as_text().map(ToOwned::to_owned).ok_or_else(|| {
        CodecError::malformed(format!("groupBy slot must be text, got {}", slot.kind()))
    })
}

/// Drop null object members at every depth.
///
/// An object left without members stays in place as `{}`. Array elements are
/// never removed.
fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, member| !member.is_null());
            map.values_mut().for_each(prune_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(prune_nulls),
        _ => {}
    }
}

/// Builder for [`Codec`].
pub struct CodecBuilder {
    registry: ModuleRegistry,
    default_modules: bool,
}

impl Default for CodecBuilder {
    fn default() -> Self {
        Self {
            registry: ModuleRegistry::new(),
            default_modules: true,
        }
    }
}

impl CodecBuilder {
    /// Install an additional module.
    pub fn module<M: Module>(mut self, module: M) -> Self {
        self.registry.install(module);
        self
    }

    /// Register a single type without writing a [`Module`].
    pub fn register<V, E, D>(mut self, encode: E, decode: D) -> Self
    where
        V: Any + Send,
        E: Fn(&V) -> Result<Value, tower::BoxError> + Send + Sync + 'static,
        D: Fn(Value) -> Result<V, tower::BoxError> + Send + Sync + 'static,
    {
        self.registry.register(encode, decode);
        self
    }

    /// Skip the modules installed by default (GeoJSON with the `geo` feature).
    pub fn without_default_modules(mut self) -> Self {
        self.default_modules = false;
        self
    }

    pub fn build(self) -> Codec {
        let mut registry = ModuleRegistry::new();
        if self.default_modules {
            #[cfg(feature = "geo")]
            registry.install(geojson::GeoJsonModule);
        }
        // Explicit registrations win over defaults for the same type.
        registry.merge(self.registry);
        Codec {
            modules: Arc::new(registry),
        }
    }
}

/// Error returned by codec operations.
///
/// Captures a tracing span backtrace alongside the error kind.
#[derive(Debug)]
pub struct CodecError {
    context: SpanTrace,
    kind: CodecErrorKind,
}

/// Codec error kinds.
#[derive(Debug)]
pub enum CodecErrorKind {
    /// Record arity or slot shapes do not match the envelope protocol.
    MalformedEnvelope(String),
    /// A body or value could not be read as the requested type.
    Deserialization(tower::BoxError),
    /// A body or value could not be written.
    Serialization(tower::BoxError),
}

impl CodecError {
    pub fn kind(&self) -> &CodecErrorKind {
        &self.kind
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: CodecErrorKind::MalformedEnvelope(reason.into()),
        }
    }

    pub(crate) fn deserialization(err: tower::BoxError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: CodecErrorKind::Deserialization(err),
        }
    }

    pub(crate) fn serialization(err: tower::BoxError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: CodecErrorKind::Serialization(err),
        }
    }
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            CodecErrorKind::MalformedEnvelope(reason) => writeln!(f, "Malformed envelope: {reason}"),
            CodecErrorKind::Deserialization(err) => writeln!(f, "Deserialization error: {err}"),
            CodecErrorKind::Serialization(err) => writeln!(f, "Serialization error: {err}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            CodecErrorKind::MalformedEnvelope(_) => None,
            CodecErrorKind::Deserialization(err) => Some(err.as_ref()),
            CodecErrorKind::Serialization(err) => Some(err.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        temp: i64,
    }

    fn properties(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn decodes_four_slot_record() {
        let codec = Codec::new();
        let record = Record::from(vec![
            "m-1".into(),
            r#"{"temp":42}"#.into(),
            properties(json!({"unit": "C"})).into(),
            "sensor-7".into(),
        ]);

        let envelope: Envelope<Reading> = codec.decode(&record).unwrap();

        assert_eq!(envelope.id(), Some("m-1"));
        assert_eq!(envelope.body(), Some(&Reading { temp: 42 }));
        assert_eq!(envelope.properties, properties(json!({"unit": "C"})));
        assert_eq!(envelope.group_key(), "sensor-7");
    }

    #[test]
    fn single_slot_keeps_raw_body_only() {
        let codec = Codec::new();
        let record = Record::from(vec!["just-a-body-string".into()]);

        let envelope: Envelope<Reading> = codec.decode(&record).unwrap();

        assert_eq!(envelope.id(), None);
        assert_eq!(envelope.body(), None);
        assert_eq!(
            envelope.raw_body(),
            Some(&Slot::Text("just-a-body-string".into()))
        );
        assert!(envelope.properties.is_empty());
        assert_eq!(envelope.group_key(), "");
    }

    #[test]
    fn two_and_three_slot_records_default_the_rest() {
        let codec = Codec::new();

        let two = Record::from(vec!["m-2".into(), r#"{"temp":1}"#.into()]);
        let envelope: Envelope<Reading> = codec.decode(&two).unwrap();
        assert_eq!(envelope.id(), Some("m-2"));
        assert_eq!(envelope.body(), Some(&Reading { temp: 1 }));
        assert!(envelope.properties.is_empty());
        assert_eq!(envelope.group_key(), "");

        let three = Record::from(vec![
            "m-3".into(),
            r#"{"temp":2}"#.into(),
            properties(json!({"unit": "F"})).into(),
        ]);
        let envelope: Envelope<Reading> = codec.decode(&three).unwrap();
        assert_eq!(envelope.property_as::<String>("unit").as_deref(), Some("F"));
        assert_eq!(envelope.group_key(), "");
    }

    #[test]
    fn bytes_bodies_are_parsed() {
        let codec = Codec::new();
        let record = Record::from(vec!["m-1".into(), br#"{"temp":7}"#.to_vec().into()]);
        let envelope: Envelope<Reading> = codec.decode(&record).unwrap();
        assert_eq!(envelope.body(), Some(&Reading { temp: 7 }));
    }

    #[test]
    fn structured_bodies_are_converted() {
        let codec = Codec::new();
        let record = Record::from(vec![
            "m-1".into(),
            Slot::Map(properties(json!({"temp": 9}))),
        ]);
        let envelope: Envelope<Reading> = codec.decode(&record).unwrap();
        assert_eq!(envelope.body(), Some(&Reading { temp: 9 }));
    }

    #[test]
    fn unparsable_body_is_left_empty() {
        let codec = Codec::new();
        let record = Record::from(vec![
            "m-1".into(),
            r#"{"temp":"warm"}"#.into(),
            Slot::Null,
            "sensor-7".into(),
        ]);

        let envelope: Envelope<Reading> = codec.decode(&record).unwrap();

        assert_eq!(envelope.body(), None);
        assert_eq!(envelope.raw_body(), Some(&Slot::Text(r#"{"temp":"warm"}"#.into())));
        assert_eq!(envelope.group_key(), "sensor-7");
        assert!(envelope.properties.is_empty());
    }

    #[test]
    fn malformed_slots_fail_the_record() {
        let codec = Codec::new();

        let bad_id = Record::from(vec![Slot::Json(json!(12)), "{}".into()]);
        let bad_properties = Record::from(vec!["m-1".into(), "{}".into(), "not-a-map".into()]);
        let bad_group_key = Record::from(vec![
            "m-1".into(),
            "{}".into(),
            Slot::Null,
            Slot::Json(json!(7)),
        ]);

        for record in [bad_id, bad_properties, bad_group_key] {
            let err = codec.decode::<Value>(&record).unwrap_err();
            assert!(
                matches!(err.kind(), CodecErrorKind::MalformedEnvelope(_)),
                "{err}"
            );
        }
    }

    #[test]
    fn empty_and_oversized_records_are_malformed() {
        let codec = Codec::new();
        let empty = Record::default();
        let oversized: Record = std::iter::repeat_n(Slot::Null, 5).collect();

        for record in [empty, oversized] {
            let err = codec.decode::<Value>(&record).unwrap_err();
            assert!(matches!(err.kind(), CodecErrorKind::MalformedEnvelope(_)));
        }
    }

    #[test]
    fn encode_then_decode_preserves_envelope() {
        let codec = Codec::new();
        let record = Record::from(vec![
            "m-1".into(),
            r#"{"temp":42}"#.into(),
            properties(json!({"unit": "C", "nested": {"depth": 2}})).into(),
            "sensor-7".into(),
        ]);

        let decoded: Envelope<Reading> = codec.decode(&record).unwrap();
        let encoded = codec.encode(&decoded).unwrap();
        let again: Envelope<Reading> = codec.decode(&encoded).unwrap();

        assert_eq!(encoded.len(), 4);
        assert_eq!(again.id, decoded.id);
        assert_eq!(again.body, decoded.body);
        assert_eq!(again.properties, decoded.properties);
        assert_eq!(again.group_key, decoded.group_key);
    }

    #[test]
    fn encode_uses_null_for_missing_fields() {
        let codec = Codec::new();
        let envelope = Envelope::<Reading>::default();

        let record = codec.encode(&envelope).unwrap();

        assert_eq!(
            record.slots(),
            &[Slot::Null, Slot::Null, Slot::Map(Properties::new()), Slot::Null]
        );
    }

    #[test]
    fn encode_passes_raw_body_through() {
        let codec = Codec::new();
        let envelope: Envelope<Reading> = codec
            .decode(&Record::from(vec!["opaque".into()]))
            .unwrap();

        let record = codec.encode(&envelope).unwrap();

        assert_eq!(record.get(1), Some(&Slot::Text("opaque".into())));
    }

    #[test]
    fn serialize_omits_null_members_only() {
        let codec = Codec::new();
        let value = json!({
            "name": "",
            "tags": [],
            "meta": {"note": null},
            "temp": 0,
            "ok": false,
            "gone": null,
            "items": [{"a": null, "b": 1}, null],
        });

        assert_eq!(
            codec.serialize(&value).unwrap(),
            r#"{"items":[{"b":1},null],"meta":{},"name":"","ok":false,"tags":[],"temp":0}"#
        );
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tagged {
        temp: i64,
        label: String,
        tags: Vec<String>,
    }

    #[test]
    fn empty_strings_and_collections_survive_a_round_trip() {
        let codec = Codec::new();
        let record = Record::from(vec![
            "m-1".into(),
            r#"{"temp":42,"label":"","tags":[]}"#.into(),
            properties(json!({"unit": "C"})).into(),
            "sensor-7".into(),
        ]);

        let decoded: Envelope<Tagged> = codec.decode(&record).unwrap();
        let encoded = codec.encode(&decoded).unwrap();
        let again: Envelope<Tagged> = codec.decode(&encoded).unwrap();

        let expected = Tagged {
            temp: 42,
            label: String::new(),
            tags: Vec::new(),
        };
        assert_eq!(decoded.body(), Some(&expected));
        assert_eq!(again.body(), Some(&expected));
    }

    #[test]
    fn decode_raw_skips_the_body() {
        let codec = Codec::new();
        let record = Record::from(vec![
            "m-1".into(),
            "plain text body".into(),
            Slot::Null,
            "sensor-7".into(),
        ]);

        let envelope: Envelope<Reading> = codec.decode_raw(&record).unwrap();

        assert_eq!(envelope.id(), Some("m-1"));
        assert_eq!(envelope.body(), None);
        assert_eq!(envelope.raw_body(), Some(&Slot::Text("plain text body".into())));
        assert_eq!(envelope.group_key(), "sensor-7");
        assert!(codec.decode_raw::<Reading>(&Record::default()).is_err());
    }

    #[derive(Serialize, Deserialize)]
    struct Optional {
        label: Option<String>,
        count: u32,
    }

    #[test]
    fn serialize_skips_absent_options() {
        let codec = Codec::new();
        let text = codec
            .serialize(&Optional {
                label: None,
                count: 3,
            })
            .unwrap();
        assert_eq!(text, r#"{"count":3}"#);

        let back: Optional = codec.deserialize(&text).unwrap();
        assert_eq!(back.label, None);
        assert_eq!(back.count, 3);
    }

    #[test]
    fn deserialize_reports_type_mismatch() {
        let codec = Codec::new();
        let err = codec.deserialize::<Reading>(r#""warm""#).unwrap_err();
        assert!(matches!(err.kind(), CodecErrorKind::Deserialization(_)));
    }

    #[test]
    fn registered_types_override_serde() {
        let codec = Codec::builder()
            .register::<Reading, _, _>(
                |reading| Ok(json!({ "celsius": reading.temp })),
                |value| {
                    Ok(Reading {
                        temp: value["celsius"].as_i64().ok_or("missing celsius")?,
                    })
                },
            )
            .build();

        assert_eq!(
            codec.serialize(&Reading { temp: 5 }).unwrap(),
            r#"{"celsius":5}"#
        );
        assert_eq!(
            codec.deserialize::<Reading>(r#"{"celsius":6}"#).unwrap(),
            Reading { temp: 6 }
        );
        assert!(codec.deserialize::<Reading>(r#"{"temp":6}"#).is_err());
    }

    #[test]
    fn describe_renders_all_fields() {
        let codec = Codec::new();
        let mut envelope = Envelope::new(Reading { temp: 42 })
            .with_id("m-1")
            .with_group_key("sensor-7");
        envelope.set_property("unit", "C");

        assert_eq!(
            codec.describe(&envelope),
            r#"Envelope {id=m-1, properties={"unit":"C"}, groupKey=sensor-7, body={"temp":42}}"#
        );
    }

    #[cfg(feature = "geo")]
    #[test]
    fn geometry_bodies_use_geojson() {
        use geo_types::{Geometry, point};

        let codec = Codec::new();
        let record = Record::from(vec![
            "g-1".into(),
            r#"{"type":"Point","coordinates":[13.4,52.5]}"#.into(),
        ]);

        let envelope: Envelope<Geometry<f64>> = codec.decode(&record).unwrap();
        assert_eq!(envelope.body(), Some(&Geometry::Point(point!(x: 13.4, y: 52.5))));

        let encoded = codec.encode(&envelope).unwrap();
        assert_eq!(
            encoded.get(1),
            Some(&Slot::Text(
                r#"{"coordinates":[13.4,52.5],"type":"Point"}"#.into()
            ))
        );
    }

    #[cfg(feature = "geo")]
    #[test]
    fn default_modules_can_be_skipped() {
        use geo_types::Geometry;

        assert!(Codec::new().modules().contains::<Geometry<f64>>());
        let bare = Codec::builder().without_default_modules().build();
        assert!(!bare.modules().contains::<Geometry<f64>>());
    }
}
