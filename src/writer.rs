//! Partitioned stream writer.
//!
//! The [`StreamWriter`] sits at the end of a processing pipeline. For every
//! unit of work handed over by the host runtime it:
//!
//! - Decodes the unit's positional record into an [`Envelope`]
//! - Publishes the body to the configured stream, keyed by the envelope's
//!   partition key
//!
//! By default bodies that arrive as text or bytes are published verbatim and
//! only structured bodies are serialized. A writer given a typed body with
//! [`with_body`](StreamWriter::with_body) deserializes every body into that
//! type and publishes its codec serialization instead.
//! - Reports the outcome to the host through a [`Collector`]: `ack` when the
//!   stream service accepted the record, `fail` otherwise
//!
//! The writer never retries. Redelivery of failed units is up to the host.

use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tower::Service;
use tracing_error::SpanTrace;

use crate::{
    Envelope,
    codec::{Codec, CodecError},
    config::WriterConfig,
    record::{Record, Slot},
    transport::{PutRecord, Transport, TransportError},
};

/// Host runtime capability receiving the outcome of each unit of work.
///
/// The writer hands every unit to exactly one of the two methods.
pub trait Collector<U>: Send + Sync {
    /// The unit was fully processed.
    fn ack(&self, unit: U);
    /// The unit was not processed and should be replayed or dead-lettered.
    fn fail(&self, unit: U);
}

/// Builds the transport when the writer starts.
///
/// This is where credential resolution and client construction happen.
pub type TransportFactory<S> =
    Box<dyn Fn(&WriterConfig) -> Result<Transport<S>, tower::BoxError> + Send + Sync>;

/// Stream writer.
///
/// Generic parameters:
/// - `S`: transport service type
/// - `K`: host collector
/// - `HK`: hook implementation for lifecycle events
/// - `T`: body type records are decoded into
pub struct StreamWriter<S, K, HK = DefaultWriterHook, T = Value> {
    factory: TransportFactory<S>,
    collector: K,
    hook: HK,
    codec: Codec,
    running: Option<Running<S>>,
    verbatim: bool,
    body_marker: PhantomData<fn() -> T>,
}

struct Running<S> {
    config: WriterConfig,
    transport: Transport<S>,
}

impl<S, K> StreamWriter<S, K> {
    /// Create a writer with the default hook and a JSON value body type.
    ///
    /// Nothing is connected until [`start`](StreamWriter::start) runs the
    /// factory.
    pub fn new<F>(factory: F, collector: K) -> Self
    where
        F: Fn(&WriterConfig) -> Result<Transport<S>, tower::BoxError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            collector,
            hook: DefaultWriterHook,
            codec: Codec::new(),
            running: None,
            verbatim: true,
            body_marker: PhantomData,
        }
    }
}

impl<S, K, HK, T> StreamWriter<S, K, HK, T> {
    /// Replace the writer hook.
    pub fn with_hook<HK2: WriterHook>(self, hook: HK2) -> StreamWriter<S, K, HK2, T> {
        StreamWriter {
            factory: self.factory,
            collector: self.collector,
            hook,
            codec: self.codec,
            running: self.running,
            verbatim: self.verbatim,
            body_marker: PhantomData,
        }
    }

    /// Decode bodies as `T2` and publish their codec serialization.
    ///
    /// Records whose body does not deserialize into `T2` are failed.
    pub fn with_body<T2>(self) -> StreamWriter<S, K, HK, T2> {
        StreamWriter {
            factory: self.factory,
            collector: self.collector,
            hook: self.hook,
            codec: self.codec,
            running: self.running,
            verbatim: false,
            body_marker: PhantomData,
        }
    }

    /// Use a codec with custom modules.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Configuration of a started writer.
    pub fn config(&self) -> Option<&WriterConfig> {
        self.running.as_ref().map(|running| &running.config)
    }

    pub fn is_started(&self) -> bool {
        self.running.is_some()
    }
}

impl<S, K, HK, T> StreamWriter<S, K, HK, T>
where
    S: Service<PutRecord> + Clone,
    S::Error: Into<tower::BoxError>,
    HK: WriterHook,
    T: Serialize + DeserializeOwned + 'static,
{
    /// Fix the configuration and build the transport.
    ///
    /// This is the only fallible lifecycle step: an invalid configuration or
    /// a factory error keeps the writer out of service.
    #[tracing::instrument(skip_all, fields(stream_name = %config.stream_name))]
    pub fn start(&mut self, config: WriterConfig) -> Result<(), WriterError> {
        if self.running.is_some() {
            return Err(WriterError::new(WriterErrorKind::AlreadyStarted));
        }
        config
            .validate()
            .map_err(|e| WriterError::new(WriterErrorKind::Initialization(Box::new(e))))?;
        let transport = (self.factory)(&config)
            .map_err(|e| WriterError::new(WriterErrorKind::Initialization(e)))?;

        self.hook.on_start(&config);
        self.running = Some(Running { config, transport });
        Ok(())
    }

    /// Release the transport. Units executed afterwards are failed.
    pub fn stop(&mut self) {
        if self.running.take().is_some() {
            self.hook.on_stop();
        }
    }

    /// Process one unit of work and report its outcome to the collector.
    ///
    /// Errors never escape this method; they are logged through the hook and
    /// turned into a `fail` for the unit.
    #[tracing::instrument(skip_all)]
    pub async fn execute<U>(&mut self, unit: U)
    where
        U: AsRef<Record>,
        K: Collector<U>,
    {
        match self.publish(unit.as_ref()).await {
            Ok(published) => {
                self.hook.on_record_published(&published);
                self.collector.ack(unit);
            }
            Err(error) => {
                self.hook.on_record_failed(record_id(unit.as_ref()), &error);
                self.collector.fail(unit);
            }
        }
    }

    async fn publish(&mut self, record: &Record) -> Result<Published, WriterError> {
        let running = self
            .running
            .as_mut()
            .ok_or_else(|| WriterError::new(WriterErrorKind::NotStarted))?;

        let (envelope, data) = if self.verbatim {
            let envelope: Envelope<T> = self.codec.decode_raw(record)?;
            let data = match &envelope.raw_body {
                Some(raw) => raw_payload(&self.codec, raw)?,
                None => return Err(CodecError::malformed("record carries no body").into()),
            };
            (envelope, data)
        } else {
            let envelope: Envelope<T> = self.codec.decode(record)?;
            let data = match (&envelope.body, &envelope.raw_body) {
                (Some(body), _) => self.codec.serialize(body)?.into_bytes(),
                (None, Some(raw)) if record.len() == 1 => raw_payload(&self.codec, raw)?,
                _ => {
                    return Err(CodecError::malformed("envelope body is empty after decode").into());
                }
            };
            (envelope, data)
        };

        let payload = running
            .config
            .log_tuple
            .then(|| String::from_utf8_lossy(&data).into_owned());
        let request = PutRecord {
            stream_name: running.config.stream_name.clone(),
            partition_key: envelope.group_key.clone(),
            data,
        };
        running.transport.send(request).await?;

        Ok(Published {
            id: envelope.id,
            stream_name: running.config.stream_name.clone(),
            partition_key: envelope.group_key,
            payload,
        })
    }
}

/// Bytes of a body as it arrived: text and bytes unchanged, structured
/// values serialized.
fn raw_payload(codec: &Codec, slot: &Slot) -> Result<Vec<u8>, CodecError> {
    if let Some(text) = slot.as_text() {
        return Ok(text.as_bytes().to_vec());
    }
    match slot {
        Slot::Bytes(bytes) => Ok(bytes.clone()),
        Slot::Map(map) => codec.serialize(map).map(String::into_bytes),
        Slot::Json(value) if !value.is_null() => codec.serialize(value).map(String::into_bytes),
        _ => Err(CodecError::malformed("record carries a null body")),
    }
}

/// Id of a record for failure logs, read without decoding the record.
fn record_id(record: &Record) -> Option<&str> {
    match record.slots() {
        [id, _, ..] => id.as_text(),
        _ => None,
    }
}

/// Details of a record accepted by the stream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub id: Option<String>,
    pub stream_name: String,
    pub partition_key: String,
    /// Payload text; only captured when `log-tuple` is enabled.
    pub payload: Option<String>,
}

/// Hook trait for observing writer lifecycle events.
///
/// Hooks are invoked synchronously and should avoid heavy or blocking work.
pub trait WriterHook: Send + Sync {
    fn on_start(&self, config: &WriterConfig);
    fn on_stop(&self);
    fn on_record_published(&self, published: &Published);
    fn on_record_failed(&self, id: Option<&str>, error: &WriterError);
}

/// Default writer hook.
///
/// Logs lifecycle events using `tracing`. Published payloads are logged in
/// full at debug level when captured, otherwise a short info line is emitted.
pub struct DefaultWriterHook;

impl WriterHook for DefaultWriterHook {
    fn on_start(&self, config: &WriterConfig) {
        tracing::info!(
            stream_name = %config.stream_name,
            log_tuple = config.log_tuple,
            "Stream writer started"
        );
    }

    fn on_stop(&self) {
        tracing::info!("Stream writer stopped");
    }

    fn on_record_published(&self, published: &Published) {
        match &published.payload {
            Some(payload) => tracing::debug!(
                id = published.id.as_deref(),
                stream_name = %published.stream_name,
                partition_key = %published.partition_key,
                %payload,
                "Published record"
            ),
            None => tracing::info!("Record published to stream"),
        }
    }

    fn on_record_failed(&self, id: Option<&str>, error: &WriterError) {
        tracing::error!(id, %error, "Error writing record to stream");
    }
}

/// Error raised while starting the writer or handling a record.
#[derive(Debug)]
pub struct WriterError {
    context: SpanTrace,
    kind: WriterErrorKind,
}

/// Writer error kinds.
#[derive(Debug)]
pub enum WriterErrorKind {
    /// The configuration is unusable or the transport factory could not
    /// build a client.
    Initialization(tower::BoxError),
    /// `start` was called on a running writer.
    AlreadyStarted,
    /// A unit arrived before `start` or after `stop`.
    NotStarted,
    /// The record could not be decoded or its body serialized.
    Codec(CodecError),
    /// The stream service did not accept the record.
    Transport(TransportError),
}

impl WriterError {
    fn new(kind: WriterErrorKind) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind,
        }
    }

    pub fn kind(&self) -> &WriterErrorKind {
        &self.kind
    }
}

impl From<CodecError> for WriterError {
    fn from(err: CodecError) -> Self {
        Self::new(WriterErrorKind::Codec(err))
    }
}

impl From<TransportError> for WriterError {
    fn from(err: TransportError) -> Self {
        Self::new(WriterErrorKind::Transport(err))
    }
}

impl std::fmt::Display for WriterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            WriterErrorKind::Initialization(err) => writeln!(f, "Initialization error: {err}"),
            WriterErrorKind::AlreadyStarted => writeln!(f, "Writer is already started"),
            WriterErrorKind::NotStarted => writeln!(f, "Writer is not started"),
            WriterErrorKind::Codec(err) => writeln!(f, "Codec error: {err}"),
            WriterErrorKind::Transport(err) => writeln!(f, "Transport error: {err}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for WriterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            WriterErrorKind::Initialization(err) => Some(err.as_ref()),
            WriterErrorKind::Codec(err) => Some(err),
            WriterErrorKind::Transport(err) => Some(err),
            WriterErrorKind::AlreadyStarted | WriterErrorKind::NotStarted => None,
        }
    }
}
