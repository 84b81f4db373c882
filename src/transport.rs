//! Publish requests and stream client backends.
//!
//! This module defines a Tower-compatible transport used to put records on a
//! partitioned stream through different backends (in-memory, Kafka).
//!
//! ## Key components
//!
//! - [`PutRecord`]: one publish request (stream, partition key, payload)
//! - [`StreamClient`]: trait implemented by concrete backends
//! - [`ClientService`]: adapter from a [`StreamClient`] to a Tower service
//! - [`Transport`]: public-facing wrapper that accepts Tower layers
//! - [`TransportError`]: unified publish error with tracing context

mod inmemory;

#[cfg(feature = "kafka")]
pub mod kafka;

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tower::{Service, ServiceExt as _};
use tracing_error::SpanTrace;

pub use inmemory::InMemory;

/// One record to append to a partitioned stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecord {
    /// Target stream (topic) name.
    pub stream_name: String,
    /// Key used by the stream service to pick a partition.
    pub partition_key: String,
    /// Record payload.
    pub data: Vec<u8>,
}

/// Trait implemented by concrete stream backends.
///
/// A client performs exactly one publish call per request and reports only
/// success or failure; it never retries on its own.
#[async_trait::async_trait]
pub trait StreamClient {
    /// Backend-specific error type.
    type Error: Into<tower::BoxError>;

    /// Append one record to the stream.
    async fn put_record(&mut self, request: PutRecord) -> Result<(), Self::Error>;
}

/// Generic Tower-compatible transport wrapper.
///
/// `Transport` wraps an underlying Tower `Service` and:
///
/// - Normalizes errors into [`TransportError`]
/// - Supports Tower middleware via [`layer`](Transport::layer)
/// - Provides a convenience [`send`](Transport::send) API
///
/// Typically constructed from a concrete [`StreamClient`].
#[derive(Clone)]
pub struct Transport<S> {
    service: S,
}

impl<C> Transport<ClientService<C>> {
    /// Create a new transport from a stream client.
    pub fn new(client: C) -> Self {
        Self {
            service: ClientService::new(client),
        }
    }
}

impl<S> Transport<S> {
    /// Apply a Tower layer, e.g. a timeout, to the transport.
    pub fn layer<L>(self, layer: L) -> Transport<L::Service>
    where
        L: tower::Layer<S>,
    {
        Transport {
            service: layer.layer(self.service),
        }
    }

    /// Publish a record and wait for the stream service to accept it.
    pub async fn send(&mut self, request: PutRecord) -> Result<(), TransportError>
    where
        S: Service<PutRecord> + Clone,
        S::Error: Into<tower::BoxError>,
    {
        self.service
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| TransportError::publish(e.into()))?;
        Ok(())
    }
}

impl<S> Service<PutRecord> for Transport<S>
where
    S: Service<PutRecord> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<tower::BoxError>,
{
    type Response = ();
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service
            .poll_ready(cx)
            .map_err(|e| TransportError::publish(e.into()))
    }

    fn call(&mut self, req: PutRecord) -> Self::Future {
        let future = self.service.call(req);
        Box::pin(async move {
            future
                .await
                .map_err(|e| TransportError::publish(e.into()))?;
            Ok(())
        })
    }
}

/// Tower service adapter for a [`StreamClient`].
#[derive(Clone)]
pub struct ClientService<C> {
    client: C,
}

impl<C> ClientService<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C> Service<PutRecord> for ClientService<C>
where
    C: StreamClient + Clone + Send + 'static,
{
    type Response = ();
    type Error = tower::BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PutRecord) -> Self::Future {
        let mut client = self.client.clone();
        Box::pin(async move {
            client.put_record(req).await.map_err(Into::into)?;
            Ok(())
        })
    }
}

/// Error returned when a record could not be published.
#[derive(Debug)]
pub struct TransportError {
    context: SpanTrace,
    kind: TransportErrorKind,
}

/// Transport error kinds.
#[derive(Debug)]
pub enum TransportErrorKind {
    /// The stream service rejected the record or could not be reached.
    Publish(tower::BoxError),
    /// A timeout layer gave up waiting for the stream service.
    Timeout(tower::BoxError),
}

impl TransportError {
    pub fn kind(&self) -> &TransportErrorKind {
        &self.kind
    }

    /// Wrap a backend or middleware error.
    pub fn publish(err: tower::BoxError) -> Self {
        let kind = if err.is::<tower::timeout::error::Elapsed>() {
            TransportErrorKind::Timeout(err)
        } else {
            TransportErrorKind::Publish(err)
        };
        Self {
            context: SpanTrace::capture(),
            kind,
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TransportErrorKind::Publish(err) => writeln!(f, "Publish error: {err}"),
            TransportErrorKind::Timeout(err) => writeln!(f, "Publish timed out: {err}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            TransportErrorKind::Publish(err) | TransportErrorKind::Timeout(err) => {
                Some(err.as_ref())
            }
        }
    }
}
