#![doc = include_str!("../README.md")]

pub mod codec;
pub mod config;
pub mod envelope;
pub mod record;
pub mod transport;
mod writer;

#[doc(inline)]
pub use envelope::Envelope;

#[doc(inline)]
pub use codec::{Codec, CodecError, CodecErrorKind};

#[doc(inline)]
pub use config::{ConfigError, ConfigErrorKind, WriterConfig};

#[doc(inline)]
pub use record::{Record, Slot};

#[doc(inline)]
pub use transport::{PutRecord, StreamClient, Transport, TransportError, TransportErrorKind};

#[doc(inline)]
pub use writer::{
    Collector, DefaultWriterHook, Published, StreamWriter, TransportFactory, WriterError,
    WriterErrorKind, WriterHook,
};
