use std::{fmt, time::Duration};

use async_trait::async_trait;
use rdkafka::{
    ClientConfig,
    error::KafkaError,
    producer::{FutureProducer, FutureRecord},
};
use serde::Deserialize;

use crate::{
    config::WriterConfig,
    transport::{ClientService, PutRecord, StreamClient, Transport},
};

/// Environment variable holding the bootstrap servers.
pub const BROKERS_ENV: &str = "STREAMPOST_KAFKA_BROKERS";
pub const USERNAME_ENV: &str = "STREAMPOST_KAFKA_USERNAME";
pub const PASSWORD_ENV: &str = "STREAMPOST_KAFKA_PASSWORD";
pub const TLS_ENV: &str = "STREAMPOST_KAFKA_TLS";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka stream client.
///
/// Publishes each request with a `FutureProducer`:
/// - `PutRecord.stream_name` → Kafka topic
/// - `PutRecord.partition_key` → Kafka message key
/// - `PutRecord.data` → message payload
#[derive(Clone)]
pub struct Kafka {
    producer: FutureProducer,
    timeout: Duration,
}

impl Kafka {
    /// Create a new Kafka client using the given `FutureProducer`.
    ///
    /// Default timeout is 5 seconds.
    pub fn new(producer: FutureProducer) -> Self {
        Self {
            producer,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout for each publish call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StreamClient for Kafka {
    type Error = KafkaError;

    #[tracing::instrument(skip_all, fields(topic = %request.stream_name))]
    async fn put_record(&mut self, request: PutRecord) -> Result<(), Self::Error> {
        let record = FutureRecord::to(&request.stream_name)
            .key(&request.partition_key)
            .payload(&request.data);

        let (partition, offset) = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| e)?;

        tracing::trace!(partition, offset, "Kafka delivery acknowledged");
        Ok(())
    }
}

/// Connection settings for the Kafka backend.
///
/// Settings left unset are filled from `STREAMPOST_KAFKA_*` variables by
/// [`resolve`](KafkaSettings::resolve). SASL is only configured when both a
/// username and a password resolve.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KafkaSettings {
    pub brokers: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<bool>,
    pub message_timeout_ms: Option<u64>,
}

impl KafkaSettings {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: Some(brokers.into()),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            brokers: read(BROKERS_ENV),
            username: read(USERNAME_ENV),
            password: read(PASSWORD_ENV),
            tls: read(TLS_ENV).map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "yes")),
            message_timeout_ms: None,
        }
    }

    /// Fill unset fields from the environment.
    pub fn resolve(self) -> Self {
        self.or(Self::from_env())
    }

    /// Keep explicit fields, take the rest from `fallback`.
    pub fn or(self, fallback: Self) -> Self {
        Self {
            brokers: self.brokers.or(fallback.brokers),
            username: self.username.or(fallback.username),
            password: self.password.or(fallback.password),
            tls: self.tls.or(fallback.tls),
            message_timeout_ms: self.message_timeout_ms.or(fallback.message_timeout_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.message_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Build the librdkafka client configuration.
    pub fn client_config(&self) -> Result<ClientConfig, tower::BoxError> {
        let brokers = self
            .brokers
            .as_deref()
            .ok_or_else(|| format!("no Kafka brokers configured, set {BROKERS_ENV}"))?;

        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", brokers);
        config.set("message.timeout.ms", self.timeout().as_millis().to_string());

        let use_tls = self.tls.unwrap_or(false);
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            if use_tls {
                config.set("security.protocol", "SASL_SSL");
            } else {
                config.set("security.protocol", "SASL_PLAINTEXT");
            }
            config
                .set("sasl.mechanism", "PLAIN")
                .set("sasl.username", user)
                .set("sasl.password", pass);
        } else if use_tls {
            config.set("security.protocol", "SSL");
        }

        Ok(config)
    }
}

impl fmt::Debug for KafkaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaSettings")
            .field("brokers", &self.brokers)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("tls", &self.tls)
            .field("message_timeout_ms", &self.message_timeout_ms)
            .finish()
    }
}

/// Transport factory for [`StreamWriter::new`](crate::StreamWriter::new).
///
/// Settings are resolved and the producer is created when the writer starts.
pub fn factory(
    settings: KafkaSettings,
) -> impl Fn(&WriterConfig) -> Result<Transport<ClientService<Kafka>>, tower::BoxError> + Send + Sync + 'static
{
    move |config: &WriterConfig| {
        let settings = settings.clone().resolve();
        let producer: FutureProducer = settings.client_config()?.create()?;
        tracing::info!(
            brokers = settings.brokers.as_deref(),
            topic = %config.stream_name,
            "Kafka producer created"
        );
        Ok(Transport::new(Kafka::new(producer).with_timeout(settings.timeout())))
    }
}
