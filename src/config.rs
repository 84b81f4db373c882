//! Stream writer configuration.
//!
//! Hosts usually hand their components a flat set of options. The writer
//! recognizes two of them and ignores the rest:
//!
//! | key           | type   | default  |
//! |---------------|--------|----------|
//! | `stream-name` | string | required |
//! | `log-tuple`   | bool   | `false`  |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_error::SpanTrace;

/// Key of the target stream option.
pub const STREAM_NAME: &str = "stream-name";
/// Key of the payload logging option.
pub const LOG_TUPLE: &str = "log-tuple";

/// Configuration fixed when a writer starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WriterConfig {
    /// Target partitioned stream.
    pub stream_name: String,
    /// Log full payloads of published records at debug level.
    #[serde(default)]
    pub log_tuple: bool,
}

impl WriterConfig {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            log_tuple: false,
        }
    }

    pub fn with_log_tuple(mut self, log_tuple: bool) -> Self {
        self.log_tuple = log_tuple;
        self
    }

    /// Read the configuration from a JSON object.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| ConfigError::parse(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read the configuration from string options, as found in host property
    /// files or environment maps.
    pub fn from_options<'a, I>(options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut stream_name = None;
        let mut log_tuple = false;

        for (key, value) in options {
            match key {
                STREAM_NAME => stream_name = Some(value.to_owned()),
                LOG_TUPLE => log_tuple = parse_flag(key, value)?,
                _ => {}
            }
        }

        let config = Self {
            stream_name: stream_name.ok_or_else(|| ConfigError::new(ConfigErrorKind::MissingStreamName))?,
            log_tuple,
        };
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_name.trim().is_empty() {
            return Err(ConfigError::new(ConfigErrorKind::MissingStreamName));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::new(ConfigErrorKind::InvalidFlag {
            key: key.to_owned(),
            value: value.to_owned(),
        })),
    }
}

/// Error returned when writer options cannot be turned into a configuration.
#[derive(Debug)]
pub struct ConfigError {
    context: SpanTrace,
    kind: ConfigErrorKind,
}

/// Configuration error kinds.
#[derive(Debug)]
pub enum ConfigErrorKind {
    /// The options are not a valid configuration document.
    Parse(tower::BoxError),
    /// `stream-name` is missing or blank.
    MissingStreamName,
    /// A boolean option holds something other than a boolean.
    InvalidFlag { key: String, value: String },
}

impl ConfigError {
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind,
        }
    }

    fn parse(err: tower::BoxError) -> Self {
        Self::new(ConfigErrorKind::Parse(err))
    }

    pub fn kind(&self) -> &ConfigErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ConfigErrorKind::Parse(err) => writeln!(f, "Invalid writer configuration: {err}"),
            ConfigErrorKind::MissingStreamName => writeln!(f, "`{STREAM_NAME}` is required"),
            ConfigErrorKind::InvalidFlag { key, value } => {
                writeln!(f, "`{key}` must be a boolean, got `{value}`")
            }
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ConfigErrorKind::Parse(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
