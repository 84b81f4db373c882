//! Reads records from stdin, one JSON array per line, and writes them to an
//! in-memory stream.
//!
//! ```text
//! echo '["m-1", "{\"temp\":42}", {"unit": "C"}, "sensor-7"]' \
//!     | RUST_LOG=info cargo run --example stdin_writer -- readings true
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use streampost::{Collector, Record, StreamWriter, Transport, WriterConfig, transport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{StreamExt, wrappers::LinesStream};
use tokio_util::sync::CancellationToken;
use tracing_error::ErrorLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Default)]
struct Tally {
    acked: AtomicUsize,
    failed: AtomicUsize,
}

impl Collector<Record> for &'static Tally {
    fn ack(&self, _record: Record) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    fn fail(&self, record: Record) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(slots = record.len(), "Record failed, host would replay it");
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .with(ErrorLayer::default())
        .init();

    let mut args = std::env::args().skip(1);
    let stream_name = args.next().unwrap_or_else(|| "demo".to_owned());
    let log_tuple = args.next().unwrap_or_default();
    let config = WriterConfig::from_options([
        ("stream-name", stream_name.as_str()),
        ("log-tuple", log_tuple.as_str()),
    ])
    .expect("invalid writer options");

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        cancel_signal.cancel();
    });

    let stream = transport::InMemory::default();
    let client = stream.clone();
    let tally: &'static Tally = Box::leak(Box::default());
    let mut writer = StreamWriter::new(
        move |_config: &WriterConfig| Ok(Transport::new(client.clone())),
        tally,
    );
    writer.start(config).expect("failed to start writer");

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next() => line,
        };
        let Some(line) = line else { break };
        let line = line.expect("failed to read stdin");
        if line.trim().is_empty() {
            continue;
        }

        let record = serde_json::from_str::<Value>(&line)
            .map_err(tower::BoxError::from)
            .and_then(|value| Record::try_from(value).map_err(tower::BoxError::from));
        match record {
            Ok(record) => writer.execute(record).await,
            Err(error) => tracing::error!(%error, "Skipping unreadable line"),
        }
    }

    writer.stop();

    for record in stream.sent_records().await {
        println!(
            "{} [{}] {}",
            record.stream_name,
            record.partition_key,
            String::from_utf8_lossy(&record.data)
        );
    }
    tracing::info!(
        acked = tally.acked.load(Ordering::Relaxed),
        failed = tally.failed.load(Ordering::Relaxed),
        "Done"
    );
}
