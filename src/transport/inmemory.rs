use std::sync::Arc;

use tokio::sync::Mutex;

use crate::transport::{PutRecord, StreamClient};

/// In-memory stream client for testing or local pipelines.
///
/// Every published record is appended to a shared buffer. Clones share the
/// same buffer, so a test can keep one handle and give another to a writer.
#[derive(Clone, Default)]
pub struct InMemory {
    records: Arc<Mutex<Vec<PutRecord>>>,
}

impl InMemory {
    /// Return every record published so far and clear the buffer.
    pub async fn sent_records(&self) -> Vec<PutRecord> {
        let mut records = self.records.lock().await;
        std::mem::take(&mut *records)
    }
}

#[async_trait::async_trait]
impl StreamClient for InMemory {
    type Error = std::convert::Infallible;

    #[tracing::instrument(skip_all, fields(stream_name = %request.stream_name))]
    async fn put_record(&mut self, request: PutRecord) -> Result<(), Self::Error> {
        tracing::trace!(
            partition_key = %request.partition_key,
            bytes = request.data.len(),
            "Record appended to in-memory stream",
        );
        self.records.lock().await.push(request);
        Ok(())
    }
}
