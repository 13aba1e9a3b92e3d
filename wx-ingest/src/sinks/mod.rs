pub mod fanout;
pub mod file_store;
pub mod influx;
pub mod reliable;

pub use fanout::FanoutSink;
pub use file_store::FileStore;
pub use influx::InfluxSink;
pub use reliable::ReliableSink;

use wx_domain::ProcessedRecord;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("write transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("write rejected with status {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A destination that accepts batches of processed records.
///
/// A batch either lands in full or fails as a unit; callers decide whether
/// to retry, and duplicate delivery after a retry is acceptable.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, batch: &[ProcessedRecord]) -> Result<(), SinkError>;
}

#[async_trait::async_trait]
impl<S: RecordSink + ?Sized> RecordSink for std::sync::Arc<S> {
    async fn write(&self, batch: &[ProcessedRecord]) -> Result<(), SinkError> {
        (**self).write(batch).await
    }
}
