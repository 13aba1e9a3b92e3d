use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use wx_domain::ProcessedRecord;

use super::{RecordSink, SinkError};

/// Append-only flat-file archive, one JSON record per line.
///
/// Appends are serialized through a lock and fsynced before returning, so a
/// batch reported as written survives a crash. Records land in arrival
/// order, which the window query over the archive relies on.
pub struct FileStore {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drops all stored lines. Used on the spill log once its contents have
    /// been replayed into the primary sink.
    pub async fn truncate(&self) -> Result<(), SinkError> {
        let _guard = self.append_lock.lock().await;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordSink for FileStore {
    async fn write(&self, batch: &[ProcessedRecord]) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut lines = Vec::with_capacity(batch.len().saturating_mul(256));
        for record in batch {
            serde_json::to_writer(&mut lines, record)?;
            lines.push(b'\n');
        }

        let _guard = self.append_lock.lock().await;
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        file.write_all(&lines).await?;
        file.flush().await?;
        file.sync_all().await?;
        metrics::counter!("store_appended_records_total").increment(batch.len() as u64);
        Ok(())
    }
}
