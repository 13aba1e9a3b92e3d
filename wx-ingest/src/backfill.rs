use std::path::Path;

use wx_domain::{read_archive, ArchiveError};

use crate::sinks::{RecordSink, SinkError};

/// Batch size for archive imports and spill replay.
pub const IMPORT_BATCH_SIZE: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("import batch {batch} failed: {source}")]
    Write {
        batch: usize,
        #[source]
        source: SinkError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub records: usize,
    pub batches: usize,
}

/// Replays an archive into a sink in order, `batch_size` records at a time.
///
/// The import stops at the first failed batch; rerunning it re-delivers the
/// earlier batches, which the at-least-once write contract allows.
pub async fn import_archive<S>(
    path: impl AsRef<Path>,
    sink: &S,
    batch_size: usize,
) -> Result<ImportSummary, ImportError>
where
    S: RecordSink + ?Sized,
{
    let records = read_archive(path).await?;
    let batch_size = batch_size.max(1);

    let mut batches = 0;
    for chunk in records.chunks(batch_size) {
        sink.write(chunk)
            .await
            .map_err(|source| ImportError::Write {
                batch: batches + 1,
                source,
            })?;
        batches += 1;
    }

    tracing::info!(records = records.len(), batches, "archive import finished");
    Ok(ImportSummary {
        records: records.len(),
        batches,
    })
}
