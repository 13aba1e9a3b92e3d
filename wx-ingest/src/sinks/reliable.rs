use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use wx_domain::ProcessedRecord;

use crate::backfill::{self, IMPORT_BATCH_SIZE};

use super::{FileStore, RecordSink, SinkError};

/// At-least-once delivery wrapper around a time-series sink.
///
/// A failed batch is retried with doubling backoff; when the retry budget
/// runs out the batch joins a bounded in-memory queue that is drained, in
/// arrival order, ahead of newer batches. Overflowing the queue spills the
/// oldest batches to a flat-file log, and the log is replayed into the inner
/// sink once writes succeed again. `write` itself only fails when the spill
/// log is unwritable, so a dying database never takes the decode loop down
/// with it.
pub struct ReliableSink<W> {
    inner: W,
    spill: FileStore,
    max_retries: u32,
    base_backoff: Duration,
    max_queued_batches: usize,
    queue: Mutex<VecDeque<Vec<ProcessedRecord>>>,
}

impl<W: RecordSink> ReliableSink<W> {
    pub fn new(
        inner: W,
        spill: FileStore,
        max_retries: u32,
        base_backoff: Duration,
        max_queued_batches: usize,
    ) -> Self {
        Self {
            inner,
            spill,
            max_retries,
            base_backoff,
            max_queued_batches: max_queued_batches.max(1),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// One delivery attempt with the configured retry budget.
    async fn try_write(&self, batch: &[ProcessedRecord]) -> Result<(), SinkError> {
        let mut attempt: u32 = 0;
        loop {
            match self.inner.write(batch).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.base_backoff * 2u32.saturating_pow(attempt - 1);
                    metrics::counter!("sink_retry_total").increment(1);
                    tracing::warn!(error = %e, attempt, "time-series write failed, retrying");
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn replay_spill(&self) {
        match tokio::fs::metadata(self.spill.path()).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => return,
        }

        match backfill::import_archive(self.spill.path(), &self.inner, IMPORT_BATCH_SIZE).await {
            Ok(summary) => {
                if summary.records > 0 {
                    metrics::counter!("sink_replayed_records_total")
                        .increment(summary.records as u64);
                    tracing::info!(
                        records = summary.records,
                        "replayed spilled records after sink recovery"
                    );
                }
                if let Err(e) = self.spill.truncate().await {
                    tracing::error!(error = %e, "failed to truncate spill log after replay");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "spill replay failed, keeping the log for the next attempt");
            }
        }
    }
}

#[async_trait::async_trait]
impl<W: RecordSink> RecordSink for ReliableSink<W> {
    async fn write(&self, batch: &[ProcessedRecord]) -> Result<(), SinkError> {
        let mut queue = self.queue.lock().await;
        queue.push_back(batch.to_vec());

        // Deliver in arrival order and stop at the first batch that exhausts
        // its retries; it stays at the front for the next call.
        while let Some(front) = queue.front() {
            match self.try_write(front).await {
                Ok(()) => {
                    queue.pop_front();
                }
                Err(e) => {
                    metrics::counter!("sink_write_errors_total").increment(1);
                    tracing::warn!(
                        error = %e,
                        queued = queue.len(),
                        "time-series writes failing, batch stays queued"
                    );
                    break;
                }
            }
        }

        while queue.len() > self.max_queued_batches {
            if let Some(oldest) = queue.pop_front() {
                metrics::counter!("sink_spilled_records_total").increment(oldest.len() as u64);
                self.spill.write(&oldest).await?;
            }
        }

        if queue.is_empty() {
            drop(queue);
            self.replay_spill().await;
        }
        Ok(())
    }
}
