use std::sync::Arc;
use std::time::SystemTime;

use futures::{Stream, StreamExt};
use wx_domain::ProcessedRecord;

use crate::latest::LatestReading;
use crate::pipeline::{Envelope, PipelineError, Sink};

use super::RecordSink;

/// Terminal pipeline stage: batches records and writes every batch to each
/// registered destination.
///
/// Destinations fail independently; a batch dropped by one sink still lands
/// in the others and the stream keeps flowing. The latest-record cache is
/// published per record, ahead of batching, so the current conditions stay
/// fresh even while a large batch is still filling.
pub struct FanoutSink {
    batch_size: usize,
    targets: Vec<Arc<dyn RecordSink>>,
    latest: LatestReading,
}

impl FanoutSink {
    pub fn new(
        batch_size: usize,
        targets: Vec<Arc<dyn RecordSink>>,
        latest: LatestReading,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            targets,
            latest,
        }
    }

    async fn flush(&self, batch: &[Envelope<ProcessedRecord>]) {
        if batch.is_empty() {
            return;
        }

        let records: Vec<ProcessedRecord> = batch.iter().map(|env| env.payload.clone()).collect();
        for target in &self.targets {
            if let Err(e) = target.write(&records).await {
                metrics::counter!("sink_write_errors_total").increment(1);
                tracing::error!(error = %e, "batch write failed, dropping batch for this destination");
            }
        }

        metrics::counter!("pipeline_records_total").increment(records.len() as u64);
        if let Some(min_received) = batch.iter().map(|env| env.received_at).min() {
            if let Ok(dur) = SystemTime::now().duration_since(min_received) {
                metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<ProcessedRecord> for FanoutSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<ProcessedRecord>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buffer: Vec<Envelope<ProcessedRecord>> = Vec::with_capacity(self.batch_size);

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    // Sources only yield Err when they are done for good.
                    self.flush(&buffer).await;
                    return Err(e);
                }
            };

            self.latest.publish(env.payload.clone());
            buffer.push(env);
            if buffer.len() >= self.batch_size {
                self.flush(&buffer).await;
                buffer.clear();
            }
        }

        self.flush(&buffer).await;
        Ok(())
    }
}
