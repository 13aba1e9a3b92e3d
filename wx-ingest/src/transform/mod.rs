use wx_domain::{ProcessedRecord, RawRecord};

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Pipeline stage attaching derived metrics to each raw record.
///
/// Enrichment is total over the registered models: records without the
/// inputs for a derived metric pass through with none attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct Enrichment;

#[async_trait::async_trait]
impl Transform<RawRecord, ProcessedRecord> for Enrichment {
    async fn apply(
        &self,
        input: Envelope<RawRecord>,
    ) -> Result<Envelope<ProcessedRecord>, PipelineError> {
        let Envelope {
            payload,
            received_at,
        } = input;
        let processed = ProcessedRecord::enrich(payload);
        metrics::counter!("enriched_records_total").increment(1);
        Ok(Envelope {
            payload: processed,
            received_at,
        })
    }
}
