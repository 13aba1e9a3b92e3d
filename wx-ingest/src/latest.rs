use std::sync::{Arc, RwLock};

use wx_domain::ProcessedRecord;

/// Shared slot holding the most recent record the pipeline has seen.
///
/// Cloning shares the slot. Readers take an owned snapshot, so the lock is
/// never held across an await.
#[derive(Clone, Default)]
pub struct LatestReading {
    slot: Arc<RwLock<Option<ProcessedRecord>>>,
}

impl LatestReading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, record: ProcessedRecord) {
        if let Ok(mut slot) = self.slot.write() {
            *slot = Some(record);
        }
    }

    pub fn snapshot(&self) -> Option<ProcessedRecord> {
        self.slot.read().ok().and_then(|slot| slot.clone())
    }
}
