use super::{DirtyCollector, DirtyContext, DirtyRecord};
use anyhow::Result as AnyResult;
use serde_json::Value as JsonValue;
use splitbridge_connectorlib::ConversionError;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

struct DirtyRecordsInner {
    records: Vec<DirtyRecord>,
    dropped: u64,
}

/// Shared, queryable view of the records kept by a
/// [`MemoryDirtyCollector`].
#[derive(Clone)]
pub struct DirtyRecords(Arc<Mutex<DirtyRecordsInner>>);

impl DirtyRecords {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(DirtyRecordsInner {
            records: Vec::new(),
            dropped: 0,
        })))
    }

    fn inner(&self) -> MutexGuard<'_, DirtyRecordsInner> {
        // A panic while holding the lock can't leave the vector half-updated.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a copy of the records collected so far.
    pub fn records(&self) -> Vec<DirtyRecord> {
        self.inner().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records that arrived after the collector was full.
    pub fn dropped(&self) -> u64 {
        self.inner().dropped
    }
}

/// Keeps up to `max_records` dirty records in memory.
pub struct MemoryDirtyCollector {
    context: DirtyContext,
    max_records: usize,
    records: DirtyRecords,
}

impl MemoryDirtyCollector {
    pub fn new(context: DirtyContext, max_records: usize) -> Self {
        Self {
            context,
            max_records,
            records: DirtyRecords::new(),
        }
    }
}

impl DirtyCollector for MemoryDirtyCollector {
    fn collect(&mut self, record: &JsonValue, cause: &ConversionError) {
        let mut inner = self.records.inner();
        if inner.records.len() < self.max_records {
            inner
                .records
                .push(DirtyRecord::new(&self.context, record, cause));
        } else {
            if inner.dropped == 0 {
                warn!(
                    task_index = self.context.task_index,
                    max_records = self.max_records,
                    "dirty record buffer is full, dropping further dirty records"
                );
            }
            inner.dropped += 1;
        }
    }

    fn close(&mut self) -> AnyResult<()> {
        Ok(())
    }

    fn records(&self) -> Option<DirtyRecords> {
        Some(self.records.clone())
    }
}
