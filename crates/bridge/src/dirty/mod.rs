//! Dirty record collectors.
//!
//! Records that fail conversion never reach the engine.  The pipeline hands
//! them to a [`DirtyCollector`] instead, where they can be inspected after
//! the fact.  A collector must absorb its own I/O failures: they are counted
//! in [`DIRTY_COLLECT_FAILURES`](crate::metrics::DIRTY_COLLECT_FAILURES) and
//! logged, and only the final flush in [`DirtyCollector::close`] may fail.

use anyhow::Result as AnyResult;
use chrono::{DateTime, Utc};
use ::metrics::Counter;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use splitbridge_connectorlib::ConversionError;
use splitbridge_types::config::DirtyCollectorConfig;
use tracing::trace;

mod file;
mod memory;

pub use file::FileDirtyCollector;
pub use memory::{DirtyRecords, MemoryDirtyCollector};

/// Identity of the reader instance that produced dirty records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtyContext {
    pub instance_id: u64,
    pub task_index: usize,
}

/// A record rejected by conversion, with the reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyRecord {
    pub task_index: usize,
    pub instance_id: u64,

    /// The raw record, as JSON text.
    pub record: String,

    /// Field that failed to convert, if the failure can be attributed to one.
    pub field: Option<String>,

    pub cause: String,
    pub timestamp: DateTime<Utc>,
}

impl DirtyRecord {
    pub fn new(context: &DirtyContext, record: &JsonValue, cause: &ConversionError) -> Self {
        Self {
            task_index: context.task_index,
            instance_id: context.instance_id,
            record: record.to_string(),
            field: cause.field().map(str::to_string),
            cause: cause.to_string(),
            timestamp: Utc::now(),
        }
    }
}

pub trait DirtyCollector: Send {
    /// Takes one dirty record.  Never fails.
    fn collect(&mut self, record: &JsonValue, cause: &ConversionError);

    /// Flushes anything buffered.
    fn close(&mut self) -> AnyResult<()>;

    /// Handle to query collected records, for collectors that keep them.
    fn records(&self) -> Option<DirtyRecords> {
        None
    }
}

/// Discards dirty records, keeping only a count.
#[derive(Debug, Default)]
pub struct NoOpDirtyCollector {
    collected: u64,
}

impl NoOpDirtyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collected(&self) -> u64 {
        self.collected
    }
}

impl DirtyCollector for NoOpDirtyCollector {
    fn collect(&mut self, _record: &JsonValue, cause: &ConversionError) {
        self.collected += 1;
        trace!(%cause, "discarding dirty record");
    }

    fn close(&mut self) -> AnyResult<()> {
        Ok(())
    }
}

/// Builds the collector selected by `config`.
///
/// `failures` counts dirty records the collector could not store.
pub fn create_dirty_collector(
    config: &DirtyCollectorConfig,
    context: DirtyContext,
    failures: Counter,
) -> Box<dyn DirtyCollector> {
    match config {
        DirtyCollectorConfig::Noop => Box::new(NoOpDirtyCollector::new()),
        DirtyCollectorConfig::Memory(config) => {
            Box::new(MemoryDirtyCollector::new(context, config.max_records))
        }
        DirtyCollectorConfig::File(config) => {
            Box::new(FileDirtyCollector::new(context, config, failures))
        }
    }
}
