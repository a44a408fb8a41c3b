use super::{DirtyCollector, DirtyContext, DirtyRecord};
use ::metrics::Counter;
use anyhow::{Context, Result as AnyResult};
use serde_json::Value as JsonValue;
use splitbridge_connectorlib::ConversionError;
use splitbridge_types::config::FileDirtyConfig;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, error};

/// Appends dirty records to a file, one JSON document per line.
///
/// Records are buffered and written every `flush_interval_records` records
/// and on close.  The file is created on the first flush.
pub struct FileDirtyCollector {
    context: DirtyContext,
    path: PathBuf,
    flush_interval_records: usize,
    buffer: Vec<DirtyRecord>,
    file: Option<File>,
    failures: Counter,
}

impl FileDirtyCollector {
    pub fn new(context: DirtyContext, config: &FileDirtyConfig, failures: Counter) -> Self {
        Self {
            context,
            path: config.path.clone(),
            flush_interval_records: config.flush_interval_records.max(1),
            buffer: Vec::new(),
            file: None,
            failures,
        }
    }

    fn file(&mut self) -> AnyResult<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| {
                    format!("failed to open dirty record file '{}'", self.path.display())
                })?,
        };
        Ok(self.file.insert(file))
    }

    /// Writes out the buffer.  On failure, the buffered records are
    /// discarded and counted as failures.
    fn flush(&mut self) -> AnyResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(&mut self.buffer);
        let result = self.write(&records);
        if result.is_err() {
            self.failures.increment(records.len() as u64);
        } else {
            debug!(
                records = records.len(),
                path = %self.path.display(),
                "flushed dirty records"
            );
        }
        result
    }

    fn write(&mut self, records: &[DirtyRecord]) -> AnyResult<()> {
        let mut text = String::new();
        for record in records {
            text.push_str(&serde_json::to_string(record)?);
            text.push('\n');
        }
        let path = self.path.display().to_string();
        let file = self.file()?;
        file.write_all(text.as_bytes())
            .and_then(|()| file.flush())
            .with_context(|| format!("failed to write dirty record file '{path}'"))
    }
}

impl DirtyCollector for FileDirtyCollector {
    fn collect(&mut self, record: &JsonValue, cause: &ConversionError) {
        self.buffer
            .push(DirtyRecord::new(&self.context, record, cause));
        if self.buffer.len() >= self.flush_interval_records {
            if let Err(e) = self.flush() {
                error!(task_index = self.context.task_index, "{e:#}");
            }
        }
    }

    fn close(&mut self) -> AnyResult<()> {
        let result = self.flush();
        self.file = None;
        result
    }
}

#[cfg(test)]
mod test {
    use super::FileDirtyCollector;
    use crate::dirty::{DirtyCollector, DirtyContext, DirtyRecord};
    use crate::metrics::DIRTY_COLLECT_FAILURES;
    use crate::test::counter_value;
    use ::metrics::{counter, Counter};
    use metrics_util::debugging::DebuggingRecorder;
    use serde_json::json;
    use splitbridge_connectorlib::ConversionError;
    use splitbridge_types::config::FileDirtyConfig;
    use std::fs::read_to_string;

    fn read_records(path: &std::path::Path) -> Vec<DirtyRecord> {
        read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn flushes_every_interval_and_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirty.jsonl");
        let config = FileDirtyConfig {
            path: path.clone(),
            flush_interval_records: 2,
        };
        let context = DirtyContext {
            instance_id: 3,
            task_index: 0,
        };
        let mut collector = FileDirtyCollector::new(context, &config, Counter::noop());
        let cause = ConversionError::unparseable("id", "int", &json!("x"));

        collector.collect(&json!({"id": "x"}), &cause);
        assert!(!path.exists());

        collector.collect(&json!({"id": "y"}), &cause);
        assert_eq!(read_records(&path).len(), 2);

        collector.collect(&json!({"id": "z"}), &cause);
        collector.close().unwrap();

        let records = read_records(&path);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].record, r#"{"id":"z"}"#);
        assert_eq!(records[2].instance_id, 3);
        assert_eq!(records[2].cause, "id: unparseable int 'x'");
    }

    #[test]
    fn write_failures_are_counted_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        // A directory can't be opened for appending.
        let config = FileDirtyConfig {
            path: dir.path().to_path_buf(),
            flush_interval_records: 1,
        };
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        let close_result = ::metrics::with_local_recorder(&recorder, || {
            let failures = counter!(DIRTY_COLLECT_FAILURES);
            let mut collector =
                FileDirtyCollector::new(DirtyContext::default(), &config, failures);
            let cause = ConversionError::record_error("bad".to_string(), None);
            collector.collect(&json!(1), &cause);
            collector.collect(&json!(2), &cause);
            collector.close()
        });

        // Nothing was left to flush on close.
        assert!(close_result.is_ok());
        let snapshot = snapshotter.snapshot().into_vec();
        assert_eq!(counter_value(&snapshot, DIRTY_COLLECT_FAILURES), 2);
    }

    #[test]
    fn close_reports_final_flush_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileDirtyConfig {
            path: dir.path().to_path_buf(),
            flush_interval_records: 10,
        };
        let mut collector = FileDirtyCollector::new(DirtyContext::default(), &config, Counter::noop());
        collector.collect(&json!(1), &ConversionError::record_error("bad".to_string(), None));
        assert!(collector.close().is_err());
    }
}
