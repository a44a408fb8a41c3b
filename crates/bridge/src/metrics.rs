//! Reader metrics.
//!
//! The constants defined in this module are the names of metrics that the
//! bridge maintains via [`metrics`] crate interfaces.  Every metric carries
//! the labels `instance`, `type`, `task`, and `group`.

use ::metrics::{
    counter, describe_counter, describe_histogram, histogram, Counter, Histogram, Label, Unit,
};
use serde::Serialize;
use splitbridge_types::config::MetricsConfig;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Latency of a single delegated `poll_next` call.
pub const RECORD_INVOKE_LATENCY: &str = "reader.record_invoke_latency";

/// Total number of records converted and emitted.
pub const RECORDS_SUCCESS: &str = "reader.records_success";

/// Total number of records routed to the dirty collector.
pub const RECORDS_DIRTY: &str = "reader.records_dirty";

/// Total number of dirty records the dirty collector failed to store.
pub const DIRTY_COLLECT_FAILURES: &str = "reader.dirty_collect_failures";

/// Total number of failed messenger calls.
pub const MESSENGER_FAILURES: &str = "reader.messenger_failures";

/// Total number of splits assigned to the reader.
pub const SPLITS_ASSIGNED: &str = "reader.splits_assigned";

/// Total number of state snapshots taken.
pub const SNAPSHOTS: &str = "reader.snapshots";

/// Adds descriptions for the metrics we expose.
pub fn describe_reader_metrics() {
    describe_histogram!(
        RECORD_INVOKE_LATENCY,
        Unit::Seconds,
        "Latency of a delegated poll of the connector reader"
    );

    describe_counter!(RECORDS_SUCCESS, "total number of records emitted");
    describe_counter!(RECORDS_DIRTY, "total number of dirty records");
    describe_counter!(
        DIRTY_COLLECT_FAILURES,
        "total number of dirty records that could not be stored"
    );
    describe_counter!(MESSENGER_FAILURES, "total number of failed messenger calls");
    describe_counter!(SPLITS_ASSIGNED, "total number of splits assigned");
    describe_counter!(SNAPSHOTS, "total number of reader state snapshots");
}

/// Identity of a reader instance, reported as metric labels.
#[derive(Clone, Debug)]
pub struct ReaderLabels {
    pub instance_id: u64,
    pub reader_name: String,
    pub task_index: usize,
}

/// Record counts reported to the messenger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReaderProgress {
    pub success: u64,
    pub dirty: u64,
}

/// Per-instance metric handles.
///
/// Handles are registered against the global recorder when the manager is
/// created.  With metrics disabled, all handles are no-ops but
/// [`ReaderProgress`] is still tracked.
pub struct MetricManager {
    enabled: bool,
    labels: Vec<Label>,
    started: bool,
    closed: bool,
    progress: ReaderProgress,
    records_success: Counter,
    records_dirty: Counter,
    timers: HashMap<&'static str, Histogram>,
}

impl MetricManager {
    pub fn new(config: &MetricsConfig, labels: &ReaderLabels) -> Self {
        let labels = vec![
            Label::new("instance", labels.instance_id.to_string()),
            Label::new("type", labels.reader_name.clone()),
            Label::new("task", labels.task_index.to_string()),
            Label::new("group", config.group.clone()),
        ];
        let mut manager = Self {
            enabled: config.enabled,
            labels,
            started: false,
            closed: false,
            progress: ReaderProgress::default(),
            records_success: Counter::noop(),
            records_dirty: Counter::noop(),
            timers: HashMap::new(),
        };
        manager.records_success = manager.counter(RECORDS_SUCCESS);
        manager.records_dirty = manager.counter(RECORDS_DIRTY);
        manager
    }

    pub fn start(&mut self) {
        if self.started {
            return;
        }
        if self.enabled {
            describe_reader_metrics();
        }
        debug!(labels = ?self.labels, "reader metrics started");
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Returns a handle for counter `name` with this reader's labels.
    pub fn counter(&self, name: &'static str) -> Counter {
        if self.enabled {
            counter!(name, self.labels.clone())
        } else {
            Counter::noop()
        }
    }

    /// Starts a timer that records into histogram `name` when it is stopped
    /// or dropped.
    pub fn record_timer(&mut self, name: &'static str) -> CallTracer {
        let histogram = if self.enabled {
            let labels = &self.labels;
            self.timers
                .entry(name)
                .or_insert_with(|| histogram!(name, labels.clone()))
                .clone()
        } else {
            Histogram::noop()
        };
        CallTracer::new(histogram)
    }

    pub fn record_success(&mut self) {
        self.progress.success += 1;
        self.records_success.increment(1);
    }

    pub fn record_dirty(&mut self) {
        self.progress.dirty += 1;
        self.records_dirty.increment(1);
    }

    pub fn progress(&self) -> ReaderProgress {
        self.progress
    }

    /// Stops reporting.  Handles returned earlier keep working, but the
    /// manager's own counters become no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.records_success = Counter::noop();
        self.records_dirty = Counter::noop();
        self.timers.clear();
        debug!(
            success = self.progress.success,
            dirty = self.progress.dirty,
            "reader metrics closed"
        );
    }
}

/// A timer for one call.
///
/// The elapsed time is recorded exactly once: by [`CallTracer::stop`] or, if
/// the call exits early, when the tracer is dropped.
#[must_use]
pub struct CallTracer {
    histogram: Histogram,
    start: Instant,
    recorded: bool,
}

impl CallTracer {
    fn new(histogram: Histogram) -> Self {
        Self {
            histogram,
            start: Instant::now(),
            recorded: false,
        }
    }

    pub fn stop(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if !self.recorded {
            self.recorded = true;
            self.histogram.record(elapsed.as_secs_f64());
        }
        elapsed
    }
}

impl Drop for CallTracer {
    fn drop(&mut self) {
        self.record();
    }
}

#[cfg(test)]
mod test {
    use super::{
        MetricManager, ReaderLabels, ReaderProgress, RECORDS_DIRTY, RECORDS_SUCCESS,
        RECORD_INVOKE_LATENCY,
    };
    use crate::test::{counter_value, histogram_len};
    use metrics_util::debugging::DebuggingRecorder;
    use splitbridge_types::config::MetricsConfig;

    fn labels() -> ReaderLabels {
        ReaderLabels {
            instance_id: 7,
            reader_name: "jsonl".to_string(),
            task_index: 2,
        }
    }

    #[test]
    fn timer_records_once() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        ::metrics::with_local_recorder(&recorder, || {
            let mut manager = MetricManager::new(&MetricsConfig::default(), &labels());
            manager.start();

            let tracer = manager.record_timer(RECORD_INVOKE_LATENCY);
            tracer.stop();

            // Dropped without `stop`, as on an early return.
            let _tracer = manager.record_timer(RECORD_INVOKE_LATENCY);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert_eq!(histogram_len(&snapshot, RECORD_INVOKE_LATENCY), 2);
    }

    #[test]
    fn counts_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        let progress = ::metrics::with_local_recorder(&recorder, || {
            let mut manager = MetricManager::new(&MetricsConfig::default(), &labels());
            manager.start();
            manager.record_success();
            manager.record_success();
            manager.record_dirty();
            manager.close();
            manager.record_success();
            manager.progress()
        });

        assert_eq!(progress, ReaderProgress { success: 3, dirty: 1 });

        let snapshot = snapshotter.snapshot().into_vec();
        // The record after `close` isn't reported.
        assert_eq!(counter_value(&snapshot, RECORDS_SUCCESS), 2);
        assert_eq!(counter_value(&snapshot, RECORDS_DIRTY), 1);

        let (key, ..) = snapshot
            .iter()
            .find(|(key, ..)| key.key().name() == RECORDS_SUCCESS)
            .unwrap();
        let labels = key
            .key()
            .labels()
            .map(|label| (label.key().to_string(), label.value().to_string()))
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec![
                ("instance".to_string(), "7".to_string()),
                ("type".to_string(), "jsonl".to_string()),
                ("task".to_string(), "2".to_string()),
                ("group".to_string(), "input".to_string()),
            ]
        );
    }

    #[test]
    fn disabled_metrics_still_track_progress() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        let progress = ::metrics::with_local_recorder(&recorder, || {
            let config = MetricsConfig {
                enabled: false,
                ..MetricsConfig::default()
            };
            let mut manager = MetricManager::new(&config, &labels());
            manager.start();
            manager.record_success();
            manager.record_timer(RECORD_INVOKE_LATENCY).stop();
            manager.progress()
        });

        assert_eq!(progress.success, 1);
        assert!(snapshotter.snapshot().into_vec().is_empty());
    }
}
