//! Test framework for the `splitbridge` crate.

#![allow(clippy::type_complexity)]

use ::metrics::{SharedString, Unit};
use metrics_util::debugging::DebugValue;
use metrics_util::CompositeKey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::engine::EngineContext;

mod mock_output;

pub use mock_output::{MockOutput, MockPipeline};
pub use mock_source_reader::{MockReaderHandle, MockReaderState, MockSourceReader, MockSplit};

pub static DEFAULT_TIMEOUT_MS: u128 = 10_000;

/// Wait for `predicate` to become `true`.
///
/// Returns the number of milliseconds elapsed or `Err(())` on timeout.
#[allow(clippy::result_unit_err)]
pub fn wait<P>(mut predicate: P, timeout_ms: u128) -> Result<u128, ()>
where
    P: FnMut() -> bool,
{
    let start = Instant::now();

    while !predicate() {
        if start.elapsed().as_millis() >= timeout_ms {
            return Err(());
        }
        sleep(Duration::from_millis(10));
    }

    Ok(start.elapsed().as_millis())
}

pub(crate) fn init_test_logger() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("info"))
                .unwrap(),
        )
        .try_init();
}

/// A metrics snapshot, as returned by `Snapshotter::snapshot().into_vec()`.
pub type MetricSnapshot = [(CompositeKey, Option<Unit>, Option<SharedString>, DebugValue)];

/// Sum of all counters named `name`, across label sets.
pub fn counter_value(snapshot: &MetricSnapshot, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, ..)| key.key().name() == name)
        .map(|(.., value)| match value {
            DebugValue::Counter(value) => *value,
            _ => 0,
        })
        .sum()
}

/// Number of samples in all histograms named `name`.
pub fn histogram_len(snapshot: &MetricSnapshot, name: &str) -> usize {
    snapshot
        .iter()
        .filter(|(key, ..)| key.key().name() == name)
        .map(|(.., value)| match value {
            DebugValue::Histogram(samples) => samples.len(),
            _ => 0,
        })
        .sum()
}

/// Engine context that counts split requests.
#[derive(Debug, Default)]
pub struct MockEngineContext {
    task_index: usize,
    split_requests: AtomicUsize,
}

impl MockEngineContext {
    pub fn new(task_index: usize) -> Self {
        Self {
            task_index,
            split_requests: AtomicUsize::new(0),
        }
    }

    pub fn split_requests(&self) -> usize {
        self.split_requests.load(Ordering::Acquire)
    }
}

impl EngineContext for MockEngineContext {
    fn index_of_subtask(&self) -> usize {
        self.task_index
    }

    fn send_split_request(&self) {
        self.split_requests.fetch_add(1, Ordering::AcqRel);
    }
}
