//! Connector reader API.
//!
//! A connector provides a [`SourceReaderFactory`] that builds one
//! [`SourceReader`] per engine task.  The reader is driven by a single thread:
//!
//! ```text
//!          ┌─⯇── add_splits ──┐
//!          │                  │
//!   start ─┴─⯈ poll_next ─⯈───┼─⯇─ snapshot_state ─⯈ notify_checkpoint_complete
//!                  │          │
//!                  ▼          │
//!         notify_no_more_splits
//!                  │
//!                  ▼
//!               close
//! ```
//!
//! Each call to [`SourceReader::poll_next`] emits zero or more records
//! through the [`SourcePipeline`] it is given.  Connectors never see engine
//! rows: conversion, metrics, and quarantining of malformed records happen
//! on the other side of the pipeline.
//!
//! # Blocking
//!
//! `poll_next` must not block on I/O.  A connector that reads from a slow
//! source does so on its own thread, reports "nothing ready" through
//! [`SourceReader::is_available`], and calls
//! [`AvailabilityNotifier::notify`] from that thread once data arrives.

use crate::availability::AvailabilityNotifier;
use anyhow::Result as AnyResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use splitbridge_types::{CheckpointId, Schema, TypeDescriptor};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

/// A checkpointable unit of work, such as a file range or a partition.
///
/// A split carries its own progress cursor: the value returned from
/// [`SourceReader::snapshot_state`] must be enough to resume reading exactly
/// where the reader left off.
pub trait SourceSplit: Clone + Debug + Serialize + DeserializeOwned + Send + 'static {
    /// Stable identifier of the split, for logging and error reports.
    fn split_id(&self) -> String;
}

/// Sink for the records of one [`SourceReader::poll_next`] call.
pub trait SourcePipeline<T> {
    /// Accepts one raw record with an optional position marker (for example
    /// a partition offset), which is forwarded to the engine along with the
    /// converted row.
    ///
    /// The markers a reader instance emits never decrease, across all the
    /// splits it reads.  A marker lower than one already emitted is raised to
    /// it, so when a reader moves on to a split whose offsets restart, its
    /// markers stay at the previous split's maximum until the new offsets
    /// overtake it.  Restartable progress belongs in the split state
    /// returned by [`SourceReader::snapshot_state`], not in the markers.
    fn output_with_position(&mut self, record: T, position: Option<i64>);

    /// Accepts one raw record.
    fn output(&mut self, record: T) {
        self.output_with_position(record, None)
    }
}

/// Callback for asking the engine for more splits.
pub trait SplitRequester: Send + Sync {
    fn request_split(&self);
}

impl<F> SplitRequester for F
where
    F: Fn() + Send + Sync,
{
    fn request_split(&self) {
        self()
    }
}

/// Everything a connector reader learns about its environment.
#[derive(Clone)]
pub struct ReaderContext {
    schema: Arc<Schema>,
    task_index: usize,
    split_requester: Arc<dyn SplitRequester>,
    availability: AvailabilityNotifier,
}

impl ReaderContext {
    pub fn new(
        schema: Arc<Schema>,
        task_index: usize,
        split_requester: Arc<dyn SplitRequester>,
        availability: AvailabilityNotifier,
    ) -> Self {
        Self {
            schema,
            task_index,
            split_requester,
            availability,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.schema.field_names()
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.schema.types()
    }

    /// Index of the engine task this reader runs in.
    pub fn task_index(&self) -> usize {
        self.task_index
    }

    /// Asks the engine to assign more splits.  Assignment happens later,
    /// through [`SourceReader::add_splits`].
    pub fn send_split_request(&self) {
        self.split_requester.request_split()
    }

    /// Handle for waking the engine when data becomes available.
    pub fn availability(&self) -> AvailabilityNotifier {
        self.availability.clone()
    }
}

impl Debug for ReaderContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ReaderContext")
            .field("schema", &self.schema)
            .field("task_index", &self.task_index)
            .finish_non_exhaustive()
    }
}

/// A split-based pull reader, one instance per engine task.
///
/// Methods that talk to the outside world return [`AnyResult`]; any error
/// they return is fatal to the task.
pub trait SourceReader<T, S>: Send
where
    S: SourceSplit,
{
    /// Acquires the reader's resources.  Called once, before any other
    /// method.
    fn start(&mut self) -> AnyResult<()>;

    /// Emits the next batch of records, if any, to `pipeline`.
    fn poll_next(&mut self, pipeline: &mut dyn SourcePipeline<T>) -> AnyResult<()>;

    /// Returns false once all assigned splits are exhausted and
    /// [`SourceReader::notify_no_more_splits`] has been called.
    fn has_more_elements(&self) -> bool;

    /// Returns false if a call to `poll_next` right now would have nothing to
    /// emit.  A reader that returns false must eventually notify its
    /// [`AvailabilityNotifier`].
    fn is_available(&self) -> bool {
        true
    }

    /// Assigns splits, in the order they should be read.
    fn add_splits(&mut self, splits: Vec<S>) -> AnyResult<()>;

    /// No further splits will be assigned.
    fn notify_no_more_splits(&mut self);

    /// Returns the splits that capture the reader's current progress,
    /// including any split that is partially read.  Must not change the
    /// reader's state.
    fn snapshot_state(&self, checkpoint_id: CheckpointId) -> AnyResult<Vec<S>>;

    /// The checkpoint with `checkpoint_id` is durable.
    fn notify_checkpoint_complete(&mut self, _checkpoint_id: CheckpointId) -> AnyResult<()> {
        Ok(())
    }

    /// Split currently being read, for error reports.
    fn current_split_id(&self) -> Option<String> {
        None
    }

    /// Releases the reader's resources.  Must be safe to call after a
    /// failed `start`.
    fn close(&mut self) -> AnyResult<()>;
}

/// Builds connector readers.
pub trait SourceReaderFactory<T, S>: Send + Sync
where
    S: SourceSplit,
{
    fn create_reader(&self, context: ReaderContext) -> AnyResult<Box<dyn SourceReader<T, S>>>;
}

impl<T, S, F> SourceReaderFactory<T, S> for F
where
    S: SourceSplit,
    F: Fn(ReaderContext) -> AnyResult<Box<dyn SourceReader<T, S>>> + Send + Sync,
{
    fn create_reader(&self, context: ReaderContext) -> AnyResult<Box<dyn SourceReader<T, S>>> {
        self(context)
    }
}

#[cfg(test)]
mod test {
    use super::{ReaderContext, SourcePipeline};
    use crate::availability::AvailabilitySlot;
    use splitbridge_types::{Field, Schema, TypeDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Collect(Vec<(u32, Option<i64>)>);

    impl SourcePipeline<u32> for Collect {
        fn output_with_position(&mut self, record: u32, position: Option<i64>) {
            self.0.push((record, position));
        }
    }

    #[test]
    fn output_has_no_position() {
        let mut pipeline = Collect(Vec::new());
        pipeline.output(1);
        pipeline.output_with_position(2, Some(10));
        assert_eq!(pipeline.0, vec![(1, None), (2, Some(10))]);
    }

    #[test]
    fn context_exposes_schema_and_requests_splits() {
        let schema = Schema::new(vec![
            Field::new("id", TypeDescriptor::Int),
            Field::new("name", TypeDescriptor::String),
        ])
        .unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let requests_clone = requests.clone();
        let slot = AvailabilitySlot::new();

        let context = ReaderContext::new(
            Arc::new(schema),
            3,
            Arc::new(move || {
                requests_clone.fetch_add(1, Ordering::AcqRel);
            }),
            slot.notifier(),
        );

        assert_eq!(context.task_index(), 3);
        assert_eq!(context.field_names().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(
            context.types().cloned().collect::<Vec<_>>(),
            vec![TypeDescriptor::Int, TypeDescriptor::String]
        );

        context.send_split_request();
        context.clone().send_split_request();
        assert_eq!(requests.load(Ordering::Acquire), 2);
    }
}
