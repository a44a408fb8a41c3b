//! The engine-facing reader.
//!
//! [`DelegateSourceReader`] is one reader instance per engine task.  It owns
//! a connector reader built by a [`SourceReaderFactory`] and everything the
//! engine expects around it: row conversion, dirty record routing, metrics,
//! progress reporting, and the availability signal.
//!
//! # Lifecycle
//!
//! ```text
//!   new ──► start ──► poll_next* ──► close
//!    │                                 ▲
//!    └─────────────────────────────────┘
//! ```
//!
//! `close` may be called in any state, including after a failed `start`.
//! It releases sub-resources in a fixed order: the connector reader (only if
//! `start` was attempted), the messenger (only if it was opened), the dirty
//! collector, and the metrics.  A failure releasing one of them doesn't stop
//! the others from being released; all failures are reported together in a
//! [`CloseError`].

use crate::converter::RowConverter;
use crate::datetime::DateTimeParser;
use crate::dirty::{create_dirty_collector, DirtyCollector, DirtyContext, DirtyRecords};
use crate::engine::{EngineContext, InputStatus, ReaderOutput};
use crate::error::{CloseError, CloseFailure, CloseStage, ReaderError};
use crate::messenger::{create_messenger, Messenger, MessengerContext};
use crate::metrics::{
    MetricManager, ReaderLabels, ReaderProgress, DIRTY_COLLECT_FAILURES, MESSENGER_FAILURES,
    RECORD_INVOKE_LATENCY, SNAPSHOTS, SPLITS_ASSIGNED,
};
use crate::pipeline::{DelegateSourcePipeline, PipelineState};
use crate::split::{DelegateSourceSplit, ReaderCheckpoint, SplitEnvelopeSerializer};
use ::metrics::Counter;
use splitbridge_connectorlib::{
    AvailabilityFuture, AvailabilitySlot, ReaderContext, SourceReader, SourceReaderFactory,
    SourceRecord, SourceSplit,
};
use splitbridge_types::config::BridgeConfig;
use splitbridge_types::{CheckpointId, CheckpointStatus, Schema};
use std::sync::Arc;
use tracing::{debug, error, info, warn};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReaderState {
    Created,
    Started,
    Closed,
}

/// Adapts a connector reader to the engine's source reader contract.
///
/// `T` is the connector's record type and `S` its split type.
pub struct DelegateSourceReader<T, S>
where
    S: SourceSplit,
{
    task_index: usize,
    reader_name: String,
    state: ReaderState,

    schema: Arc<Schema>,
    date_time: DateTimeParser,
    reader: Box<dyn SourceReader<T, S>>,
    availability: AvailabilitySlot,

    /// Built on the first poll that has data.
    pipeline: Option<PipelineState>,

    metrics: MetricManager,
    dirty: Box<dyn DirtyCollector>,
    messenger: Box<dyn Messenger>,

    messenger_failures: Counter,
    splits_assigned: Counter,
    snapshots: Counter,

    /// `start` was called on the connector reader, successfully or not.
    reader_start_attempted: bool,
    messenger_opened: bool,
    end_of_input: bool,

    serializer: SplitEnvelopeSerializer,
    checkpoints: CheckpointStatus,
}

impl<T, S> DelegateSourceReader<T, S>
where
    S: SourceSplit,
{
    /// Creates the reader instance for the engine task described by
    /// `engine`.
    ///
    /// Fails if the configured schema is invalid or the factory fails.
    /// Nothing needs to be released in either case.
    pub fn new(
        factory: &dyn SourceReaderFactory<T, S>,
        engine: Arc<dyn EngineContext>,
        reader_name: &str,
        config: &BridgeConfig,
    ) -> Result<Self, ReaderError> {
        let schema = Arc::new(config.schema()?);
        let task_index = engine.index_of_subtask();
        let availability = AvailabilitySlot::new();

        let context = ReaderContext::new(
            schema.clone(),
            task_index,
            Arc::new(move || engine.send_split_request()),
            availability.notifier(),
        );
        let reader = factory
            .create_reader(context)
            .map_err(|error| ReaderError::Create { task_index, error })?;

        let metrics = MetricManager::new(
            &config.metrics,
            &ReaderLabels {
                instance_id: config.instance_id,
                reader_name: reader_name.to_string(),
                task_index,
            },
        );
        let dirty = create_dirty_collector(
            &config.dirty,
            DirtyContext {
                instance_id: config.instance_id,
                task_index,
            },
            metrics.counter(DIRTY_COLLECT_FAILURES),
        );
        let messenger = create_messenger(
            &config.messenger,
            MessengerContext {
                instance_id: config.instance_id,
                task_index,
                reader_name: reader_name.to_string(),
            },
        );

        debug!(task_index, reader = reader_name, "created reader");

        Ok(Self {
            task_index,
            reader_name: reader_name.to_string(),
            state: ReaderState::Created,
            schema,
            date_time: DateTimeParser::new(&config.date_time),
            reader,
            availability,
            pipeline: None,
            messenger_failures: metrics.counter(MESSENGER_FAILURES),
            splits_assigned: metrics.counter(SPLITS_ASSIGNED),
            snapshots: metrics.counter(SNAPSHOTS),
            metrics,
            dirty,
            messenger,
            reader_start_attempted: false,
            messenger_opened: false,
            end_of_input: false,
            serializer: SplitEnvelopeSerializer,
            checkpoints: CheckpointStatus::default(),
        })
    }

    /// Replaces the configured dirty collector.
    pub fn with_dirty_collector(mut self, dirty: Box<dyn DirtyCollector>) -> Self {
        self.dirty = dirty;
        self
    }

    /// Replaces the configured messenger.
    pub fn with_messenger(mut self, messenger: Box<dyn Messenger>) -> Self {
        self.messenger = messenger;
        self
    }

    pub fn task_index(&self) -> usize {
        self.task_index
    }

    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Starts metrics, opens the messenger, and starts the connector reader.
    ///
    /// A messenger that fails to open is counted and logged, and the reader
    /// continues without it.  Calling `start` on a started reader does
    /// nothing.
    pub fn start(&mut self) -> Result<(), ReaderError> {
        match self.state {
            ReaderState::Started => return Ok(()),
            ReaderState::Closed => {
                return Err(ReaderError::Closed {
                    task_index: self.task_index,
                })
            }
            ReaderState::Created => {}
        }

        self.metrics.start();

        if !self.messenger_opened {
            match self.messenger.open() {
                Ok(()) => self.messenger_opened = true,
                Err(error) => {
                    self.messenger_failures.increment(1);
                    warn!(
                        task_index = self.task_index,
                        "failed to open messenger, progress will not be reported: {error:#}"
                    );
                }
            }
        }

        self.reader_start_attempted = true;
        self.reader
            .start()
            .map_err(|error| ReaderError::Start {
                task_index: self.task_index,
                error,
            })?;

        self.state = ReaderState::Started;
        info!(
            task_index = self.task_index,
            reader = %self.reader_name,
            "reader started"
        );
        Ok(())
    }

    /// Returns a future that resolves once polling may produce data.
    ///
    /// The future is complete unless the last poll returned
    /// [`InputStatus::NothingAvailable`] and the connector hasn't signaled
    /// availability since.
    pub fn is_available(&self) -> AvailabilityFuture {
        self.availability.current()
    }

    /// Hands splits assigned by the engine to the connector reader, in
    /// order.
    pub fn add_splits(&mut self, splits: Vec<DelegateSourceSplit<S>>) -> Result<(), ReaderError> {
        self.check_open()?;

        let count = splits.len();
        let splits = splits
            .into_iter()
            .map(DelegateSourceSplit::into_inner)
            .collect::<Vec<_>>();
        debug!(
            task_index = self.task_index,
            splits = ?splits.iter().map(SourceSplit::split_id).collect::<Vec<_>>(),
            "assigning splits"
        );

        self.reader
            .add_splits(splits)
            .map_err(|error| ReaderError::AddSplits {
                task_index: self.task_index,
                error,
            })?;
        self.splits_assigned.increment(count as u64);
        self.end_of_input = false;
        self.availability.complete();
        Ok(())
    }

    /// The engine will not assign further splits.
    pub fn notify_no_more_splits(&mut self) {
        if self.state == ReaderState::Closed {
            return;
        }
        debug!(task_index = self.task_index, "no more splits");
        self.reader.notify_no_more_splits();
        self.availability.complete();
    }

    /// Captures the connector reader's progress for checkpoint
    /// `checkpoint_id`.  Doesn't change the reader's state.
    pub fn snapshot_state(
        &mut self,
        checkpoint_id: CheckpointId,
    ) -> Result<Vec<DelegateSourceSplit<S>>, ReaderError> {
        self.check_open()?;

        let splits = self
            .reader
            .snapshot_state(checkpoint_id)
            .map_err(|error| ReaderError::Snapshot {
                task_index: self.task_index,
                checkpoint_id,
                error,
            })?;

        self.snapshots.increment(1);
        self.checkpoints.last_snapshot = Some(checkpoint_id);
        self.checkpoints.snapshot_splits = splits.len();
        debug!(
            task_index = self.task_index,
            checkpoint_id,
            splits = splits.len(),
            "snapshot taken"
        );

        Ok(splits.into_iter().map(DelegateSourceSplit::new).collect())
    }

    /// Snapshots the reader and encodes the result for persistence.
    pub fn checkpoint(
        &mut self,
        checkpoint_id: CheckpointId,
    ) -> Result<ReaderCheckpoint, ReaderError> {
        let splits = self
            .snapshot_state(checkpoint_id)?
            .iter()
            .map(|split| self.serializer.serialize(split))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| ReaderError::Codec {
                task_index: self.task_index,
                error,
            })?;
        Ok(ReaderCheckpoint::new(checkpoint_id, self.task_index, splits))
    }

    /// Re-assigns the splits captured by `checkpoint`, in the order they were
    /// snapshotted.
    pub fn restore(&mut self, checkpoint: &ReaderCheckpoint) -> Result<(), ReaderError> {
        let splits = checkpoint
            .splits
            .iter()
            .map(|bytes| self.serializer.deserialize::<S>(bytes))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| ReaderError::Codec {
                task_index: self.task_index,
                error,
            })?;

        info!(
            task_index = self.task_index,
            checkpoint_id = checkpoint.checkpoint_id,
            from_task = checkpoint.task_index,
            splits = splits.len(),
            "restoring reader state"
        );
        self.add_splits(splits)
    }

    /// The engine reports checkpoint `checkpoint_id` as durable.
    pub fn notify_checkpoint_complete(
        &mut self,
        checkpoint_id: CheckpointId,
    ) -> Result<(), ReaderError> {
        self.check_open()?;

        self.reader
            .notify_checkpoint_complete(checkpoint_id)
            .map_err(|error| ReaderError::CheckpointComplete {
                task_index: self.task_index,
                checkpoint_id,
                error,
            })?;
        self.checkpoints.last_completed = Some(checkpoint_id);
        Ok(())
    }

    pub fn checkpoint_status(&self) -> CheckpointStatus {
        self.checkpoints.clone()
    }

    /// Records routed to the dirty collector, if it keeps them.
    pub fn dirty_records(&self) -> Option<DirtyRecords> {
        self.dirty.records()
    }

    pub fn progress(&self) -> ReaderProgress {
        self.metrics.progress()
    }

    /// Releases all sub-resources.  See the [module documentation](self) for
    /// the order.
    ///
    /// The first call reports every failure; later calls do nothing.
    pub fn close(&mut self) -> Result<(), ReaderError> {
        if self.state == ReaderState::Closed {
            return Ok(());
        }
        self.state = ReaderState::Closed;

        let mut failures = Vec::new();

        if self.reader_start_attempted {
            if let Err(error) = self.reader.close() {
                failures.push(CloseFailure {
                    stage: CloseStage::SourceReader,
                    error,
                });
            }
        }

        if self.messenger_opened {
            self.messenger_opened = false;
            if let Err(error) = self.messenger.commit(&self.metrics.progress()) {
                self.messenger_failures.increment(1);
                failures.push(CloseFailure {
                    stage: CloseStage::Messenger,
                    error,
                });
            }
        }

        if let Err(error) = self.dirty.close() {
            failures.push(CloseFailure {
                stage: CloseStage::DirtyCollector,
                error,
            });
        }

        if self.metrics.is_started() {
            self.metrics.close();
        }

        // Release anyone waiting on availability.
        self.availability.complete();

        if failures.is_empty() {
            info!(task_index = self.task_index, "reader closed");
            Ok(())
        } else {
            Err(CloseError {
                task_index: self.task_index,
                failures,
            }
            .into())
        }
    }

    fn check_open(&self) -> Result<(), ReaderError> {
        if self.state == ReaderState::Closed {
            Err(ReaderError::Closed {
                task_index: self.task_index,
            })
        } else {
            Ok(())
        }
    }
}

impl<T, S> DelegateSourceReader<T, S>
where
    T: SourceRecord,
    S: SourceSplit,
{
    /// Polls the connector reader once, emitting converted rows to `output`.
    ///
    /// Returns [`InputStatus::NothingAvailable`] when the connector has
    /// nothing to read; the engine should then wait on
    /// [`is_available`](Self::is_available).  Records that fail conversion
    /// go to the dirty collector and don't fail the poll.
    pub fn poll_next(&mut self, output: &mut dyn ReaderOutput) -> Result<InputStatus, ReaderError> {
        match self.state {
            ReaderState::Created => {
                return Err(ReaderError::NotStarted {
                    task_index: self.task_index,
                })
            }
            ReaderState::Closed => {
                return Err(ReaderError::Closed {
                    task_index: self.task_index,
                })
            }
            ReaderState::Started => {}
        }

        if !self.reader.has_more_elements() {
            if !self.end_of_input {
                self.end_of_input = true;
                info!(task_index = self.task_index, "reached end of input");
            }
            return Ok(InputStatus::EndOfInput);
        }

        if !self.reader.is_available() {
            self.availability.renew();
            // The connector may have notified between the check and the
            // renewal.
            if self.reader.is_available() {
                self.availability.complete();
            }
            return Ok(InputStatus::NothingAvailable);
        }

        let state = self.pipeline.get_or_insert_with(|| {
            PipelineState::new(RowConverter::new(
                self.schema.clone(),
                self.date_time.clone(),
            ))
        });

        let tracer = self.metrics.record_timer(RECORD_INVOKE_LATENCY);
        let result = {
            let mut pipeline = DelegateSourcePipeline::new(
                output,
                state,
                &mut self.metrics,
                self.dirty.as_mut(),
            );
            self.reader.poll_next(&mut pipeline)
        };
        tracer.stop();

        result.map_err(|error| ReaderError::Poll {
            task_index: self.task_index,
            split: self.reader.current_split_id(),
            error,
        })?;
        Ok(InputStatus::MoreAvailable)
    }
}

impl<T, S> Drop for DelegateSourceReader<T, S>
where
    S: SourceSplit,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("error closing reader: {e}");
        }
    }
}
