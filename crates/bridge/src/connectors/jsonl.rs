use anyhow::{anyhow, Context, Error as AnyError, Result as AnyResult};
use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use splitbridge_connectorlib::{
    AvailabilityNotifier, ReaderContext, SourcePipeline, SourceReader, SourceReaderFactory,
    SourceSplit,
};
use splitbridge_types::CheckpointId;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::thread::{Builder, JoinHandle};
use tracing::{debug, info};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_MAX_RECORDS_PER_POLL: usize = 256;

/// A JSON-lines file and the number of lines already consumed from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSplit {
    pub path: PathBuf,
    pub offset: u64,
}

impl FileSplit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

impl SourceSplit for FileSplit {
    fn split_id(&self) -> String {
        self.path.display().to_string()
    }
}

enum WorkerMessage {
    /// A non-blank line.  `line_number` counts lines from the start of the
    /// file, including this one.
    Line {
        line_number: u64,
        value: JsonValue,
    },
    Eof,
    Error(AnyError),
}

enum WorkerExit {
    Eof,
    Disconnected,
}

/// The split being read and the worker thread reading it.
struct ActiveSplit {
    split: FileSplit,
    receiver: Receiver<WorkerMessage>,
    worker: JoinHandle<()>,
}

impl ActiveSplit {
    /// Stops the worker.  Dropping the receiver unblocks a worker waiting
    /// on a full channel.
    fn stop(self) -> AnyResult<()> {
        drop(self.receiver);
        self.worker
            .join()
            .map_err(|_| anyhow!("reader thread for '{}' panicked", self.split.split_id()))
    }
}

/// Reads JSON-lines files, one split per file.
///
/// Each split is read by its own worker thread, which parses lines into a
/// bounded channel and wakes the engine through the availability notifier.
/// `poll_next` only drains the channel, so it never blocks, and split
/// offsets only change on the poll thread.
///
/// Lines that aren't valid JSON are emitted as JSON strings, so they are
/// rejected by conversion and end up with the dirty records.
pub struct JsonLinesSource {
    context: ReaderContext,
    pending: VecDeque<FileSplit>,
    current: Option<ActiveSplit>,
    no_more_splits: bool,
    split_requested: bool,
    channel_capacity: usize,
    max_records_per_poll: usize,
}

impl JsonLinesSource {
    pub fn new(context: ReaderContext) -> Self {
        Self {
            context,
            pending: VecDeque::new(),
            current: None,
            no_more_splits: false,
            split_requested: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_records_per_poll: DEFAULT_MAX_RECORDS_PER_POLL,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_max_records_per_poll(mut self, max_records: usize) -> Self {
        self.max_records_per_poll = max_records.max(1);
        self
    }

    fn request_split_if_idle(&mut self) {
        if self.current.is_none()
            && self.pending.is_empty()
            && !self.no_more_splits
            && !self.split_requested
        {
            debug!(task_index = self.context.task_index(), "requesting splits");
            self.split_requested = true;
            self.context.send_split_request();
        }
    }

    fn open_next_split(&mut self) -> AnyResult<()> {
        let Some(split) = self.pending.pop_front() else {
            return Ok(());
        };
        let (sender, receiver) = bounded(self.channel_capacity);
        let notifier = self.context.availability();
        let path = split.path.clone();
        let offset = split.offset;
        let worker = Builder::new()
            .name(format!("jsonl-{}", self.context.task_index()))
            .spawn(move || worker_thread(path, offset, sender, notifier))
            .with_context(|| format!("failed to spawn reader thread for '{}'", split.split_id()))?;
        debug!(split = %split.split_id(), offset, "reading split");
        self.current = Some(ActiveSplit {
            split,
            receiver,
            worker,
        });
        Ok(())
    }

    fn finish_current_split(&mut self) -> AnyResult<()> {
        if let Some(active) = self.current.take() {
            info!(
                split = %active.split.split_id(),
                lines = active.split.offset,
                "finished split"
            );
            active.stop()?;
        }
        Ok(())
    }
}

fn worker_thread(
    path: PathBuf,
    offset: u64,
    sender: Sender<WorkerMessage>,
    notifier: AvailabilityNotifier,
) {
    let message = match read_lines(&path, offset, &sender, &notifier) {
        Ok(WorkerExit::Eof) => WorkerMessage::Eof,
        Ok(WorkerExit::Disconnected) => return,
        Err(e) => WorkerMessage::Error(e),
    };
    // The receiver may be gone already; there's no one left to tell.
    let _ = sender.send(message);
    notifier.notify();
}

fn read_lines(
    path: &PathBuf,
    offset: u64,
    sender: &Sender<WorkerMessage>,
    notifier: &AvailabilityNotifier,
) -> AnyResult<WorkerExit> {
    let file = File::open(path)
        .with_context(|| format!("failed to open input file '{}'", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut line_number = 0;
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .with_context(|| format!("failed to read input file '{}'", path.display()))?;
        if n == 0 {
            return Ok(WorkerExit::Eof);
        }
        line_number += 1;
        if line_number <= offset {
            continue;
        }
        let Some(value) = parse_line(&line) else {
            continue;
        };
        if sender.send(WorkerMessage::Line { line_number, value }).is_err() {
            return Ok(WorkerExit::Disconnected);
        }
        notifier.notify();
    }
}

/// Parses one line, or returns `None` for a blank one.
///
/// Lines that aren't valid UTF-8 or valid JSON come back as JSON strings.
/// Invalid UTF-8 is replaced rather than parsed, so such a line never
/// converts successfully.
fn parse_line(line: &[u8]) -> Option<JsonValue> {
    match std::str::from_utf8(line) {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.to_string())))
        }
        Err(_) => Some(JsonValue::String(
            String::from_utf8_lossy(line).trim().to_string(),
        )),
    }
}

impl SourceReader<JsonValue, FileSplit> for JsonLinesSource {
    fn start(&mut self) -> AnyResult<()> {
        self.request_split_if_idle();
        Ok(())
    }

    fn poll_next(&mut self, pipeline: &mut dyn SourcePipeline<JsonValue>) -> AnyResult<()> {
        if self.current.is_none() {
            self.open_next_split()?;
        }
        let Some(active) = self.current.as_mut() else {
            self.request_split_if_idle();
            return Ok(());
        };

        let mut finished = false;
        for _ in 0..self.max_records_per_poll {
            match active.receiver.try_recv() {
                Ok(WorkerMessage::Line { line_number, value }) => {
                    active.split.offset = line_number;
                    pipeline.output_with_position(value, Some(line_number as i64));
                }
                Ok(WorkerMessage::Eof) => {
                    finished = true;
                    break;
                }
                Ok(WorkerMessage::Error(error)) => return Err(error),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(anyhow!(
                        "reader thread for '{}' exited unexpectedly",
                        active.split.split_id()
                    ))
                }
            }
        }

        if finished {
            self.finish_current_split()?;
            self.request_split_if_idle();
        }
        Ok(())
    }

    fn has_more_elements(&self) -> bool {
        self.current.is_some() || !self.pending.is_empty() || !self.no_more_splits
    }

    fn is_available(&self) -> bool {
        match &self.current {
            Some(active) => !active.receiver.is_empty(),
            None => !self.pending.is_empty() || self.no_more_splits,
        }
    }

    fn add_splits(&mut self, splits: Vec<FileSplit>) -> AnyResult<()> {
        self.split_requested = false;
        self.pending.extend(splits);
        Ok(())
    }

    fn notify_no_more_splits(&mut self) {
        self.no_more_splits = true;
    }

    fn snapshot_state(&self, _checkpoint_id: CheckpointId) -> AnyResult<Vec<FileSplit>> {
        Ok(self
            .current
            .iter()
            .map(|active| active.split.clone())
            .chain(self.pending.iter().cloned())
            .collect())
    }

    fn current_split_id(&self) -> Option<String> {
        self.current.as_ref().map(|active| active.split.split_id())
    }

    fn close(&mut self) -> AnyResult<()> {
        if let Some(active) = self.current.take() {
            active.stop()?;
        }
        Ok(())
    }
}

/// Factory for [`JsonLinesSource`] readers.
pub fn json_lines_factory() -> impl SourceReaderFactory<JsonValue, FileSplit> {
    |context: ReaderContext| -> AnyResult<Box<dyn SourceReader<JsonValue, FileSplit>>> {
        Ok(Box::new(JsonLinesSource::new(context)))
    }
}
