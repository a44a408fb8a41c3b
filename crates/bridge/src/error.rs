use anyhow::Error as AnyError;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use splitbridge_types::config::ConfigError;
use splitbridge_types::{CheckpointId, DetailedError};
use std::borrow::Cow;
use std::fmt::{Display, Error as FmtError, Formatter};
use thiserror::Error as ThisError;

/// Errors reported by [`DelegateSourceReader`](crate::DelegateSourceReader).
///
/// All of these are fatal to the reader's task.  Record-level conversion
/// failures are never reported here: they go to the dirty collector.
#[derive(ThisError, Debug)]
pub enum ReaderError {
    #[error("invalid reader configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("task {task_index}: failed to create connector reader: {error:#}")]
    Create { task_index: usize, error: AnyError },

    #[error("task {task_index}: failed to start connector reader: {error:#}")]
    Start { task_index: usize, error: AnyError },

    #[error("task {task_index}{}: connector reader poll failed: {error:#}", SplitSuffix(.split))]
    Poll {
        task_index: usize,
        split: Option<String>,
        error: AnyError,
    },

    #[error("task {task_index}: failed to assign splits: {error:#}")]
    AddSplits { task_index: usize, error: AnyError },

    #[error("task {task_index}: failed to snapshot reader state for checkpoint {checkpoint_id}: {error:#}")]
    Snapshot {
        task_index: usize,
        checkpoint_id: CheckpointId,
        error: AnyError,
    },

    #[error("task {task_index}: checkpoint {checkpoint_id} completion failed: {error:#}")]
    CheckpointComplete {
        task_index: usize,
        checkpoint_id: CheckpointId,
        error: AnyError,
    },

    #[error("task {task_index}: {error}")]
    Codec {
        task_index: usize,
        #[source]
        error: SplitCodecError,
    },

    #[error("task {task_index}: reader polled before start")]
    NotStarted { task_index: usize },

    #[error("task {task_index}: reader is closed")]
    Closed { task_index: usize },

    #[error(transparent)]
    Close(#[from] CloseError),
}

struct SplitSuffix<'a>(&'a Option<String>);

impl Display for SplitSuffix<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self.0 {
            Some(split) => write!(f, " (split '{split}')"),
            None => Ok(()),
        }
    }
}

impl ReaderError {
    /// Task the error occurred in, if known.
    pub fn task_index(&self) -> Option<usize> {
        match self {
            Self::Config(_) => None,
            Self::Create { task_index, .. }
            | Self::Start { task_index, .. }
            | Self::Poll { task_index, .. }
            | Self::AddSplits { task_index, .. }
            | Self::Snapshot { task_index, .. }
            | Self::CheckpointComplete { task_index, .. }
            | Self::Codec { task_index, .. }
            | Self::NotStarted { task_index }
            | Self::Closed { task_index } => Some(*task_index),
            Self::Close(error) => Some(error.task_index),
        }
    }

    /// Split being read when the error occurred, if known.
    pub fn split(&self) -> Option<&str> {
        match self {
            Self::Poll { split, .. } => split.as_deref(),
            _ => None,
        }
    }
}

impl DetailedError for ReaderError {
    fn error_code(&self) -> Cow<'static, str> {
        match self {
            Self::Config(_) => Cow::from("InvalidReaderConfig"),
            Self::Create { .. } => Cow::from("ReaderCreateError"),
            Self::Start { .. } => Cow::from("ReaderStartError"),
            Self::Poll { .. } => Cow::from("ReaderPollError"),
            Self::AddSplits { .. } => Cow::from("AddSplitsError"),
            Self::Snapshot { .. } => Cow::from("SnapshotError"),
            Self::CheckpointComplete { .. } => Cow::from("CheckpointCompleteError"),
            Self::Codec { .. } => Cow::from("SplitCodecError"),
            Self::NotStarted { .. } => Cow::from("ReaderNotStarted"),
            Self::Closed { .. } => Cow::from("ReaderClosed"),
            Self::Close(_) => Cow::from("ReaderCloseError"),
        }
    }
}

impl Serialize for ReaderError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Close(error) => error.serialize(serializer),
            error => {
                let mut ser = serializer.serialize_struct("ReaderError", 3)?;
                ser.serialize_field("task_index", &error.task_index())?;
                ser.serialize_field("split", &error.split())?;
                ser.serialize_field("message", &error.to_string())?;
                ser.end()
            }
        }
    }
}

/// Sub-resource of a reader instance that is released on close.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CloseStage {
    SourceReader,
    Messenger,
    DirtyCollector,
}

impl Display for CloseStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::SourceReader => f.write_str("connector reader"),
            Self::Messenger => f.write_str("messenger"),
            Self::DirtyCollector => f.write_str("dirty collector"),
        }
    }
}

#[derive(Debug)]
pub struct CloseFailure {
    pub stage: CloseStage,
    pub error: AnyError,
}

/// Failures releasing a reader instance, in the order they occurred.
#[derive(Debug)]
pub struct CloseError {
    pub task_index: usize,
    pub failures: Vec<CloseFailure>,
}

impl CloseError {
    pub fn stages(&self) -> impl Iterator<Item = CloseStage> + '_ {
        self.failures.iter().map(|failure| failure.stage)
    }
}

impl Display for CloseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "task {}: {} error(s) closing reader",
            self.task_index,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  {}: {:#}", failure.stage, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseError {}

impl DetailedError for CloseError {
    fn error_code(&self) -> Cow<'static, str> {
        Cow::from("ReaderCloseError")
    }
}

impl Serialize for CloseError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Failure<'a> {
            stage: CloseStage,
            error: &'a str,
        }

        let failures = self
            .failures
            .iter()
            .map(|failure| (failure.stage, format!("{:#}", failure.error)))
            .collect::<Vec<_>>();
        let failures = failures
            .iter()
            .map(|(stage, error)| Failure {
                stage: *stage,
                error,
            })
            .collect::<Vec<_>>();

        let mut ser = serializer.serialize_struct("CloseError", 2)?;
        ser.serialize_field("task_index", &self.task_index)?;
        ser.serialize_field("failures", &failures)?;
        ser.end()
    }
}

/// Errors encoding or decoding split envelopes and checkpoints.
#[derive(ThisError, Debug)]
pub enum SplitCodecError {
    #[error("empty split envelope")]
    Empty,

    #[error("unsupported split envelope version {version} (expected {expected})")]
    UnsupportedVersion { version: u8, expected: u8 },

    #[error("failed to encode split: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode split: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
