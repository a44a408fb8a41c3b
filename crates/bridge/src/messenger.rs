//! Progress reporting.
//!
//! A messenger is opened when the reader starts and committed once when it
//! closes.  Messenger failures never affect the data path.

use crate::metrics::ReaderProgress;
use anyhow::Result as AnyResult;
use splitbridge_types::config::MessengerConfig;
use tracing::info;

/// Identity of the reader a messenger reports for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessengerContext {
    pub instance_id: u64,
    pub task_index: usize,
    pub reader_name: String,
}

pub trait Messenger: Send {
    fn open(&mut self) -> AnyResult<()>;

    /// Finalizes progress reporting.  Calling `commit` more than once is a
    /// no-op.
    fn commit(&mut self, progress: &ReaderProgress) -> AnyResult<()>;
}

#[derive(Debug, Default)]
pub struct NoOpMessenger;

impl Messenger for NoOpMessenger {
    fn open(&mut self) -> AnyResult<()> {
        Ok(())
    }

    fn commit(&mut self, _progress: &ReaderProgress) -> AnyResult<()> {
        Ok(())
    }
}

/// Logs a progress summary on commit.
#[derive(Debug)]
pub struct LogMessenger {
    context: MessengerContext,
    committed: bool,
}

impl LogMessenger {
    pub fn new(context: MessengerContext) -> Self {
        Self {
            context,
            committed: false,
        }
    }
}

impl Messenger for LogMessenger {
    fn open(&mut self) -> AnyResult<()> {
        info!(
            instance_id = self.context.instance_id,
            task_index = self.context.task_index,
            reader = %self.context.reader_name,
            "reader opened"
        );
        Ok(())
    }

    fn commit(&mut self, progress: &ReaderProgress) -> AnyResult<()> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;
        info!(
            instance_id = self.context.instance_id,
            task_index = self.context.task_index,
            reader = %self.context.reader_name,
            success = progress.success,
            dirty = progress.dirty,
            "reader progress committed"
        );
        Ok(())
    }
}

pub fn create_messenger(config: &MessengerConfig, context: MessengerContext) -> Box<dyn Messenger> {
    match config {
        MessengerConfig::Noop => Box::new(NoOpMessenger),
        MessengerConfig::Log => Box::new(LogMessenger::new(context)),
    }
}
