//! What the bridge needs from the engine that drives it.

use splitbridge_connectorlib::Row;

/// Result of a single [`poll_next`](crate::DelegateSourceReader::poll_next).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputStatus {
    /// The reader may have more data; poll again.
    MoreAvailable,

    /// The reader has nothing right now.  Wait for
    /// [`is_available`](crate::DelegateSourceReader::is_available) before
    /// polling again.
    NothingAvailable,

    /// The reader is exhausted.
    EndOfInput,
}

/// The engine's output sink.
///
/// Ownership of each row passes to the engine on emission.
pub trait ReaderOutput {
    fn collect(&mut self, row: Row);

    fn collect_with_position(&mut self, row: Row, position: i64);
}

/// Engine-side context of one reader task.
pub trait EngineContext: Send + Sync {
    /// Index of the task this reader runs in.
    fn index_of_subtask(&self) -> usize;

    /// Asks the engine's split enumerator for more splits.
    fn send_split_request(&self);
}
