//! Connector-facing API of the splitbridge source reader bridge.
//!
//! Connector authors implement [`SourceReader`] for their data source and
//! hand the bridge a [`SourceReaderFactory`].  They depend only on this crate:
//! the engine side, including record conversion and checkpoint encoding,
//! lives in the `splitbridge` crate.

pub mod availability;
pub mod reader;
pub mod record;

pub use availability::{AvailabilityFuture, AvailabilityNotifier, AvailabilitySlot};
pub use reader::{
    ReaderContext, SourcePipeline, SourceReader, SourceReaderFactory, SourceSplit,
    SplitRequester,
};
pub use record::{ConversionError, Datum, RecordView, Row, SourceRecord};

pub use splitbridge_types as types;
