//! Adapts split-based connector readers to a streaming engine's source
//! reader contract.
//!
//! A connector implements [`SourceReader`](splitbridge_connectorlib::SourceReader)
//! from `splitbridge-connectorlib`: it reads raw records from the splits
//! it's assigned and reports its progress as splits.  This crate wraps each
//! connector reader instance in a [`DelegateSourceReader`], which is what
//! the engine drives.
//!
//! ## Overview
//!
//! ```text
//!                ┌──────────────────────────────────────────────────────┐
//!                │                 DelegateSourceReader                 │
//!   engine       │  ┌─────────┐ records ┌──────────┐  rows              │
//!  poll_next ───►│  │connector├────────►│ pipeline ├──────────────────────────► ReaderOutput
//!                │  │ reader  │         └──┬────┬──┘                    │
//!  add_splits ──►│  └────┬────┘            │    │ dirty                 │
//!  snapshot  ◄───┤       │ notify          │    ▼                       │
//!                │       ▼          metrics│  ┌───────────────┐         │
//!  is_available ◄┤  availability slot      │  │dirty collector│         │
//!                │                         ▼  └───────────────┘         │
//!                │                  MetricManager ──► messenger (close) │
//!                └──────────────────────────────────────────────────────┘
//! ```
//!
//! * Rows are converted from raw records according to the declared
//!   [`Schema`](splitbridge_types::Schema) by a [`RowConverter`].  Records
//!   that fail conversion go to a [`DirtyCollector`] instead of the engine.
//!
//! * Splits cross the engine boundary wrapped in [`DelegateSourceSplit`]s
//!   and are persisted with a [`SplitEnvelopeSerializer`].
//!
//! * When a poll finds nothing to read, the reader renews its availability
//!   signal and the connector completes it once data arrives.
//!
//! ## Configuration
//!
//! Each reader instance is created from a
//! [`BridgeConfig`](splitbridge_types::config::BridgeConfig), which declares
//! the schema and selects the dirty collector, messenger, and metrics
//! settings.
//!
//! ## Connectors
//!
//! The [`connectors`] module contains a JSON-lines file connector.

pub mod connectors;
mod converter;
mod datetime;
pub mod dirty;
mod engine;
mod error;
pub mod messenger;
pub mod metrics;
mod pipeline;
mod reader;
mod split;

#[cfg(test)]
pub mod test;

pub use converter::RowConverter;
pub use datetime::DateTimeParser;
pub use dirty::{DirtyCollector, DirtyRecord, DirtyRecords};
pub use engine::{EngineContext, InputStatus, ReaderOutput};
pub use error::{CloseError, CloseFailure, CloseStage, ReaderError, SplitCodecError};
pub use messenger::Messenger;
pub use metrics::{MetricManager, ReaderProgress};
pub use pipeline::{DelegateSourcePipeline, PipelineState};
pub use reader::DelegateSourceReader;
pub use split::{DelegateSourceSplit, ReaderCheckpoint, SplitEnvelopeSerializer, SPLIT_ENVELOPE_VERSION};

pub use splitbridge_connectorlib as connectorlib;
pub use splitbridge_types as types;
