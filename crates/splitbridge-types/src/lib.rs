pub mod checkpoint;
pub mod config;
pub mod error;
pub mod schema;

pub use checkpoint::{CheckpointId, CheckpointStatus};
pub use error::{DetailedError, ErrorReport};
pub use schema::{Field, Schema, SchemaError, TypeDescriptor};
