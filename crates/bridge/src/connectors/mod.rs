//! Connectors that ship with the bridge.

mod jsonl;

pub use jsonl::{json_lines_factory, FileSplit, JsonLinesSource};
