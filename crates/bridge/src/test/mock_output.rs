use crate::engine::ReaderOutput;
use serde_json::Value as JsonValue;
use splitbridge_connectorlib::{Row, SourcePipeline};

/// Engine output that keeps everything it receives.
#[derive(Debug, Default)]
pub struct MockOutput {
    collected: Vec<(Row, Option<i64>)>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.collected.len()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.collected.iter().map(|(row, _)| row.clone()).collect()
    }

    /// Position markers in emission order; `None` for rows collected
    /// without one.
    pub fn positions(&self) -> Vec<Option<i64>> {
        self.collected.iter().map(|(_, position)| *position).collect()
    }
}

impl ReaderOutput for MockOutput {
    fn collect(&mut self, row: Row) {
        self.collected.push((row, None));
    }

    fn collect_with_position(&mut self, row: Row, position: i64) {
        self.collected.push((row, Some(position)));
    }
}

/// Connector-side pipeline that keeps raw records, for testing connectors
/// without the bridge.
#[derive(Debug, Default)]
pub struct MockPipeline {
    records: Vec<(JsonValue, Option<i64>)>,
}

impl MockPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> Vec<JsonValue> {
        self.records.iter().map(|(record, _)| record.clone()).collect()
    }

    pub fn positions(&self) -> Vec<Option<i64>> {
        self.records.iter().map(|(_, position)| *position).collect()
    }
}

impl SourcePipeline<JsonValue> for MockPipeline {
    fn output_with_position(&mut self, record: JsonValue, position: Option<i64>) {
        self.records.push((record, position));
    }
}
