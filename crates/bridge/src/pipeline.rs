//! The sink connector readers emit records into.
//!
//! ```text
//!                          ┌─────────┐ Row  ┌──────────────┐
//!   connector ──record──►  │converter├─────►│ engine output│
//!                          └────┬────┘      └──────────────┘
//!                               │ ConversionError
//!                               ▼
//!                        ┌───────────────┐
//!                        │dirty collector│
//!                        └───────────────┘
//! ```
//!
//! For every record exactly one of two things happens: the converted row is
//! emitted to the engine and counted as a success, or the raw record goes to
//! the dirty collector and is counted as dirty.

use crate::converter::RowConverter;
use crate::dirty::DirtyCollector;
use crate::engine::ReaderOutput;
use crate::metrics::MetricManager;
use splitbridge_connectorlib::{SourcePipeline, SourceRecord};
use tracing::debug;

/// Pipeline state that outlives a single poll.
#[derive(Debug)]
pub struct PipelineState {
    converter: RowConverter,
    last_position: Option<i64>,
}

impl PipelineState {
    pub fn new(converter: RowConverter) -> Self {
        Self {
            converter,
            last_position: None,
        }
    }

    /// Highest position marker emitted so far.
    pub fn last_position(&self) -> Option<i64> {
        self.last_position
    }

    /// Returns the marker to emit for `position`: never lower than one
    /// emitted before by this reader instance, whichever split it came from.
    fn advance(&mut self, position: i64) -> i64 {
        let position = match self.last_position {
            Some(last) if last > position => last,
            _ => position,
        };
        self.last_position = Some(position);
        position
    }
}

/// Fans one poll's records out to the engine, the metrics, and the dirty
/// collector.
pub struct DelegateSourcePipeline<'a> {
    output: &'a mut dyn ReaderOutput,
    state: &'a mut PipelineState,
    metrics: &'a mut MetricManager,
    dirty: &'a mut dyn DirtyCollector,
}

impl<'a> DelegateSourcePipeline<'a> {
    pub fn new(
        output: &'a mut dyn ReaderOutput,
        state: &'a mut PipelineState,
        metrics: &'a mut MetricManager,
        dirty: &'a mut dyn DirtyCollector,
    ) -> Self {
        Self {
            output,
            state,
            metrics,
            dirty,
        }
    }
}

impl<T> SourcePipeline<T> for DelegateSourcePipeline<'_>
where
    T: SourceRecord,
{
    fn output_with_position(&mut self, record: T, position: Option<i64>) {
        match self.state.converter.convert(&record) {
            Ok(row) => {
                match position {
                    Some(position) => {
                        let position = self.state.advance(position);
                        self.output.collect_with_position(row, position);
                    }
                    None => self.output.collect(row),
                }
                self.metrics.record_success();
            }
            Err(error) => {
                debug!(%error, "routing record to dirty collector");
                self.dirty.collect(&record.to_json(), &error);
                self.metrics.record_dirty();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{DelegateSourcePipeline, PipelineState};
    use crate::converter::RowConverter;
    use crate::datetime::DateTimeParser;
    use crate::dirty::{DirtyCollector, DirtyContext, MemoryDirtyCollector};
    use crate::metrics::{MetricManager, ReaderLabels, ReaderProgress};
    use crate::test::MockOutput;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use splitbridge_connectorlib::{Datum, Row, SourcePipeline};
    use splitbridge_types::config::MetricsConfig;
    use splitbridge_types::{Field, Schema, TypeDescriptor};
    use std::sync::Arc;

    fn state() -> PipelineState {
        let schema = Schema::new(vec![
            Field::new("id", TypeDescriptor::Int),
            Field::new("name", TypeDescriptor::String),
        ])
        .unwrap();
        PipelineState::new(RowConverter::new(
            Arc::new(schema),
            DateTimeParser::default(),
        ))
    }

    fn metrics() -> MetricManager {
        MetricManager::new(
            &MetricsConfig::default(),
            &ReaderLabels {
                instance_id: 0,
                reader_name: "test".to_string(),
                task_index: 0,
            },
        )
    }

    #[test]
    fn each_record_goes_to_exactly_one_sink() {
        let mut output = MockOutput::new();
        let mut state = state();
        let mut metrics = metrics();
        let mut dirty = MemoryDirtyCollector::new(DirtyContext::default(), 100);
        let dirty_records = dirty.records().unwrap();

        {
            let mut pipeline =
                DelegateSourcePipeline::new(&mut output, &mut state, &mut metrics, &mut dirty);
            pipeline.output(json!({"id": "7", "name": "ann"}));
            pipeline.output(json!({"id": "x", "name": "ann"}));
            pipeline.output(json!({"id": 8}));
        }

        assert_eq!(
            output.rows(),
            vec![
                Row::new(vec![Datum::Int(7), Datum::String("ann".to_string())]),
                Row::new(vec![Datum::Int(8), Datum::Null]),
            ]
        );
        let dirty = dirty_records.records();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].cause, "id: unparseable int 'x'");
        assert_eq!(metrics.progress(), ReaderProgress { success: 2, dirty: 1 });
    }

    #[test]
    fn positions_never_decrease() {
        let mut output = MockOutput::new();
        let mut state = state();
        let mut metrics = metrics();
        let mut dirty = MemoryDirtyCollector::new(DirtyContext::default(), 100);

        {
            let mut pipeline =
                DelegateSourcePipeline::new(&mut output, &mut state, &mut metrics, &mut dirty);
            pipeline.output_with_position(json!([1, "a"]), Some(10));
            pipeline.output_with_position(json!([2, "b"]), Some(5));
            pipeline.output_with_position(json!([3, "c"]), Some(12));
            // A dirty record doesn't move the marker.
            pipeline.output_with_position(json!(["x", "d"]), Some(50));
        }

        assert_eq!(output.positions(), vec![Some(10), Some(10), Some(12)]);
        assert_eq!(state.last_position(), Some(12));
    }

    #[test]
    fn positions_stay_monotonic_across_splits() {
        let mut output = MockOutput::new();
        let mut state = state();
        let mut metrics = metrics();
        let mut dirty = MemoryDirtyCollector::new(DirtyContext::default(), 100);

        // A five-line split followed by a three-line one, both emitting line
        // numbers.
        {
            let mut pipeline =
                DelegateSourcePipeline::new(&mut output, &mut state, &mut metrics, &mut dirty);
            for line in 1..=5 {
                pipeline.output_with_position(json!([line, "a"]), Some(line));
            }
        }
        {
            let mut pipeline =
                DelegateSourcePipeline::new(&mut output, &mut state, &mut metrics, &mut dirty);
            for line in 1..=3 {
                pipeline.output_with_position(json!([line, "b"]), Some(line));
            }
        }

        assert_eq!(
            output.positions(),
            [1, 2, 3, 4, 5, 5, 5, 5].map(Some).to_vec()
        );
        assert_eq!(state.last_position(), Some(5));
        assert_eq!(metrics.progress(), ReaderProgress { success: 8, dirty: 0 });
    }
}
