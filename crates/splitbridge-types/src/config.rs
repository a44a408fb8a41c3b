//! Bridge configuration.
//!
//! This module defines the configuration that the host hands to every reader
//! instance of a job.  The whole tree can be deserialized from a YAML or JSON
//! document; all sections except `reader.columns` have defaults.

use crate::schema::{Field, Schema, SchemaError, TypeDescriptor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;

/// Default value of [`MemoryDirtyConfig::max_records`].
pub const fn default_max_dirty_records() -> usize {
    10_000
}

/// Default value of [`FileDirtyConfig::flush_interval_records`].
pub const fn default_flush_interval_records() -> usize {
    100
}

/// Default metric group for source readers.
pub const DEFAULT_METRIC_GROUP: &str = "input";

/// Configuration shared by all reader instances of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Job instance identifier.  Used as a metric label and included in
    /// progress and dirty record reports.
    #[serde(default)]
    pub instance_id: u64,

    /// Human-readable job name.
    #[serde(default)]
    pub job_name: Option<String>,

    /// Reader configuration, including the declared schema.
    pub reader: ReaderOptions,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Where records that fail conversion go.
    #[serde(default)]
    pub dirty: DirtyCollectorConfig,

    /// Where progress reports go.
    #[serde(default)]
    pub messenger: MessengerConfig,

    /// Additional date and time formats accepted when converting text.
    #[serde(default)]
    pub date_time: DateTimeOptions,
}

/// Errors loading a [`BridgeConfig`].
#[derive(ThisError, Debug)]
pub enum ConfigError {
    #[error("failed to parse bridge configuration: {error}")]
    Parse { error: String },

    #[error("invalid reader schema: {0}")]
    Schema(#[from] SchemaError),
}

impl BridgeConfig {
    /// Creates a configuration with default settings for everything but the
    /// reader columns.
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self {
            instance_id: 0,
            job_name: None,
            reader: ReaderOptions { columns },
            metrics: MetricsConfig::default(),
            dirty: DirtyCollectorConfig::default(),
            messenger: MessengerConfig::default(),
            date_time: DateTimeOptions::default(),
        }
    }

    /// Parses a configuration from YAML.  Since YAML is a superset of JSON,
    /// this also accepts JSON documents.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(s).map_err(|e| ConfigError::Parse {
            error: e.to_string(),
        })
    }

    /// Returns the declared schema, validating the column list.
    pub fn schema(&self) -> Result<Schema, ConfigError> {
        Ok(self.reader.schema()?)
    }
}

/// Reader options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderOptions {
    /// Declared columns, in output order.
    pub columns: Vec<ColumnInfo>,
}

impl ReaderOptions {
    pub fn schema(&self) -> Result<Schema, SchemaError> {
        let fields = self
            .columns
            .iter()
            .map(ColumnInfo::to_field)
            .collect::<Result<Vec<_>, _>>()?;
        Schema::new(fields)
    }
}

/// A column declared in the reader configuration.
///
/// The type is kept as text so that a configuration with an unknown type
/// still deserializes and the error can name the offending column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    pub fn to_field(&self) -> Result<Field, SchemaError> {
        let ty = self
            .type_name
            .parse::<TypeDescriptor>()
            .map_err(|error| SchemaError::UnknownType {
                column: self.name.clone(),
                error,
            })?;
        Ok(Field::new(self.name.clone(), ty))
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether reader metrics are reported at all.
    pub enabled: bool,

    /// Metric group, reported as the `group` label.
    pub group: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group: DEFAULT_METRIC_GROUP.to_string(),
        }
    }
}

/// Dirty record collector selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "config", rename_all = "snake_case")]
pub enum DirtyCollectorConfig {
    /// Count dirty records, but don't keep them.
    #[default]
    Noop,

    /// Keep dirty records in memory, where they can be queried.
    Memory(MemoryDirtyConfig),

    /// Append dirty records to a file, one JSON document per line.
    File(FileDirtyConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDirtyConfig {
    /// Maximum number of dirty records to keep.  Further records are counted
    /// as dropped.
    #[serde(default = "default_max_dirty_records")]
    pub max_records: usize,
}

impl Default for MemoryDirtyConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_dirty_records(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDirtyConfig {
    /// File to append dirty records to.  The file is created on first use.
    pub path: PathBuf,

    /// Number of buffered dirty records that triggers a flush.
    #[serde(default = "default_flush_interval_records")]
    pub flush_interval_records: usize,
}

impl FileDirtyConfig {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Messenger selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "config", rename_all = "snake_case")]
pub enum MessengerConfig {
    /// Discard progress reports.
    #[default]
    Noop,

    /// Log a progress summary when the reader commits.
    Log,
}

/// Date and time parsing options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateTimeOptions {
    /// Additional `strftime`-style formats, tried in order after the built-in
    /// ones.
    pub formats: Vec<String>,
}

#[cfg(test)]
mod test {
    use super::{
        BridgeConfig, ColumnInfo, ConfigError, DirtyCollectorConfig, FileDirtyConfig,
        MessengerConfig, MetricsConfig,
    };
    use crate::schema::{SchemaError, TypeDescriptor};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = BridgeConfig::from_yaml_str(
            r#"
reader:
    columns:
        - name: id
          type: int
        - name: name
          type: string
"#,
        )
        .unwrap();

        assert_eq!(config.instance_id, 0);
        assert_eq!(config.metrics, MetricsConfig::default());
        assert_eq!(config.dirty, DirtyCollectorConfig::Noop);
        assert_eq!(config.messenger, MessengerConfig::Noop);

        let schema = config.schema().unwrap();
        assert_eq!(
            schema.types().cloned().collect::<Vec<_>>(),
            vec![TypeDescriptor::Int, TypeDescriptor::String]
        );
    }

    #[test]
    fn full_config() {
        let config = BridgeConfig::from_yaml_str(
            r#"
instance_id: 42
job_name: orders
reader:
    columns:
        - name: ts
          type: timestamp
metrics:
    enabled: false
dirty:
    name: file
    config:
        path: /tmp/dirty.jsonl
messenger:
    name: log
date_time:
    formats: ["%d/%m/%Y %H:%M"]
"#,
        )
        .unwrap();

        assert_eq!(config.instance_id, 42);
        assert_eq!(config.job_name.as_deref(), Some("orders"));
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.group, "input");
        assert_eq!(
            config.dirty,
            DirtyCollectorConfig::File(FileDirtyConfig {
                path: PathBuf::from("/tmp/dirty.jsonl"),
                flush_interval_records: 100,
            })
        );
        assert_eq!(config.messenger, MessengerConfig::Log);
        assert_eq!(config.date_time.formats, vec!["%d/%m/%Y %H:%M".to_string()]);
    }

    #[test]
    fn unknown_column_type_names_the_column() {
        let config = BridgeConfig::new(vec![
            ColumnInfo::new("id", "int"),
            ColumnInfo::new("price", "decimal(10,2)"),
        ]);
        let error = config.schema().unwrap_err();
        match error {
            ConfigError::Schema(SchemaError::UnknownType { column, error }) => {
                assert_eq!(column, "price");
                assert_eq!(error.type_name, "decimal(10,2)");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_reader_section_is_a_parse_error() {
        let error = BridgeConfig::from_yaml_str("instance_id: 1").unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
    }
}
