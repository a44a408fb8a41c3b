//! Records: the raw form connectors produce and the row form the engine
//! consumes.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::error::Error as StdError;
use std::fmt::{Display, Error as FmtError, Formatter};

/// A single engine value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Datum {
    Null,
    Boolean(bool),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    List(Vec<Datum>),
    Map(Vec<(Datum, Datum)>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }
}

/// An engine row: one [`Datum`] per schema column, in schema order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row(Vec<Datum>);

impl Row {
    pub fn new(values: Vec<Datum>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Datum> {
        self.0.get(index)
    }

    pub fn values(&self) -> &[Datum] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Datum> {
        self.0
    }
}

impl From<Vec<Datum>> for Row {
    fn from(values: Vec<Datum>) -> Self {
        Self(values)
    }
}

/// How a raw record exposes its values.
#[derive(Clone, Copy, Debug)]
pub enum RecordView<'a> {
    /// Values looked up by column name.  Missing names are null.
    Named(&'a Map<String, JsonValue>),

    /// Values in schema order.  Missing trailing values are null.
    Positional(&'a [JsonValue]),
}

impl<'a> RecordView<'a> {
    /// Returns the value for column `name` at schema position `index`.
    pub fn get(&self, index: usize, name: &str) -> Option<&'a JsonValue> {
        match self {
            RecordView::Named(map) => map.get(name),
            RecordView::Positional(values) => values.get(index),
        }
    }

    /// Number of values the record carries.
    pub fn len(&self) -> usize {
        match self {
            RecordView::Named(map) => map.len(),
            RecordView::Positional(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A connector-native record that the bridge knows how to convert.
pub trait SourceRecord: Send {
    /// Returns a view of the record's values, or an error if the record has
    /// no recognizable shape.
    fn view(&self) -> Result<RecordView<'_>, ConversionError>;

    /// JSON rendition of the record, used when the record is reported as
    /// dirty.
    fn to_json(&self) -> JsonValue;
}

impl SourceRecord for JsonValue {
    fn view(&self) -> Result<RecordView<'_>, ConversionError> {
        match self {
            JsonValue::Object(map) => Ok(RecordView::Named(map)),
            JsonValue::Array(values) => Ok(RecordView::Positional(values)),
            other => Err(ConversionError::record_error(
                format!(
                    "expected a JSON object or array, found {}",
                    json_kind(other)
                ),
                Some(&other.to_string()),
            )),
        }
    }

    fn to_json(&self) -> JsonValue {
        self.clone()
    }
}

impl SourceRecord for Map<String, JsonValue> {
    fn view(&self) -> Result<RecordView<'_>, ConversionError> {
        Ok(RecordView::Named(self))
    }

    fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.clone())
    }
}

impl SourceRecord for Vec<JsonValue> {
    fn view(&self) -> Result<RecordView<'_>, ConversionError> {
        Ok(RecordView::Positional(self))
    }

    fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.clone())
    }
}

/// Name of the JSON value's kind, for error messages.
pub fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Error converting a raw record into a [`Row`].
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(transparent)]
// Boxed to keep `Result<Row, ConversionError>` small.
pub struct ConversionError(Box<ConversionErrorInner>);

impl Display for ConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        self.0.fmt(f)
    }
}

impl StdError for ConversionError {}

impl ConversionError {
    pub fn new(field: Option<String>, description: String, invalid_text: Option<&str>) -> Self {
        Self(Box::new(ConversionErrorInner {
            field,
            description,
            invalid_text: invalid_text.map(str::to_string),
        }))
    }

    /// Error attributed to the record as a whole.
    pub fn record_error(description: String, invalid_text: Option<&str>) -> Self {
        Self::new(None, description, invalid_text)
    }

    /// Error attributed to one field.
    pub fn field_error(field: &str, description: String, invalid_text: Option<&str>) -> Self {
        Self::new(Some(field.to_string()), description, invalid_text)
    }

    /// `value` can't be coerced to `type_name`.
    ///
    /// String values are quoted as-is, anything else as JSON text:
    /// `id: unparseable int 'x'`.
    pub fn unparseable(field: &str, type_name: &str, value: &JsonValue) -> Self {
        let text = match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self::field_error(field, format!("unparseable {type_name} '{text}'"), Some(&text))
    }

    pub fn field(&self) -> Option<&str> {
        self.0.field.as_deref()
    }

    pub fn description(&self) -> &str {
        &self.0.description
    }

    pub fn invalid_text(&self) -> Option<&str> {
        self.0.invalid_text.as_deref()
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ConversionErrorInner {
    /// Field that failed to convert, as a path for nested values
    /// (`tags[2]`, `attrs.color`).
    ///
    /// `None` when the record as a whole could not be interpreted.
    field: Option<String>,

    /// Error description.
    description: String,

    /// Offending fragment of the input, as text.
    invalid_text: Option<String>,
}

impl Display for ConversionErrorInner {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.description),
            None => f.write_str(&self.description),
        }
    }
}
