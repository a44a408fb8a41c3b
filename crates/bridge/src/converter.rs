//! Schema-driven conversion of raw records into engine rows.

use crate::datetime::DateTimeParser;
use chrono::DateTime;
use serde_json::Value as JsonValue;
use splitbridge_connectorlib::{ConversionError, Datum, Row, SourceRecord};
use splitbridge_types::{Schema, TypeDescriptor};
use std::str::FromStr;
use std::sync::Arc;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Converts raw records into [`Row`]s with exactly one value per schema
/// field, in schema order.
///
/// Conversion is a pure function of the record: converting the same record
/// twice yields the same row.
#[derive(Clone, Debug)]
pub struct RowConverter {
    schema: Arc<Schema>,
    date_time: DateTimeParser,
}

impl RowConverter {
    pub fn new(schema: Arc<Schema>, date_time: DateTimeParser) -> Self {
        Self { schema, date_time }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn convert<R>(&self, record: &R) -> Result<Row, ConversionError>
    where
        R: SourceRecord + ?Sized,
    {
        let view = record.view()?;
        let mut values = Vec::with_capacity(self.schema.len());
        for (index, field) in self.schema.fields().iter().enumerate() {
            let datum = match view.get(index, &field.name) {
                None => Datum::Null,
                Some(value) => self.convert_value(&field.ty, value, &field.name)?,
            };
            values.push(datum);
        }
        Ok(Row::new(values))
    }

    /// Converts one value.  `path` names the value in errors.
    fn convert_value(
        &self,
        ty: &TypeDescriptor,
        value: &JsonValue,
        path: &str,
    ) -> Result<Datum, ConversionError> {
        if value.is_null() {
            return Ok(Datum::Null);
        }
        let unparseable = || ConversionError::unparseable(path, &ty.to_string(), value);

        match ty {
            TypeDescriptor::Boolean => match value {
                JsonValue::Bool(b) => Some(*b),
                JsonValue::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
                JsonValue::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    _ => None,
                },
                _ => None,
            }
            .map(Datum::Boolean)
            .ok_or_else(unparseable),
            TypeDescriptor::Short => integer::<i16>(value).map(Datum::Short).ok_or_else(unparseable),
            TypeDescriptor::Int => integer::<i32>(value).map(Datum::Int).ok_or_else(unparseable),
            TypeDescriptor::Long => integer::<i64>(value).map(Datum::Long).ok_or_else(unparseable),
            TypeDescriptor::Float => float(value)
                .and_then(|f| {
                    let narrowed = f as f32;
                    (narrowed.is_finite() || !f.is_finite()).then_some(narrowed)
                })
                .map(Datum::Float)
                .ok_or_else(unparseable),
            TypeDescriptor::Double => float(value).map(Datum::Double).ok_or_else(unparseable),
            TypeDescriptor::String => Ok(Datum::String(match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })),
            TypeDescriptor::Binary => match value {
                JsonValue::String(s) => Some(s.as_bytes().to_vec()),
                JsonValue::Array(items) => items
                    .iter()
                    .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect(),
                _ => None,
            }
            .map(Datum::Binary)
            .ok_or_else(unparseable),
            TypeDescriptor::Date => match value {
                JsonValue::String(s) => self.date_time.parse_date(s),
                JsonValue::Number(n) => n
                    .as_i64()
                    .and_then(|days| days.checked_mul(MILLIS_PER_DAY))
                    .and_then(DateTime::from_timestamp_millis)
                    .map(|timestamp| timestamp.date_naive()),
                _ => None,
            }
            .map(Datum::Date)
            .ok_or_else(unparseable),
            TypeDescriptor::Time => match value {
                JsonValue::String(s) => self.date_time.parse_time(s),
                JsonValue::Number(n) => n
                    .as_i64()
                    .filter(|millis| (0..MILLIS_PER_DAY).contains(millis))
                    .and_then(DateTime::from_timestamp_millis)
                    .map(|timestamp| timestamp.time()),
                _ => None,
            }
            .map(Datum::Time)
            .ok_or_else(unparseable),
            TypeDescriptor::Timestamp => match value {
                JsonValue::String(s) => self.date_time.parse_timestamp(s),
                JsonValue::Number(n) => n
                    .as_i64()
                    .and_then(DateTime::from_timestamp_millis)
                    .map(|timestamp| timestamp.naive_utc()),
                _ => None,
            }
            .map(Datum::Timestamp)
            .ok_or_else(unparseable),
            TypeDescriptor::List(element) => {
                let JsonValue::Array(items) = value else {
                    return Err(unparseable());
                };
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.convert_value(element, item, &format!("{path}[{i}]")))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Datum::List)
            }
            TypeDescriptor::Map(key_type, value_type) => {
                let JsonValue::Object(entries) = value else {
                    return Err(unparseable());
                };
                entries
                    .iter()
                    .map(|(key, item)| {
                        let item_path = format!("{path}.{key}");
                        let key =
                            self.convert_value(key_type, &JsonValue::String(key.clone()), &item_path)?;
                        let item = self.convert_value(value_type, item, &item_path)?;
                        Ok((key, item))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Datum::Map)
            }
        }
    }
}

/// Reads an integer of type `T` from a JSON number or numeric text.
///
/// Numbers that don't fit `T`, and non-integral numbers, are rejected.
fn integer<T>(value: &JsonValue) -> Option<T>
where
    T: TryFrom<i64> + FromStr,
{
    match value {
        JsonValue::Number(n) => n.as_i64().and_then(|i| T::try_from(i).ok()),
        JsonValue::String(s) => s.trim().parse::<T>().ok(),
        _ => None,
    }
}

fn float(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
