//! Parsing date and time text.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use splitbridge_types::config::DateTimeOptions;

const COMPACT_TIMESTAMP: &str = "%Y%m%d %H:%M:%S";
const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";
const FRACTIONAL_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.f";

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y%m%d"];
const TIME: &str = "%H:%M:%S%.f";

/// Returns the built-in timestamp format for text of length `len`.
///
/// `yyyy-MM-dd HH:mm:ss.S` is 21 characters, `.SSSSSS` is 26.
fn timestamp_format(len: usize) -> Option<&'static str> {
    match len {
        17 => Some(COMPACT_TIMESTAMP),
        19 => Some(TIMESTAMP),
        21..=26 => Some(FRACTIONAL_TIMESTAMP),
        _ => None,
    }
}

/// Parses dates, times, and timestamps using the built-in formats followed by
/// any user-supplied ones.
#[derive(Clone, Debug, Default)]
pub struct DateTimeParser {
    formats: Vec<String>,
}

impl DateTimeParser {
    pub fn new(options: &DateTimeOptions) -> Self {
        Self {
            formats: options.formats.clone(),
        }
    }

    pub fn parse_timestamp(&self, text: &str) -> Option<NaiveDateTime> {
        let text = text.trim();
        let normalized = text.replacen('T', " ", 1);

        timestamp_format(normalized.len())
            .and_then(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())
            .or_else(|| {
                parse_builtin_date(text).and_then(|date| date.and_hms_opt(0, 0, 0))
            })
            .or_else(|| {
                self.formats.iter().find_map(|format| {
                    NaiveDateTime::parse_from_str(text, format).ok().or_else(|| {
                        NaiveDate::parse_from_str(text, format)
                            .ok()
                            .and_then(|date| date.and_hms_opt(0, 0, 0))
                    })
                })
            })
    }

    pub fn parse_date(&self, text: &str) -> Option<NaiveDate> {
        let text = text.trim();
        parse_builtin_date(text)
            .or_else(|| {
                let normalized = text.replacen('T', " ", 1);
                timestamp_format(normalized.len())
                    .and_then(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())
                    .map(|timestamp| timestamp.date())
            })
            .or_else(|| {
                self.formats.iter().find_map(|format| {
                    NaiveDate::parse_from_str(text, format).ok().or_else(|| {
                        NaiveDateTime::parse_from_str(text, format)
                            .ok()
                            .map(|timestamp| timestamp.date())
                    })
                })
            })
    }

    pub fn parse_time(&self, text: &str) -> Option<NaiveTime> {
        let text = text.trim();
        NaiveTime::parse_from_str(text, TIME)
            .ok()
            .or_else(|| {
                self.formats
                    .iter()
                    .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
            })
            .or_else(|| self.parse_timestamp(text).map(|timestamp| timestamp.time()))
    }
}

fn parse_builtin_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}
