use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{borrow::Cow, error::Error as StdError};

/// Machine-readable report of an error, suitable for logging or for shipping
/// to an external monitoring channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorReport {
    /// Human-readable error message.
    pub message: String,
    /// Error code is a string that specifies this error type.
    pub error_code: Cow<'static, str>,
    /// Detailed error metadata.
    /// The contents of this field is determined by `error_code`.
    pub details: JsonValue,
}

/// Error trait which errors surfaced to operators must implement such that
/// they can be transformed into a complete [`ErrorReport`].
pub trait DetailedError: StdError + Serialize {
    /// Identifying name of the error.
    fn error_code(&self) -> Cow<'static, str>;
}

impl<E> From<&E> for ErrorReport
where
    E: DetailedError,
{
    fn from(error: &E) -> ErrorReport {
        Self::from_error(error)
    }
}

impl ErrorReport {
    /// Transforms the detailed error into a report.
    /// - The message is retrieved using `to_string()` (available due to trait `StdError`)
    /// - The details are retrieved by serializing to JSON (available due to trait `Serialize`)
    pub fn from_error<E>(error: &E) -> Self
    where
        E: DetailedError,
    {
        let message = error.to_string();
        let error_code = error.error_code();
        let details = serde_json::to_value(error).unwrap_or_else(|e| {
            JsonValue::String(format!("Failed to serialize error. Details: '{e}'"))
        });

        Self {
            message,
            error_code,
            details,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{DetailedError, ErrorReport};
    use serde::Serialize;
    use serde_json::json;
    use std::borrow::Cow;

    #[derive(Debug, Serialize, thiserror::Error)]
    #[error("split '{split}' is broken")]
    struct BrokenSplit {
        split: String,
    }

    impl DetailedError for BrokenSplit {
        fn error_code(&self) -> Cow<'static, str> {
            Cow::from("BrokenSplit")
        }
    }

    #[test]
    fn report_carries_code_and_details() {
        let error = BrokenSplit {
            split: "p-0".to_string(),
        };
        let report = ErrorReport::from(&error);
        assert_eq!(report.message, "split 'p-0' is broken");
        assert_eq!(report.error_code, "BrokenSplit");
        assert_eq!(report.details, json!({"split": "p-0"}));
    }
}
