//! Date/time converter

use crate::{ConvertError, Converter};
use chrono::{DateTime, Timelike, Utc};
use datapluck_core::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f %z";

/// Renders timestamps as ISO-8601 text
///
/// A value whose time-of-day is exactly midnight is rendered in the
/// date-only format, anything else carries the full date-time.
pub struct DateTimeIso8601Converter;

impl Converter for DateTimeIso8601Converter {
    fn handles(&self, value: &Value) -> bool {
        matches!(value, Value::Timestamp(_))
    }

    fn convert(&self, value: &Value) -> Result<Value, ConvertError> {
        match value {
            Value::Timestamp(tm) => {
                let format = if has_time_of_day(tm) {
                    DATE_TIME_FORMAT
                } else {
                    DATE_FORMAT
                };

                Ok(Value::Text(tm.format(format).to_string()))
            }
            other => Err(ConvertError::UnexpectedType {
                expected: "a date/time value",
                value: other.to_string(),
            }),
        }
    }
}

fn has_time_of_day(tm: &DateTime<Utc>) -> bool {
    !(tm.hour() == 0 && tm.minute() == 0 && tm.second() == 0)
}
