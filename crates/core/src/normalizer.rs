use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::EmployeeRecord;

/// Reasons a single employee entry is skipped instead of placed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("employee entry is not an object")]
    NotAnObject,
    #[error("invalid coordinates (latitude: {latitude}, longitude: {longitude})")]
    InvalidCoordinates { latitude: String, longitude: String },
}

/// Turns raw directory JSON into [`EmployeeRecord`] values.
pub struct Normalizer;

impl Normalizer {
    /// Normalizes one element of the employee array.
    ///
    /// Display fields are lenient (missing or null become empty strings);
    /// coordinates must coerce to numbers, see [`coerce_coordinate`].
    pub fn normalize(raw: &Value) -> Result<EmployeeRecord, RecordError> {
        let object = raw.as_object().ok_or(RecordError::NotAnObject)?;

        let latitude = coerce_coordinate(object.get("latitude"));
        let longitude = coerce_coordinate(object.get("longitude"));
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            return Err(RecordError::InvalidCoordinates {
                latitude: describe(object.get("latitude")),
                longitude: describe(object.get("longitude")),
            });
        };

        Ok(EmployeeRecord {
            first_name: display_field(object, "firstName"),
            last_name: display_field(object, "lastName"),
            city: display_field(object, "city"),
            country: display_field(object, "country"),
            latitude,
            longitude,
        })
    }
}

/// Converts a coordinate with JavaScript `Number()` rules and returns
/// `None` only where that conversion yields NaN.
///
/// A missing field is NaN. `null`, `false` and blank strings become `0`,
/// `true` becomes `1`, and `"Infinity"` is accepted. Objects are NaN, and an
/// array converts like its single element (empty arrays are `0`).
pub fn coerce_coordinate(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Null => 0.0,
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => parse_numeric(text)?,
        Value::Array(items) => match items.as_slice() {
            [] | [Value::Null] => 0.0,
            [single @ (Value::Number(_) | Value::String(_))] => coerce_coordinate(Some(single))?,
            _ => return None,
        },
        Value::Object(_) => return None,
    };
    (!number.is_nan()).then_some(number)
}

fn parse_numeric(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    match trimmed {
        "" => return Some(0.0),
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    if let Some(parsed) = parse_radix_literal(trimmed) {
        return parsed;
    }
    // `f64::from_str` also takes "inf", "nan" and friends.
    let decimal = trimmed
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !decimal {
        return None;
    }
    trimmed.parse().ok()
}

/// `0x`, `0o` and `0b` literals. Returns `None` when `text` has no such prefix.
fn parse_radix_literal(text: &str) -> Option<Option<f64>> {
    let radix = match text.get(..2)? {
        "0x" | "0X" => 16,
        "0o" | "0O" => 8,
        "0b" | "0B" => 2,
        _ => return None,
    };
    let digits = &text[2..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Some(None);
    }
    Some(u128::from_str_radix(digits, radix).ok().map(|value| value as f64))
}

fn display_field(object: &Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => "missing".to_string(),
        Some(value) => value.to_string(),
    }
}
