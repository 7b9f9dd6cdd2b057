//! Conversion of decoded field maps into the structured (`jsonPayload`) form.

use super::value::{FieldMap, Value};
use crate::parser::SubsecondUnit;
use chrono::SecondsFormat;
use serde_json::{Map, Number};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("Non-finite number at '{path}'")]
    NonFiniteNumber { path: String },
    #[error("Unsupported {kind} value at '{path}'")]
    Unsupported { kind: &'static str, path: String },
    #[error("Timestamp out of range at '{path}'")]
    TimestampOutOfRange { path: String },
}

impl ConversionError {
    pub fn path(&self) -> &str {
        match self {
            ConversionError::NonFiniteNumber { path }
            | ConversionError::Unsupported { path, .. }
            | ConversionError::TimestampOutOfRange { path } => path,
        }
    }

    // Paths are assembled while unwinding so the happy path never allocates them.
    fn within(mut self, segment: &str) -> Self {
        let path = match &mut self {
            ConversionError::NonFiniteNumber { path }
            | ConversionError::Unsupported { path, .. }
            | ConversionError::TimestampOutOfRange { path } => path,
        };
        *path = if path.is_empty() {
            segment.to_string()
        } else if path.starts_with('[') {
            format!("{segment}{path}")
        } else {
            format!("{segment}.{path}")
        };
        self
    }
}

/// Converts a record's remaining fields into a JSON object payload.
///
/// Every `Value` shape is handled explicitly; shapes the service cannot
/// represent fail with a typed error instead of being coerced.
pub fn to_json_payload(
    fields: &FieldMap,
    unit: SubsecondUnit,
) -> Result<Map<String, serde_json::Value>, ConversionError> {
    let mut object = Map::new();
    for (key, value) in fields.iter() {
        let converted = to_json_value(value, unit).map_err(|e| e.within(key))?;
        object.insert(key.to_string(), converted);
    }
    Ok(object)
}

fn to_json_value(value: &Value, unit: SubsecondUnit) -> Result<serde_json::Value, ConversionError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Number(n) => Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .ok_or(ConversionError::NonFiniteNumber {
                path: String::new(),
            }),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Binary(_) => Err(ConversionError::Unsupported {
            kind: value.type_name(),
            path: String::new(),
        }),
        Value::Timestamp(ts) => ts
            .to_datetime(unit)
            .map(|dt| serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            .ok_or(ConversionError::TimestampOutOfRange {
                path: String::new(),
            }),
        Value::List(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| to_json_value(item, unit).map_err(|e| e.within(&format!("[{i}]"))))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        Value::Map(map) => to_json_payload(map, unit).map(serde_json::Value::Object),
    }
}
