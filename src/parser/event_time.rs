use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::ParseError;

/// MessagePack extension type id the collector uses for event timestamps.
pub const EVENT_TIME_EXT_TYPE: i8 = 0;

/// Payload length of the timestamp extension: two big-endian u32 words.
pub const EVENT_TIME_LEN: usize = 8;

/// How the second word of an [`EventTime`] is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsecondUnit {
    #[default]
    Micros,
    /// Fluent Bit EventTime semantics.
    Nanos,
}

impl SubsecondUnit {
    fn per_second(self) -> u32 {
        match self {
            SubsecondUnit::Micros => 1_000_000,
            SubsecondUnit::Nanos => 1_000_000_000,
        }
    }

    fn nanos_per_unit(self) -> u32 {
        match self {
            SubsecondUnit::Micros => 1_000,
            SubsecondUnit::Nanos => 1,
        }
    }
}

/// Raw event timestamp as carried on the wire.
///
/// Keeps both words exactly as decoded; turning them into an instant is a
/// separate, fallible step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventTime {
    seconds: u32,
    subsec: u32,
}

impl EventTime {
    pub const fn new(seconds: u32, subsec: u32) -> Self {
        Self { seconds, subsec }
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    pub fn subsec(&self) -> u32 {
        self.subsec
    }

    /// Decodes the 8-byte extension payload.
    pub fn from_ext_payload(data: &[u8]) -> Result<Self, ParseError> {
        let bytes: [u8; EVENT_TIME_LEN] =
            data.try_into().map_err(|_| ParseError::InvalidExtension {
                ext_type: EVENT_TIME_EXT_TYPE,
                len: data.len(),
            })?;
        let seconds = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let subsec = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self { seconds, subsec })
    }

    /// Builds a timestamp from a float second count (legacy forward format).
    ///
    /// The fractional part is kept at microsecond resolution.
    pub fn from_float_seconds(value: f64) -> Result<Self, ParseError> {
        if !value.is_finite() || value < 0.0 || value >= (u32::MAX as f64 + 1.0) {
            return Err(ParseError::InvalidTimestamp(format!(
                "float seconds out of range: {value}"
            )));
        }
        let seconds = value.trunc() as u32;
        let subsec = ((value.fract() * 1_000_000.0).round() as u32).min(999_999);
        Ok(Self { seconds, subsec })
    }

    /// Converts to an instant, or `None` when `subsec` is not below one
    /// second in the given unit.
    pub fn to_datetime(&self, unit: SubsecondUnit) -> Option<DateTime<Utc>> {
        if self.subsec >= unit.per_second() {
            return None;
        }
        DateTime::from_timestamp(self.seconds as i64, self.subsec * unit.nanos_per_unit())
    }
}
