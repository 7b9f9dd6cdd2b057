pub mod event_time;
pub mod msgpack;

pub use event_time::{EVENT_TIME_EXT_TYPE, EventTime, SubsecondUnit};
pub use msgpack::{DecodeTermination, MAX_DEPTH, Records};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unexpected end of input reading {reading}: {remaining} bytes remaining")]
    UnexpectedEof {
        reading: &'static str,
        remaining: usize,
    },
    #[error("Invalid marker byte: {0:#04x}")]
    InvalidMarker(u8),
    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,
    #[error("Map key must be a string, found {0}")]
    NonStringKey(&'static str),
    #[error("Unexpected type: expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Record must be a 2-element array, found {0} elements")]
    InvalidRecordLength(usize),
    #[error("Invalid payload for extension type {ext_type}: {len} bytes")]
    InvalidExtension { ext_type: i8, len: usize },
    #[error("Unknown extension type: {0}")]
    UnknownExtension(i8),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Nesting deeper than {0} levels")]
    DepthExceeded(usize),
}
