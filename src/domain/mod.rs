//! Domain layer for stackdriver-output.
//!
//! Contains the canonical types shared across all modules:
//! - `Value` / `FieldMap` / `Record`: decoded collector records
//! - `Severity`: normalized log severity plus the free-form text mapping
//! - `LogEntry` / `ResourceDescriptor` / `WriteLogEntriesRequest`: the wire shapes
//! - `OutputError`: Top-level error type

pub mod error;
pub mod log_entry;
pub mod payload;
pub mod severity;
pub mod value;

pub use error::OutputError;
pub use log_entry::{LogEntry, Payload, ResourceDescriptor, WriteLogEntriesRequest};
pub use payload::{ConversionError, to_json_payload};
pub use severity::{Severity, map_severity};
pub use value::{FieldMap, Record, Value};
