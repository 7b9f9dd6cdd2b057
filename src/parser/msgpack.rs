//! Lazy decoder for buffers of `[timestamp, field-map]` MessagePack records.
//!
//! A delivered buffer is a plain concatenation of records. [`Records`] pulls
//! them one at a time and stops at the first byte it cannot make sense of.
//! Stopping is not an error for the caller: the sequence simply ends, and the
//! reason stays available through [`Records::termination`].

use super::event_time::{EVENT_TIME_EXT_TYPE, EventTime};
use super::ParseError;
use crate::domain::{FieldMap, Record, Value};
use bytes::Bytes;
use rmp::Marker;
use rmp::decode::{self, ExtMeta, NumValueReadError, ValueReadError};
use std::iter::FusedIterator;
use thiserror::Error;
use tracing::debug;

/// Maximum container nesting accepted inside a record.
pub const MAX_DEPTH: usize = 64;

/// Why a [`Records`] sequence ended before consuming the whole buffer.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("record decoding terminated at byte {offset} after {decoded} records: {error}")]
pub struct DecodeTermination {
    pub offset: usize,
    pub decoded: usize,
    pub error: ParseError,
}

/// Forward-only, non-restartable sequence of records decoded from one buffer.
#[derive(Debug)]
pub struct Records {
    data: Bytes,
    pos: usize,
    decoded: usize,
    termination: Option<DecodeTermination>,
    done: bool,
}

impl Records {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            decoded: 0,
            termination: None,
            done: false,
        }
    }

    /// Number of records yielded so far.
    pub fn decoded(&self) -> usize {
        self.decoded
    }

    /// Set once the sequence stopped on malformed or truncated input.
    pub fn termination(&self) -> Option<&DecodeTermination> {
        self.termination.as_ref()
    }
}

impl Iterator for Records {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.done {
            return None;
        }
        if self.pos >= self.data.len() {
            self.done = true;
            return None;
        }

        let mut reader = Reader::new(&self.data[self.pos..]);
        match reader.read_record() {
            Ok(record) => {
                self.pos = self.data.len() - reader.remaining();
                self.decoded += 1;
                Some(record)
            }
            Err(error) => {
                debug!(
                    "Record decoding stopped at byte {} after {} records: {}",
                    self.pos, self.decoded, error
                );
                self.termination = Some(DecodeTermination {
                    offset: self.pos,
                    decoded: self.decoded,
                    error,
                });
                self.done = true;
                None
            }
        }
    }
}

impl FusedIterator for Records {}

/// Cursor over the unread tail of a buffer. Headers are read with
/// `rmp::decode`; bodies are sliced directly so declared lengths are checked
/// against what is actually left.
struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(rest: &'a [u8]) -> Self {
        Self { rest }
    }

    fn remaining(&self) -> usize {
        self.rest.len()
    }

    fn peek_marker(&self, reading: &'static str) -> Result<Marker, ParseError> {
        self.rest
            .first()
            .map(|&byte| Marker::from_u8(byte))
            .ok_or(ParseError::UnexpectedEof {
                reading,
                remaining: 0,
            })
    }

    fn take(&mut self, len: usize, reading: &'static str) -> Result<&'a [u8], ParseError> {
        if len > self.rest.len() {
            return Err(ParseError::UnexpectedEof {
                reading,
                remaining: self.rest.len(),
            });
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head)
    }

    fn header_error(&self, reading: &'static str, error: ValueReadError) -> ParseError {
        match error {
            ValueReadError::TypeMismatch(marker) => ParseError::UnexpectedType {
                expected: reading,
                found: describe(marker),
            },
            ValueReadError::InvalidMarkerRead(_) | ValueReadError::InvalidDataRead(_) => {
                ParseError::UnexpectedEof {
                    reading,
                    remaining: self.remaining(),
                }
            }
        }
    }

    fn number_error(&self, error: NumValueReadError) -> ParseError {
        match error {
            NumValueReadError::TypeMismatch(marker) => ParseError::UnexpectedType {
                expected: "number",
                found: describe(marker),
            },
            NumValueReadError::OutOfRange => ParseError::UnexpectedType {
                expected: "number",
                found: "out-of-range integer",
            },
            NumValueReadError::InvalidMarkerRead(_) | NumValueReadError::InvalidDataRead(_) => {
                ParseError::UnexpectedEof {
                    reading: "number",
                    remaining: self.remaining(),
                }
            }
        }
    }

    fn read_record(&mut self) -> Result<Record, ParseError> {
        match self.peek_marker("record")? {
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {}
            Marker::Reserved => return Err(ParseError::InvalidMarker(Marker::Reserved.to_u8())),
            other => {
                return Err(ParseError::UnexpectedType {
                    expected: "array",
                    found: describe(other),
                });
            }
        }
        let len = decode::read_array_len(&mut self.rest)
            .map_err(|e| self.header_error("record", e))? as usize;
        if len != 2 {
            return Err(ParseError::InvalidRecordLength(len));
        }

        let timestamp = timestamp_from(self.read_value(1)?, true)?;
        let fields = match self.read_value(1)? {
            Value::Map(map) => map,
            other => {
                return Err(ParseError::UnexpectedType {
                    expected: "map",
                    found: other.type_name(),
                });
            }
        };
        Ok(Record::new(timestamp, fields))
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, ParseError> {
        let marker = self.peek_marker("value")?;
        let value = match marker {
            Marker::Null => {
                decode::read_nil(&mut self.rest).map_err(|e| self.header_error("null", e))?;
                Value::Null
            }
            Marker::True | Marker::False => Value::Bool(
                decode::read_bool(&mut self.rest).map_err(|e| self.header_error("bool", e))?,
            ),
            Marker::U64 => Value::Number(
                decode::read_u64(&mut self.rest).map_err(|e| self.header_error("number", e))?
                    as f64,
            ),
            Marker::FixPos(_)
            | Marker::FixNeg(_)
            | Marker::U8
            | Marker::U16
            | Marker::U32
            | Marker::I8
            | Marker::I16
            | Marker::I32
            | Marker::I64 => Value::Number(
                decode::read_int::<i64, _>(&mut self.rest).map_err(|e| self.number_error(e))?
                    as f64,
            ),
            Marker::F32 => Value::Number(
                decode::read_f32(&mut self.rest).map_err(|e| self.header_error("number", e))?
                    as f64,
            ),
            Marker::F64 => Value::Number(
                decode::read_f64(&mut self.rest).map_err(|e| self.header_error("number", e))?,
            ),
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                let len = decode::read_str_len(&mut self.rest)
                    .map_err(|e| self.header_error("string", e))?;
                self.string(len as usize)?
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
                let len = decode::read_bin_len(&mut self.rest)
                    .map_err(|e| self.header_error("binary", e))?;
                Value::Binary(self.take(len as usize, "binary")?.to_vec())
            }
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
                let len = decode::read_array_len(&mut self.rest)
                    .map_err(|e| self.header_error("list", e))?;
                self.list(len as usize, depth)?
            }
            Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
                let len = decode::read_map_len(&mut self.rest)
                    .map_err(|e| self.header_error("map", e))?;
                self.map(len as usize, depth)?
            }
            Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16
            | Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32 => {
                let meta = decode::read_ext_meta(&mut self.rest)
                    .map_err(|e| self.header_error("extension", e))?;
                self.ext(meta)?
            }
            Marker::Reserved => return Err(ParseError::InvalidMarker(marker.to_u8())),
        };
        Ok(value)
    }

    fn string(&mut self, len: usize) -> Result<Value, ParseError> {
        let bytes = self.take(len, "string")?;
        std::str::from_utf8(bytes)
            .map(|s| Value::String(s.to_string()))
            .map_err(|_| ParseError::InvalidUtf8)
    }

    fn list(&mut self, len: usize, depth: usize) -> Result<Value, ParseError> {
        if depth >= MAX_DEPTH {
            return Err(ParseError::DepthExceeded(MAX_DEPTH));
        }
        // Every element takes at least one byte.
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.read_value(depth + 1)?);
        }
        Ok(Value::List(items))
    }

    fn map(&mut self, len: usize, depth: usize) -> Result<Value, ParseError> {
        if depth >= MAX_DEPTH {
            return Err(ParseError::DepthExceeded(MAX_DEPTH));
        }
        let mut map = FieldMap::with_capacity(len.min(self.remaining() / 2));
        for _ in 0..len {
            let key = match self.read_value(depth + 1)? {
                Value::String(key) => key,
                other => return Err(ParseError::NonStringKey(other.type_name())),
            };
            let value = self.read_value(depth + 1)?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }

    fn ext(&mut self, meta: ExtMeta) -> Result<Value, ParseError> {
        let data = self.take(meta.size as usize, "extension")?;
        if meta.typeid != EVENT_TIME_EXT_TYPE {
            return Err(ParseError::UnknownExtension(meta.typeid));
        }
        EventTime::from_ext_payload(data).map(Value::Timestamp)
    }
}

/// Accepts the extension type, a plain second count, or the
/// `[timestamp, metadata]` header of the newer event layout.
fn timestamp_from(value: Value, allow_header: bool) -> Result<EventTime, ParseError> {
    match value {
        Value::Timestamp(ts) => Ok(ts),
        Value::Number(seconds) => EventTime::from_float_seconds(seconds),
        Value::List(mut items) if allow_header && items.len() == 2 => {
            if !matches!(items[1], Value::Map(_) | Value::Null) {
                return Err(ParseError::UnexpectedType {
                    expected: "event metadata map",
                    found: items[1].type_name(),
                });
            }
            timestamp_from(items.swap_remove(0), false)
        }
        other => Err(ParseError::UnexpectedType {
            expected: "timestamp",
            found: other.type_name(),
        }),
    }
}

fn describe(marker: Marker) -> &'static str {
    match marker {
        Marker::Null => "null",
        Marker::True | Marker::False => "bool",
        Marker::FixPos(_)
        | Marker::FixNeg(_)
        | Marker::U8
        | Marker::U16
        | Marker::U32
        | Marker::U64
        | Marker::I8
        | Marker::I16
        | Marker::I32
        | Marker::I64
        | Marker::F32
        | Marker::F64 => "number",
        Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => "string",
        Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => "binary",
        Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => "list",
        Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => "map",
        Marker::FixExt1
        | Marker::FixExt2
        | Marker::FixExt4
        | Marker::FixExt8
        | Marker::FixExt16
        | Marker::Ext8
        | Marker::Ext16
        | Marker::Ext32 => "extension",
        Marker::Reserved => "reserved",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_time(buf: &mut Vec<u8>, seconds: u32, subsec: u32) {
        let mut data = seconds.to_be_bytes().to_vec();
        data.extend_from_slice(&subsec.to_be_bytes());
        rmp::encode::write_ext_meta(buf, 8, EVENT_TIME_EXT_TYPE).unwrap();
        buf.extend_from_slice(&data);
    }

    fn record(buf: &mut Vec<u8>, seconds: u32, fields: serde_json::Value) {
        rmp::encode::write_array_len(buf, 2).unwrap();
        event_time(buf, seconds, 0);
        buf.extend_from_slice(&rmp_serde::to_vec(&fields).unwrap());
    }

    #[test]
    fn test_decodes_records_in_order() {
        let mut buf = Vec::new();
        record(&mut buf, 1, json!({"msg": "first", "n": 1}));
        record(&mut buf, 2, json!({"msg": "second", "ok": true, "tags": ["a", null]}));

        let mut records = Records::new(buf);
        let first = records.next().unwrap();
        let second = records.next().unwrap();
        assert!(records.next().is_none());
        assert!(records.termination().is_none());
        assert_eq!(records.decoded(), 2);

        assert_eq!(first.timestamp.seconds(), 1);
        assert_eq!(first.fields.get("msg").and_then(Value::as_str), Some("first"));
        assert_eq!(first.fields.get("n"), Some(&Value::Number(1.0)));

        assert_eq!(second.timestamp.seconds(), 2);
        assert_eq!(second.fields.get("ok"), Some(&Value::Bool(true)));
        assert_eq!(
            second.fields.get("tags"),
            Some(&Value::List(vec![Value::from("a"), Value::Null]))
        );
    }

    #[test]
    fn test_field_order_follows_encoding() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        event_time(&mut buf, 0, 0);
        rmp::encode::write_map_len(&mut buf, 3).unwrap();
        for key in ["zeta", "alpha", "mid"] {
            rmp::encode::write_str(&mut buf, key).unwrap();
            rmp::encode::write_nil(&mut buf).unwrap();
        }

        let record = Records::new(buf).next().unwrap();
        let keys: Vec<&str> = record.fields.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_truncated_tail_ends_sequence() {
        let mut buf = Vec::new();
        record(&mut buf, 1, json!({"msg": "a"}));
        record(&mut buf, 2, json!({"msg": "b"}));
        let valid_len = buf.len();
        record(&mut buf, 3, json!({"msg": "c"}));
        buf.truncate(valid_len + 6);

        let mut records = Records::new(buf);
        assert_eq!(records.by_ref().count(), 2);

        let termination = records.termination().unwrap();
        assert_eq!(termination.offset, valid_len);
        assert_eq!(termination.decoded, 2);
        assert!(matches!(termination.error, ParseError::UnexpectedEof { .. }));
        assert!(records.next().is_none());
    }

    #[test]
    fn test_wrong_shape_terminates() {
        let mut buf = Vec::new();
        record(&mut buf, 1, json!({"msg": "a"}));
        buf.extend_from_slice(&rmp_serde::to_vec(&json!(["only-one"])).unwrap());
        record(&mut buf, 2, json!({"msg": "unreachable"}));

        let mut records = Records::new(buf);
        assert_eq!(records.by_ref().count(), 1);
        assert_eq!(
            records.termination().map(|t| &t.error),
            Some(&ParseError::InvalidRecordLength(1))
        );
    }

    #[test]
    fn test_non_map_fields_terminate() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        event_time(&mut buf, 1, 0);
        rmp::encode::write_str(&mut buf, "not a map").unwrap();

        let mut records = Records::new(buf);
        assert!(records.next().is_none());
        assert!(matches!(
            records.termination().map(|t| &t.error),
            Some(ParseError::UnexpectedType { expected: "map", found: "string" })
        ));
    }

    #[test]
    fn test_integer_and_float_timestamps() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&rmp_serde::to_vec(&json!([1_600_000_000u32, {"a": 1}])).unwrap());
        buf.extend_from_slice(&rmp_serde::to_vec(&json!([12.25, {"a": 2}])).unwrap());

        let records: Vec<Record> = Records::new(buf).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, EventTime::new(1_600_000_000, 0));
        assert_eq!(records[1].timestamp, EventTime::new(12, 250_000));
    }

    #[test]
    fn test_event_header_layout() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        event_time(&mut buf, 42, 7);
        buf.extend_from_slice(&rmp_serde::to_vec(&json!({"otlp": {}})).unwrap());
        buf.extend_from_slice(&rmp_serde::to_vec(&json!({"msg": "v2"})).unwrap());

        let record = Records::new(buf).next().unwrap();
        assert_eq!(record.timestamp, EventTime::new(42, 7));
        assert_eq!(record.fields.get("msg").and_then(Value::as_str), Some("v2"));
    }

    #[test]
    fn test_nested_extension_and_binary_values() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        event_time(&mut buf, 1, 0);
        rmp::encode::write_map_len(&mut buf, 2).unwrap();
        rmp::encode::write_str(&mut buf, "at").unwrap();
        event_time(&mut buf, 5, 6);
        rmp::encode::write_str(&mut buf, "raw").unwrap();
        rmp::encode::write_bin(&mut buf, &[1, 2, 3]).unwrap();

        let record = Records::new(buf).next().unwrap();
        assert_eq!(record.fields.get("at"), Some(&Value::Timestamp(EventTime::new(5, 6))));
        assert_eq!(record.fields.get("raw"), Some(&Value::Binary(vec![1, 2, 3])));
    }

    #[test]
    fn test_unknown_extension_terminates() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        rmp::encode::write_ext_meta(&mut buf, 8, 5).unwrap();
        buf.extend_from_slice(&[0; 8]);
        buf.extend_from_slice(&rmp_serde::to_vec(&json!({})).unwrap());

        let mut records = Records::new(buf);
        assert!(records.next().is_none());
        assert_eq!(
            records.termination().map(|t| &t.error),
            Some(&ParseError::UnknownExtension(5))
        );
    }

    #[test]
    fn test_non_string_key_terminates() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        event_time(&mut buf, 1, 0);
        rmp::encode::write_map_len(&mut buf, 1).unwrap();
        rmp::encode::write_uint(&mut buf, 7).unwrap();
        rmp::encode::write_nil(&mut buf).unwrap();

        let mut records = Records::new(buf);
        assert!(records.next().is_none());
        assert_eq!(
            records.termination().map(|t| &t.error),
            Some(&ParseError::NonStringKey("number"))
        );
    }

    #[test]
    fn test_excessive_nesting_terminates() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        event_time(&mut buf, 1, 0);
        rmp::encode::write_map_len(&mut buf, 1).unwrap();
        rmp::encode::write_str(&mut buf, "deep").unwrap();
        for _ in 0..MAX_DEPTH + 1 {
            rmp::encode::write_array_len(&mut buf, 1).unwrap();
        }
        rmp::encode::write_nil(&mut buf).unwrap();

        let mut records = Records::new(buf);
        assert!(records.next().is_none());
        assert_eq!(
            records.termination().map(|t| &t.error),
            Some(&ParseError::DepthExceeded(MAX_DEPTH))
        );
    }

    #[test]
    fn test_huge_declared_length_does_not_preallocate() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        event_time(&mut buf, 1, 0);
        rmp::encode::write_map_len(&mut buf, u32::MAX).unwrap();

        let mut records = Records::new(buf);
        assert!(records.next().is_none());
        assert!(matches!(
            records.termination().map(|t| &t.error),
            Some(ParseError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_truncated_length_header_names_what_was_read() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        event_time(&mut buf, 1, 0);
        rmp::encode::write_map_len(&mut buf, 1).unwrap();
        buf.extend_from_slice(&[0xda, 0x00]);

        let mut records = Records::new(buf);
        assert!(records.next().is_none());
        assert!(matches!(
            records.termination().map(|t| &t.error),
            Some(ParseError::UnexpectedEof { reading: "string", .. })
        ));
    }

    #[test]
    fn test_integer_widths_decode_to_numbers() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        event_time(&mut buf, 1, 0);
        rmp::encode::write_map_len(&mut buf, 4).unwrap();
        rmp::encode::write_str(&mut buf, "neg").unwrap();
        rmp::encode::write_sint(&mut buf, -70_000).unwrap();
        rmp::encode::write_str(&mut buf, "big").unwrap();
        rmp::encode::write_u64(&mut buf, u64::MAX).unwrap();
        rmp::encode::write_str(&mut buf, "half").unwrap();
        rmp::encode::write_f32(&mut buf, 0.5).unwrap();
        rmp::encode::write_str(&mut buf, "small").unwrap();
        rmp::encode::write_u8(&mut buf, 200).unwrap();

        let record = Records::new(buf).next().unwrap();
        assert_eq!(record.fields.get("neg"), Some(&Value::Number(-70_000.0)));
        assert_eq!(record.fields.get("big"), Some(&Value::Number(u64::MAX as f64)));
        assert_eq!(record.fields.get("half"), Some(&Value::Number(0.5)));
        assert_eq!(record.fields.get("small"), Some(&Value::Number(200.0)));
    }

    #[test]
    fn test_empty_buffer_is_clean_end() {
        let mut records = Records::new(Vec::new());
        assert!(records.next().is_none());
        assert!(records.termination().is_none());
    }
}
