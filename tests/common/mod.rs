#![allow(dead_code)]

use serde_json::Value as Json;
use stackdriver_output::domain::WriteLogEntriesRequest;
use stackdriver_output::sender::{LogWriter, WriteError};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Writer that records every request as JSON and can be told to fail.
#[derive(Default)]
pub struct RecordingWriter {
    requests: Mutex<Vec<Json>>,
    pub fail: AtomicBool,
    /// Writes still to be failed before `fail` is consulted.
    pub fail_next: AtomicUsize,
    pub closes: AtomicUsize,
}

impl RecordingWriter {
    pub fn requests(&self) -> Vec<Json> {
        self.requests.lock().unwrap().clone()
    }

    pub fn entry_counts(&self) -> Vec<usize> {
        self.requests()
            .iter()
            .map(|r| r["entries"].as_array().map_or(0, Vec::len))
            .collect()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next(&self, writes: usize) {
        self.fail_next.store(writes, Ordering::SeqCst);
    }
}

impl LogWriter for RecordingWriter {
    async fn write_log_entries(
        &self,
        request: &WriteLogEntriesRequest<'_>,
    ) -> Result<(), WriteError> {
        let scheduled = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scheduled || self.fail.load(Ordering::SeqCst) {
            return Err(WriteError::Http {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }
        self.requests
            .lock()
            .unwrap()
            .push(serde_json::to_value(request).unwrap());
        Ok(())
    }

    async fn close(&self) -> Result<(), WriteError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Appends one `[EventTime, map]` record in the collector's forward format.
pub fn push_record(buf: &mut Vec<u8>, seconds: u32, micros: u32, fields: &Json) {
    rmp::encode::write_array_len(buf, 2).unwrap();
    rmp::encode::write_ext_meta(buf, 8, 0).unwrap();
    buf.extend_from_slice(&seconds.to_be_bytes());
    buf.extend_from_slice(&micros.to_be_bytes());
    buf.extend_from_slice(&rmp_serde::to_vec(fields).unwrap());
}

pub fn encode_records(records: &[Json]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (i, fields) in records.iter().enumerate() {
        push_record(&mut buf, 1_700_000_000 + i as u32, 0, fields);
    }
    buf
}
