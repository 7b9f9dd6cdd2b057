//! Dry-run writer: prints every entry as one JSON line instead of sending it.

use super::{LogWriter, WriteError};
use crate::domain::{LogEntry, ResourceDescriptor, WriteLogEntriesRequest};
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Line<'a> {
    log_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource: Option<&'a ResourceDescriptor>,
    #[serde(flatten)]
    entry: &'a LogEntry,
}

pub struct StdoutWriter {
    out: Mutex<Box<dyn Write + Send>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for StdoutWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdoutWriter")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for StdoutWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StdoutWriter {
    pub fn new() -> Self {
        Self::with_output(std::io::stdout())
    }

    pub fn with_output(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            closed: AtomicBool::new(false),
        }
    }
}

impl LogWriter for StdoutWriter {
    async fn write_log_entries(
        &self,
        request: &WriteLogEntriesRequest<'_>,
    ) -> Result<(), WriteError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WriteError::Closed);
        }

        // Render everything first so a serialization failure writes nothing.
        let mut rendered = Vec::new();
        for entry in request.entries {
            let mut entry = entry.clone();
            for (key, value) in request.labels {
                entry.labels.entry(key.clone()).or_insert_with(|| value.clone());
            }
            let resource = entry.resource.take();
            let line = Line {
                log_name: request.log_name,
                resource: resource.as_ref().or(request.resource),
                entry: &entry,
            };
            serde_json::to_writer(&mut rendered, &line)
                .map_err(|e| WriteError::Serialization(e.to_string()))?;
            rendered.push(b'\n');
        }

        let mut out = self.out.lock().await;
        out.write_all(&rendered)?;
        out.flush()?;
        Ok(())
    }

    async fn close(&self) -> Result<(), WriteError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.out.lock().await.flush()?;
        }
        Ok(())
    }
}
