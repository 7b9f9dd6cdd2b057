//! Host-facing adapter: one output instance per configured output section.
//!
//! Each delivery runs a full cycle (reset, decode and append, flush) and the
//! outcome is reported with the host's numeric return codes.

use crate::buffer::{AppendOutcome, BatchShipper, ShipperError};
use crate::parser::Records;
use crate::sender::LogWriter;
use bytes::Bytes;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Result codes understood by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FlushResult {
    /// Fatal; the instance is considered broken.
    Error = 0,
    Ok = 1,
    /// Transient; the host should deliver the same data again.
    Retry = 2,
}

impl FlushResult {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Counts for one delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub decoded: usize,
    pub buffered: usize,
    pub skipped: usize,
    pub truncated: bool,
}

pub struct OutputInstance<W: LogWriter> {
    id: String,
    shipper: BatchShipper<W>,
    last_report: DeliveryReport,
}

impl<W: LogWriter> OutputInstance<W> {
    pub fn new(shipper: BatchShipper<W>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            shipper,
            last_report: DeliveryReport::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shipper(&self) -> &BatchShipper<W> {
        &self.shipper
    }

    pub fn last_report(&self) -> DeliveryReport {
        self.last_report
    }

    pub async fn ping(&self) -> Result<(), ShipperError> {
        self.shipper.ping().await
    }

    /// Ships one delivered buffer of records tagged `tag`.
    pub async fn flush(&mut self, data: impl Into<Bytes>, tag: &str) -> FlushResult {
        self.last_report = DeliveryReport::default();

        if let Err(e) = self.shipper.reset(tag).await {
            error!("[{}] Cannot start cycle for {}: {}", self.id, tag, e);
            return e.flush_result();
        }

        let mut records = Records::new(data);
        for record in records.by_ref() {
            self.last_report.decoded += 1;
            match self.shipper.append_entry(record).await {
                Ok(AppendOutcome::Buffered | AppendOutcome::Flushed) => {
                    self.last_report.buffered += 1;
                }
                Ok(AppendOutcome::Skipped(e)) => {
                    self.last_report.skipped += 1;
                    debug!("[{}] Payload conversion skipped a record: {}", self.id, e);
                }
                Err(e) => {
                    warn!("[{}] Append failed for {}: {}", self.id, tag, e);
                    return e.flush_result();
                }
            }
        }

        if let Some(termination) = records.termination() {
            self.last_report.truncated = true;
            warn!("[{}] {}", self.id, termination);
        }

        match self.shipper.flush().await {
            Ok(()) => FlushResult::Ok,
            Err(e) => {
                warn!("[{}] Flush failed for {}: {}", self.id, tag, e);
                e.flush_result()
            }
        }
    }

    /// Closes the shipper; safe to call more than once.
    pub async fn exit(&mut self) -> FlushResult {
        match self.shipper.close().await {
            Ok(()) => FlushResult::Ok,
            Err(e) => {
                error!("[{}] Exit failed: {}", self.id, e);
                FlushResult::Error
            }
        }
    }
}
