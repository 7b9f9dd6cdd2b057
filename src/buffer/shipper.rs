//! Batch accumulation and the flush state machine.
//!
//! One shipper serves one output instance. The host drives it sequentially:
//! `reset(tag)`, any number of `append_entry`, then `flush`. Entries are kept
//! until a write succeeds, so a failed cycle can be redelivered as a whole.

use super::error::ShipperError;
use super::stats::{ShipperStats, ShipperStatsSnapshot};
use crate::domain::{
    ConversionError, LogEntry, Payload, Record, ResourceDescriptor, WriteLogEntriesRequest,
    to_json_payload,
};
use crate::metadata::{MetadataExtractor, ResourceDetector};
use crate::parser::SubsecondUnit;
use crate::sender::LogWriter;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Maximum entries per write; reaching it flushes immediately.
pub const ENTRIES_MAX: usize = 1000;

static NO_LABELS: BTreeMap<String, String> = BTreeMap::new();

/// How resource and labels are attached within one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourcePolicy {
    /// The first record of the cycle fixes the batch resource and labels.
    #[default]
    FirstRecord,
    /// As `FirstRecord`, and every entry also carries its own resource and labels.
    PerEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipperConfig {
    pub max_entries: usize,
    pub subsecond_unit: SubsecondUnit,
    pub resource_policy: ResourcePolicy,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            max_entries: ENTRIES_MAX,
            subsecond_unit: SubsecondUnit::default(),
            resource_policy: ResourcePolicy::default(),
        }
    }
}

impl ShipperConfig {
    pub fn validate(&self) -> Result<(), ShipperError> {
        if self.max_entries == 0 || self.max_entries > ENTRIES_MAX {
            return Err(ShipperError::InvalidConfig(format!(
                "max_entries must be between 1 and {ENTRIES_MAX}, got {}",
                self.max_entries
            )));
        }
        Ok(())
    }
}

/// What happened to a record handed to [`BatchShipper::append_entry`].
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Buffered,
    /// The entry filled the batch and the batch was written.
    Flushed,
    /// The payload could not be converted; the record was dropped.
    Skipped(ConversionError),
}

/// Builds `projects/{project}/logs/{tag}` with the tag URL-encoded for `/`.
pub fn log_name_for(project_id: &str, tag: &str) -> Result<String, ShipperError> {
    if tag.is_empty() {
        return Err(ShipperError::InvalidTag("tag must not be empty".to_string()));
    }
    let log_id = tag.replace('/', "%2F");
    Ok(format!("projects/{project_id}/logs/{log_id}"))
}

pub struct BatchShipper<W: LogWriter> {
    writer: W,
    detector: Arc<ResourceDetector>,
    extractor: MetadataExtractor,
    config: ShipperConfig,
    log_name: Option<String>,
    resource: Option<ResourceDescriptor>,
    labels: Option<BTreeMap<String, String>>,
    entries: Vec<LogEntry>,
    stats: Arc<ShipperStats>,
    closed: bool,
}

impl<W: LogWriter> std::fmt::Debug for BatchShipper<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchShipper")
            .field("log_name", &self.log_name)
            .field("entries", &self.entries.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<W: LogWriter> BatchShipper<W> {
    pub fn new(
        writer: W,
        detector: Arc<ResourceDetector>,
        config: ShipperConfig,
    ) -> Result<Self, ShipperError> {
        config.validate()?;
        Ok(Self {
            writer,
            extractor: MetadataExtractor::new(Arc::clone(&detector)),
            detector,
            entries: Vec::with_capacity(config.max_entries),
            config,
            log_name: None,
            resource: None,
            labels: None,
            stats: Arc::new(ShipperStats::default()),
            closed: false,
        })
    }

    /// Starts a new flush cycle for `tag`.
    ///
    /// Fails without touching any state when no project id was detected.
    /// Entries retained from a failed cycle are discarded: the host
    /// redelivers them with the new input.
    pub async fn reset(&mut self, tag: &str) -> Result<(), ShipperError> {
        if self.closed {
            return Err(ShipperError::Closed);
        }

        let project_id = self
            .detector
            .detect()
            .await
            .and_then(ResourceDescriptor::project_id)
            .ok_or(ShipperError::MissingProjectId)?
            .to_string();
        let log_name = log_name_for(&project_id, tag)?;

        if !self.entries.is_empty() {
            debug!(
                "Discarding {} unflushed entries for {:?}",
                self.entries.len(),
                self.log_name
            );
        }
        self.entries.clear();
        self.log_name = Some(log_name);
        self.resource = None;
        self.labels = None;
        Ok(())
    }

    pub async fn append_entry(&mut self, mut record: Record) -> Result<AppendOutcome, ShipperError> {
        if self.closed {
            return Err(ShipperError::Closed);
        }
        if self.log_name.is_none() {
            return Err(ShipperError::NotReset);
        }
        // A batch left full by a failed write must go out before it can grow.
        if self.entries.len() >= self.config.max_entries {
            self.flush().await?;
        }

        let unit = self.config.subsecond_unit;
        let timestamp = match record.timestamp.to_datetime(unit) {
            Some(timestamp) => timestamp,
            None => {
                debug!(
                    "Record timestamp {:?} not representable, using current time",
                    record.timestamp
                );
                self.stats.record_substituted_timestamp();
                Utc::now()
            }
        };

        let extracted = self.extractor.extract(&mut record);
        let payload = match to_json_payload(&record.fields, unit) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Skipping record: {}", e);
                self.stats.record_skipped();
                return Ok(AppendOutcome::Skipped(e));
            }
        };

        if self.labels.is_none() {
            self.labels = Some(extracted.labels.clone());
        }
        if self.resource.is_none() {
            self.resource.clone_from(&extracted.resource);
        }

        let (resource, labels) = match self.config.resource_policy {
            ResourcePolicy::FirstRecord => (None, BTreeMap::new()),
            ResourcePolicy::PerEntry => (extracted.resource, extracted.labels),
        };

        self.entries.push(LogEntry {
            timestamp,
            severity: extracted.severity,
            trace: extracted.trace,
            span_id: extracted.span_id,
            payload: Payload::JsonPayload(payload),
            insert_id: None,
            resource,
            labels,
        });

        if self.entries.len() >= self.config.max_entries {
            self.flush().await?;
            return Ok(AppendOutcome::Flushed);
        }
        Ok(AppendOutcome::Buffered)
    }

    /// Writes all buffered entries in one call. Nothing is cleared on failure.
    pub async fn flush(&mut self) -> Result<(), ShipperError> {
        if self.closed {
            return Err(ShipperError::Closed);
        }
        if self.entries.is_empty() {
            return Ok(());
        }
        let Some(log_name) = self.log_name.as_deref() else {
            return Err(ShipperError::NotReset);
        };

        let count = self.entries.len();
        let start = Instant::now();
        let request = WriteLogEntriesRequest {
            log_name,
            resource: self.resource.as_ref(),
            labels: self.labels.as_ref().unwrap_or(&NO_LABELS),
            entries: &self.entries,
        };
        let result = self.writer.write_log_entries(&request).await;

        match result {
            Ok(()) => {
                debug!(
                    "Flushed {} entries to {} in {:?}",
                    count,
                    log_name,
                    start.elapsed()
                );
                self.stats.record_batch(count);
                self.entries.clear();
                Ok(())
            }
            Err(e) => {
                warn!("Flush of {} entries to {} failed: {}", count, log_name, e);
                self.stats.record_failed_flush();
                Err(e.into())
            }
        }
    }

    /// Flushes what is left and releases the writer. Later calls do nothing.
    pub async fn close(&mut self) -> Result<(), ShipperError> {
        if self.closed {
            return Ok(());
        }
        let flushed = self.flush().await;
        self.closed = true;
        let released = self.writer.close().await;

        let stats = self.stats.snapshot();
        info!(
            "Shipper closed: {} entries in {} batches, {} failed flushes, {} skipped records",
            stats.entries_written, stats.batches_written, stats.failed_flushes, stats.skipped_records
        );

        flushed?;
        released?;
        Ok(())
    }

    /// Writes a single `ping` entry to `projects/{project}/logs/ping`.
    pub async fn ping(&self) -> Result<(), ShipperError> {
        if self.closed {
            return Err(ShipperError::Closed);
        }
        let resource = self
            .detector
            .detect()
            .await
            .ok_or(ShipperError::MissingProjectId)?;
        let project_id = resource.project_id().ok_or(ShipperError::MissingProjectId)?;
        let log_name = log_name_for(project_id, "ping")?;

        let entry = LogEntry {
            timestamp: DateTime::from_timestamp(0, 0).unwrap_or_default(),
            severity: Default::default(),
            trace: String::new(),
            span_id: String::new(),
            payload: Payload::TextPayload("ping".to_string()),
            insert_id: Some("ping".to_string()),
            resource: None,
            labels: BTreeMap::new(),
        };
        let request = WriteLogEntriesRequest {
            log_name: &log_name,
            resource: Some(resource),
            labels: &NO_LABELS,
            entries: std::slice::from_ref(&entry),
        };
        self.writer.write_log_entries(&request).await?;
        info!("Ping to {} succeeded", log_name);
        Ok(())
    }

    pub fn log_name(&self) -> Option<&str> {
        self.log_name.as_deref()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn batch_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.labels.as_ref()
    }

    pub fn config(&self) -> &ShipperConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn stats(&self) -> Arc<ShipperStats> {
        Arc::clone(&self.stats)
    }

    pub fn stats_snapshot(&self) -> ShipperStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FieldMap, Severity, Value};
    use crate::metadata::StaticMetadata;
    use crate::parser::EventTime;
    use crate::sender::WriteError;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeWriter {
        batches: Mutex<Vec<serde_json::Value>>,
        fail: AtomicBool,
        closes: AtomicUsize,
    }

    impl FakeWriter {
        fn batches(&self) -> Vec<serde_json::Value> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl LogWriter for FakeWriter {
        async fn write_log_entries(
            &self,
            request: &WriteLogEntriesRequest<'_>,
        ) -> Result<(), WriteError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(WriteError::Http {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            self.batches
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

    fn shipper_with(
        source: StaticMetadata,
        config: ShipperConfig,
    ) -> (BatchShipper<Arc<FakeWriter>>, Arc<FakeWriter>) {
        let writer = Arc::new(FakeWriter::default());
        let detector = Arc::new(ResourceDetector::new(source));
        let shipper = BatchShipper::new(Arc::clone(&writer), detector, config).unwrap();
        (shipper, writer)
    }

    fn shipper() -> (BatchShipper<Arc<FakeWriter>>, Arc<FakeWriter>) {
        shipper_with(StaticMetadata::new("p"), ShipperConfig::default())
    }

    fn record(entries: Vec<(&str, Value)>) -> Record {
        Record::new(
            EventTime::new(1_700_000_000, 0),
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<FieldMap>(),
        )
    }

    fn k8s(labels: Vec<(&str, Value)>, extra: Vec<(&str, Value)>) -> Value {
        let mut meta: FieldMap = extra
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        meta.insert(
            "labels",
            Value::Map(labels.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
        );
        Value::Map(meta)
    }

    #[tokio::test]
    async fn test_reset_builds_log_name() {
        let (mut shipper, _) = shipper();
        shipper.reset("app/web").await.unwrap();
        assert_eq!(shipper.log_name(), Some("projects/p/logs/app%2Fweb"));
    }

    #[tokio::test]
    async fn test_reset_without_project_id_leaves_state() {
        let (mut shipper, _) = shipper_with(StaticMetadata::default(), ShipperConfig::default());
        let err = shipper.reset("t").await.unwrap_err();
        assert!(matches!(err, ShipperError::MissingProjectId));
        assert_eq!(shipper.log_name(), None);

        let err = shipper.append_entry(record(vec![])).await.unwrap_err();
        assert!(matches!(err, ShipperError::NotReset));
    }

    #[tokio::test]
    async fn test_empty_tag_is_rejected() {
        let (mut shipper, _) = shipper();
        assert!(matches!(
            shipper.reset("").await,
            Err(ShipperError::InvalidTag(_))
        ));
    }

    #[tokio::test]
    async fn test_flush_writes_one_request_and_clears() {
        let (mut shipper, writer) = shipper();
        shipper.reset("t").await.unwrap();
        for msg in ["a", "b", "c"] {
            let outcome = shipper
                .append_entry(record(vec![("msg", Value::from(msg)), ("log", Value::from("raw"))]))
                .await
                .unwrap();
            assert_eq!(outcome, AppendOutcome::Buffered);
        }

        shipper.flush().await.unwrap();
        assert!(shipper.is_empty());

        let batches = writer.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0]["logName"], "projects/p/logs/t");
        assert_eq!(batches[0]["resource"]["type"], "gce_instance");
        let messages: Vec<&serde_json::Value> = batches[0]["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| &e["jsonPayload"])
            .collect();
        assert_eq!(messages, vec![&json!({"msg": "a"}), &json!({"msg": "b"}), &json!({"msg": "c"})]);
    }

    #[tokio::test]
    async fn test_flush_of_empty_buffer_is_noop() {
        let (mut shipper, writer) = shipper();
        shipper.reset("t").await.unwrap();
        shipper.flush().await.unwrap();
        assert!(writer.batches().is_empty());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_entries() {
        let (mut shipper, writer) = shipper();
        shipper.reset("t").await.unwrap();
        shipper.append_entry(record(vec![("msg", Value::from("a"))])).await.unwrap();

        writer.fail.store(true, Ordering::SeqCst);
        let err = shipper.flush().await.unwrap_err();
        assert_eq!(err.flush_result(), crate::output::FlushResult::Retry);
        assert_eq!(shipper.len(), 1);

        writer.fail.store(false, Ordering::SeqCst);
        shipper.flush().await.unwrap();
        assert!(shipper.is_empty());
        assert_eq!(writer.batches().len(), 1);
        assert_eq!(shipper.stats_snapshot().failed_flushes, 1);
    }

    #[tokio::test]
    async fn test_cap_triggers_single_flush() {
        let (mut shipper, writer) = shipper_with(
            StaticMetadata::new("p"),
            ShipperConfig {
                max_entries: 3,
                ..Default::default()
            },
        );
        shipper.reset("t").await.unwrap();

        let mut outcomes = Vec::new();
        for i in 0..4 {
            outcomes.push(
                shipper
                    .append_entry(record(vec![("n", Value::Number(i as f64))]))
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(
            outcomes,
            vec![
                AppendOutcome::Buffered,
                AppendOutcome::Buffered,
                AppendOutcome::Flushed,
                AppendOutcome::Buffered
            ]
        );
        assert_eq!(writer.batches().len(), 1);
        assert_eq!(shipper.len(), 1);
    }

    #[tokio::test]
    async fn test_full_batch_after_failed_flush_is_not_grown() {
        let (mut shipper, writer) = shipper_with(
            StaticMetadata::new("p"),
            ShipperConfig {
                max_entries: 2,
                ..Default::default()
            },
        );
        shipper.reset("t").await.unwrap();
        shipper.append_entry(record(vec![])).await.unwrap();

        writer.fail.store(true, Ordering::SeqCst);
        assert!(shipper.append_entry(record(vec![])).await.is_err());
        assert!(shipper.append_entry(record(vec![])).await.is_err());
        assert_eq!(shipper.len(), 2);
    }

    #[tokio::test]
    async fn test_first_record_fixes_batch_metadata() {
        let (mut shipper, writer) = shipper();
        shipper.reset("t").await.unwrap();

        shipper
            .append_entry(record(vec![(
                "kubernetes",
                k8s(vec![("app", Value::from("first"))], vec![("pod_name", Value::from("a"))]),
            )]))
            .await
            .unwrap();
        shipper
            .append_entry(record(vec![(
                "kubernetes",
                k8s(vec![("app", Value::from("second"))], vec![("pod_name", Value::from("b"))]),
            )]))
            .await
            .unwrap();
        shipper.flush().await.unwrap();

        let batch = &writer.batches()[0];
        assert_eq!(batch["labels"]["k8s-pod/app"], "first");
        assert_eq!(batch["resource"]["type"], "k8s_container");
        assert_eq!(batch["resource"]["labels"]["pod_name"], "a");
        assert_eq!(batch["resource"]["labels"]["project_id"], "p");
        assert!(batch["entries"][1].get("resource").is_none());
    }

    #[tokio::test]
    async fn test_per_entry_policy_attaches_own_metadata() {
        let (mut shipper, writer) = shipper_with(
            StaticMetadata::new("p"),
            ShipperConfig {
                resource_policy: ResourcePolicy::PerEntry,
                ..Default::default()
            },
        );
        shipper.reset("t").await.unwrap();
        for app in ["first", "second"] {
            shipper
                .append_entry(record(vec![(
                    "kubernetes",
                    k8s(vec![("app", Value::from(app))], vec![("pod_name", Value::from(app))]),
                )]))
                .await
                .unwrap();
        }
        shipper.flush().await.unwrap();

        let batch = &writer.batches()[0];
        assert_eq!(batch["labels"]["k8s-pod/app"], "first");
        assert_eq!(batch["entries"][1]["labels"]["k8s-pod/app"], "second");
        assert_eq!(batch["entries"][1]["resource"]["labels"]["pod_name"], "second");
    }

    #[tokio::test]
    async fn test_unconvertible_payload_is_skipped() {
        let (mut shipper, _) = shipper();
        shipper.reset("t").await.unwrap();

        let outcome = shipper
            .append_entry(record(vec![("blob", Value::Binary(vec![1]))]))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AppendOutcome::Skipped(ConversionError::Unsupported { .. })
        ));
        assert!(shipper.is_empty());
        assert!(shipper.batch_labels().is_none());
        assert_eq!(shipper.stats_snapshot().skipped_records, 1);
    }

    #[tokio::test]
    async fn test_bad_timestamp_is_replaced_by_now() {
        let (mut shipper, _) = shipper();
        shipper.reset("t").await.unwrap();

        let before = Utc::now();
        let mut bad = record(vec![("severity", Value::from("ERROR"))]);
        bad.timestamp = EventTime::new(1, 5_000_000);
        shipper.append_entry(bad).await.unwrap();

        let entry = &shipper.entries()[0];
        assert!(entry.timestamp >= before);
        assert_eq!(entry.severity, Severity::Error);
        assert_eq!(shipper.stats_snapshot().substituted_timestamps, 1);
    }

    #[tokio::test]
    async fn test_close_flushes_and_releases_once() {
        let (mut shipper, writer) = shipper();
        shipper.reset("t").await.unwrap();
        shipper.append_entry(record(vec![])).await.unwrap();

        shipper.close().await.unwrap();
        shipper.close().await.unwrap();

        assert_eq!(writer.batches().len(), 1);
        assert_eq!(writer.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            shipper.append_entry(record(vec![])).await,
            Err(ShipperError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_ping_writes_epoch_entry() {
        let (shipper, writer) = shipper();
        shipper.ping().await.unwrap();

        let batch = &writer.batches()[0];
        assert_eq!(batch["logName"], "projects/p/logs/ping");
        assert_eq!(batch["resource"]["labels"]["project_id"], "p");
        assert_eq!(batch["entries"][0]["textPayload"], "ping");
        assert_eq!(batch["entries"][0]["insertId"], "ping");
        assert_eq!(batch["entries"][0]["timestamp"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_config_validation() {
        assert!(ShipperConfig::default().validate().is_ok());
        let too_big = ShipperConfig {
            max_entries: ENTRIES_MAX + 1,
            ..Default::default()
        };
        assert!(matches!(too_big.validate(), Err(ShipperError::InvalidConfig(_))));
    }
}
