mod common;

use common::{RecordingWriter, encode_records};
use serde_json::json;
use stackdriver_output::buffer::{
    AppendOutcome, BatchShipper, ENTRIES_MAX, ResourcePolicy, ShipperConfig, ShipperError,
};
use stackdriver_output::metadata::{ResourceDetector, StaticMetadata};
use stackdriver_output::parser::Records;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn shipper(
    metadata: StaticMetadata,
    config: ShipperConfig,
) -> (Arc<RecordingWriter>, BatchShipper<Arc<RecordingWriter>>) {
    let writer = Arc::new(RecordingWriter::default());
    let detector = Arc::new(ResourceDetector::new(metadata));
    let shipper = BatchShipper::new(Arc::clone(&writer), detector, config).unwrap();
    (writer, shipper)
}

#[tokio::test]
async fn test_thousand_entries_flush_once() {
    let (writer, mut shipper) = shipper(StaticMetadata::new("p"), ShipperConfig::default());
    shipper.reset("app").await.unwrap();

    let records: Vec<_> = (0..ENTRIES_MAX + 1).map(|i| json!({"n": i})).collect();
    let mut flushed_at = Vec::new();
    for (i, record) in Records::new(encode_records(&records)).enumerate() {
        if shipper.append_entry(record).await.unwrap() == AppendOutcome::Flushed {
            flushed_at.push(i);
        }
        if i == ENTRIES_MAX - 1 {
            assert_eq!(writer.entry_counts(), vec![ENTRIES_MAX]);
        }
    }

    assert_eq!(flushed_at, vec![ENTRIES_MAX - 1]);
    assert_eq!(shipper.len(), 1);

    shipper.flush().await.unwrap();
    assert_eq!(writer.entry_counts(), vec![ENTRIES_MAX, 1]);
    let stats = shipper.stats_snapshot();
    assert_eq!(stats.batches_written, 2);
    assert_eq!(stats.entries_written, ENTRIES_MAX as u64 + 1);
}

#[tokio::test]
async fn test_reset_without_project_id_keeps_state() {
    let (_writer, mut shipper) = shipper(StaticMetadata::default(), ShipperConfig::default());

    let err = shipper.reset("app").await.unwrap_err();
    assert!(matches!(err, ShipperError::MissingProjectId));
    assert_eq!(err.to_string(), "project_id not detected");
    assert!(shipper.log_name().is_none());

    let record = Records::new(encode_records(&[json!({"msg": "x"})]))
        .next()
        .unwrap();
    assert!(matches!(
        shipper.append_entry(record).await,
        Err(ShipperError::NotReset)
    ));
}

#[tokio::test]
async fn test_request_carries_first_record_metadata() {
    let (writer, mut shipper) = shipper(StaticMetadata::new("p"), ShipperConfig::default());
    shipper.reset("kube.var.log").await.unwrap();

    let data = encode_records(&[
        json!({
            "msg": "first",
            "severity": "warn",
            "kubernetes": {"pod_name": "web-0", "labels": {"app": "web"}}
        }),
        json!({
            "msg": "second",
            "kubernetes": {"pod_name": "web-1", "labels": {"app": "other"}}
        }),
    ]);
    for record in Records::new(data) {
        shipper.append_entry(record).await.unwrap();
    }
    shipper.flush().await.unwrap();

    let request = &writer.requests()[0];
    assert_eq!(request["logName"], "projects/p/logs/kube.var.log");
    assert_eq!(request["resource"]["type"], "k8s_container");
    assert_eq!(request["resource"]["labels"]["pod_name"], "web-0");
    assert_eq!(request["labels"], json!({"k8s-pod/app": "web"}));

    let entries = request["entries"].as_array().unwrap();
    assert_eq!(entries[0]["severity"], "WARNING");
    assert_eq!(entries[0]["jsonPayload"], json!({"msg": "first"}));
    assert_eq!(entries[1]["severity"], "DEFAULT");
    assert!(entries[1].get("resource").is_none());
}

#[tokio::test]
async fn test_per_entry_policy_attaches_own_resource() {
    let config = ShipperConfig {
        resource_policy: ResourcePolicy::PerEntry,
        ..ShipperConfig::default()
    };
    let (writer, mut shipper) = shipper(StaticMetadata::new("p"), config);
    shipper.reset("app").await.unwrap();

    let data = encode_records(&[
        json!({"kubernetes": {"pod_name": "web-0"}}),
        json!({"kubernetes": {"pod_name": "web-1"}}),
    ]);
    for record in Records::new(data) {
        shipper.append_entry(record).await.unwrap();
    }
    shipper.flush().await.unwrap();

    let request = &writer.requests()[0];
    assert_eq!(request["resource"]["labels"]["pod_name"], "web-0");
    let entries = request["entries"].as_array().unwrap();
    assert_eq!(entries[1]["resource"]["labels"]["pod_name"], "web-1");
}

#[tokio::test]
async fn test_failed_flush_keeps_entries_and_close_is_idempotent() {
    let (writer, mut shipper) = shipper(StaticMetadata::new("p"), ShipperConfig::default());
    shipper.reset("app").await.unwrap();
    for record in Records::new(encode_records(&[json!({"a": 1}), json!({"b": 2})])) {
        shipper.append_entry(record).await.unwrap();
    }

    writer.set_failing(true);
    let err = shipper.flush().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(shipper.len(), 2);

    writer.set_failing(false);
    shipper.close().await.unwrap();
    shipper.close().await.unwrap();
    assert_eq!(writer.entry_counts(), vec![2]);
    assert_eq!(writer.closes.load(Ordering::SeqCst), 1);
    assert!(matches!(
        shipper.reset("app").await,
        Err(ShipperError::Closed)
    ));
}
