use super::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Monitored resource type for entries detected from the VM environment.
pub const GCE_INSTANCE: &str = "gce_instance";
/// Monitored resource type for entries carrying container metadata.
pub const K8S_CONTAINER: &str = "k8s_container";

/// Identifies the logical source of an entry (a VM instance or a container).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ResourceDescriptor {
    pub fn new(resource_type: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            labels,
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        self.labels
            .get("project_id")
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// Entry payload. Serialized flattened as `jsonPayload` or `textPayload`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    JsonPayload(serde_json::Map<String, serde_json::Value>),
    TextPayload(String),
}

/// A single entry as accepted by the remote logging service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub span_id: String,
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<String>,
    // Only populated under the per-entry resource policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceDescriptor>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Body of one `entries.write` call. Borrows the shipper's buffer so a failed
/// write can be resent without copying entries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteLogEntriesRequest<'a> {
    pub log_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<&'a ResourceDescriptor>,
    #[serde(skip_serializing_if = "no_labels")]
    pub labels: &'a BTreeMap<String, String>,
    pub entries: &'a [LogEntry],
}

fn no_labels(labels: &&BTreeMap<String, String>) -> bool {
    labels.is_empty()
}
