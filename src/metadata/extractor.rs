use super::resource::ResourceDetector;
use crate::domain::log_entry::K8S_CONTAINER;
use crate::domain::{FieldMap, Record, ResourceDescriptor, Severity, Value, map_severity};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const KUBERNETES_KEY: &str = "kubernetes";
pub const POD_LABEL_PREFIX: &str = "k8s-pod/";

/// Keys dropped from every payload; the timestamp and raw line are carried elsewhere.
const REDUNDANT_KEYS: [&str; 2] = ["log", "time"];

/// Metadata derived from one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub severity: Severity,
    pub resource: Option<ResourceDescriptor>,
    pub labels: BTreeMap<String, String>,
    pub trace: String,
    pub span_id: String,
}

/// Splits a record into entry metadata and the remaining payload fields.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    detector: Arc<ResourceDetector>,
}

impl MetadataExtractor {
    pub fn new(detector: Arc<ResourceDetector>) -> Self {
        Self { detector }
    }

    /// Extracts metadata, removing the consumed keys from `record.fields`.
    ///
    /// Uses whatever the detector has already cached; it never starts a
    /// detection itself.
    pub fn extract(&self, record: &mut Record) -> Extracted {
        let mut meta = take_kubernetes(&mut record.fields);
        clean_up(&mut record.fields);

        let severity = pop_severity(meta.as_mut(), &mut record.fields);
        let labels = meta.as_mut().map(pop_labels).unwrap_or_default();
        let resource = resource_for(self.detector.cached(), meta.as_ref());

        Extracted {
            severity,
            resource,
            labels,
            trace: pop_trace(record),
            span_id: pop_span_id(record),
        }
    }
}

fn take_kubernetes(fields: &mut FieldMap) -> Option<FieldMap> {
    if !matches!(fields.get(KUBERNETES_KEY), Some(Value::Map(_))) {
        return None;
    }
    match fields.remove(KUBERNETES_KEY) {
        Some(Value::Map(meta)) => Some(meta),
        _ => None,
    }
}

fn clean_up(fields: &mut FieldMap) {
    for key in REDUNDANT_KEYS {
        fields.remove(key);
    }
}

fn pop_string(fields: &mut FieldMap, key: &str) -> Option<String> {
    if fields.get(key).and_then(Value::as_str).is_none() {
        return None;
    }
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// Container metadata wins over the record's own `severity` field.
fn pop_severity(meta: Option<&mut FieldMap>, fields: &mut FieldMap) -> Severity {
    if let Some(meta) = meta
        && let Some(text) = pop_string(meta, "severity")
    {
        return map_severity(&text);
    }
    pop_string(fields, "severity")
        .map(|text| map_severity(&text))
        .unwrap_or_default()
}

fn pop_labels(meta: &mut FieldMap) -> BTreeMap<String, String> {
    let Some(Value::Map(pod_labels)) = meta.remove("labels") else {
        return BTreeMap::new();
    };
    pod_labels
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(value) => Some((format!("{POD_LABEL_PREFIX}{key}"), value)),
            _ => None,
        })
        .collect()
}

fn resource_for(
    detected: Option<&ResourceDescriptor>,
    meta: Option<&FieldMap>,
) -> Option<ResourceDescriptor> {
    let Some(meta) = meta else {
        return detected.cloned();
    };

    let mut labels = detected.map(|r| r.labels.clone()).unwrap_or_default();
    for (key, value) in meta.iter() {
        if let Value::String(value) = value {
            labels.insert(key.to_string(), value.clone());
        }
    }
    Some(ResourceDescriptor::new(K8S_CONTAINER, labels))
}

// Trace context is not carried by the collector records yet.
fn pop_trace(_record: &mut Record) -> String {
    String::new()
}

fn pop_span_id(_record: &mut Record) -> String {
    String::new()
}
