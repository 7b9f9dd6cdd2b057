//! One-time detection of the environment's monitored resource.

use super::source::{Attribute, GceMetadataClient, MetadataSource};
use crate::domain::ResourceDescriptor;
use crate::domain::log_entry::GCE_INSTANCE;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

const GLOBAL_METADATA_TIMEOUT: Duration = Duration::from_secs(5);

static GLOBAL: LazyLock<Arc<ResourceDetector>> = LazyLock::new(|| {
    Arc::new(ResourceDetector::new(GceMetadataClient::from_env(
        GLOBAL_METADATA_TIMEOUT,
    )))
});

/// Detects the `gce_instance` resource at most once.
///
/// Concurrent first callers all wait on the same detection; the outcome,
/// including `None` when no project id could be found, is kept for the life
/// of the detector.
pub struct ResourceDetector {
    source: Box<dyn MetadataSource>,
    cell: OnceCell<Option<ResourceDescriptor>>,
}

impl std::fmt::Debug for ResourceDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDetector")
            .field("detected", &self.cell.get())
            .finish_non_exhaustive()
    }
}

impl ResourceDetector {
    pub fn new(source: impl MetadataSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cell: OnceCell::new(),
        }
    }

    /// Process-wide detector backed by the GCE metadata server.
    pub fn global() -> Arc<ResourceDetector> {
        Arc::clone(&GLOBAL)
    }

    pub async fn detect(&self) -> Option<&ResourceDescriptor> {
        self.cell.get_or_init(|| self.run()).await.as_ref()
    }

    /// Result of a finished detection, without triggering one.
    pub fn cached(&self) -> Option<&ResourceDescriptor> {
        self.cell.get().and_then(Option::as_ref)
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    async fn run(&self) -> Option<ResourceDescriptor> {
        let project_id = match self.source.fetch(Attribute::ProjectId).await {
            Ok(id) if !id.is_empty() => id,
            Ok(_) => {
                error!("Resource detection failed: metadata returned an empty project id");
                return None;
            }
            Err(e) => {
                error!("Resource detection failed: cannot get project id: {}", e);
                return None;
            }
        };

        let mut labels = BTreeMap::from([(Attribute::ProjectId.label().to_string(), project_id)]);
        for attribute in [
            Attribute::InstanceId,
            Attribute::Zone,
            Attribute::InstanceName,
        ] {
            match self.source.fetch(attribute).await {
                Ok(value) => {
                    labels.insert(attribute.label().to_string(), value);
                }
                Err(e) => warn!("Error getting {}: {}", attribute.label(), e),
            }
        }

        info!("Detected resource {} with labels {:?}", GCE_INSTANCE, labels);
        Some(ResourceDescriptor::new(GCE_INSTANCE, labels))
    }
}
