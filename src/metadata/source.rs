use futures::future::{self, BoxFuture, FutureExt};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default metadata server address; overridable through `GCE_METADATA_HOST`.
pub const DEFAULT_METADATA_HOST: &str = "169.254.169.254";
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

/// Identity attributes the resource detector asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    ProjectId,
    InstanceId,
    Zone,
    InstanceName,
}

impl Attribute {
    /// Path below `computeMetadata/v1/`.
    pub fn path(self) -> &'static str {
        match self {
            Attribute::ProjectId => "project/project-id",
            Attribute::InstanceId => "instance/id",
            Attribute::Zone => "instance/zone",
            Attribute::InstanceName => "instance/name",
        }
    }

    /// Resource label the attribute is stored under.
    pub fn label(self) -> &'static str {
        match self {
            Attribute::ProjectId => "project_id",
            Attribute::InstanceId => "instance_id",
            Attribute::Zone => "zone",
            Attribute::InstanceName => "instance_name",
        }
    }
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Invalid metadata URL: {0}")]
    InvalidUrl(String),
    #[error("Metadata request for {attribute} timed out")]
    Timeout { attribute: &'static str },
    #[error("Metadata server returned HTTP {status} for {attribute}")]
    Http { status: u16, attribute: &'static str },
    #[error("Attribute not configured: {0}")]
    NotConfigured(&'static str),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Where environment identity comes from.
///
/// Returns boxed futures so detectors can hold any source behind `dyn`.
pub trait MetadataSource: Send + Sync {
    fn fetch(&self, attribute: Attribute) -> BoxFuture<'_, Result<String, MetadataError>>;
}

/// Client for the GCE instance metadata server.
#[derive(Debug, Clone)]
pub struct GceMetadataClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl GceMetadataClient {
    /// `host` is a bare `host[:port]` or a full `http(s)://` base.
    pub fn new(host: &str, timeout: Duration) -> Self {
        let host = host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}/computeMetadata/v1/")
        } else {
            format!("http://{host}/computeMetadata/v1/")
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url,
            timeout,
        }
    }

    /// Uses `GCE_METADATA_HOST` when set, the link-local address otherwise.
    pub fn from_env(timeout: Duration) -> Self {
        let host = std::env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        Self::new(&host, timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, attribute: Attribute) -> Result<String, MetadataError> {
        let url = format!("{}{}", self.base_url, attribute.path());
        let url = url::Url::parse(&url).map_err(|e| MetadataError::InvalidUrl(format!("{url}: {e}")))?;

        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .get(url)
                .header("Metadata-Flavor", "Google")
                .send(),
        )
        .await
        .map_err(|_| MetadataError::Timeout {
            attribute: attribute.label(),
        })??;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Http {
                status: status.as_u16(),
                attribute: attribute.label(),
            });
        }

        let body = response.text().await?;
        let value = body.trim();
        debug!("Metadata {} = {}", attribute.label(), value);

        // Zone comes back as `projects/<number>/zones/<zone>`.
        let value = match attribute {
            Attribute::Zone => value.rsplit('/').next().unwrap_or(value),
            _ => value,
        };
        Ok(value.to_string())
    }
}

impl MetadataSource for GceMetadataClient {
    fn fetch(&self, attribute: Attribute) -> BoxFuture<'_, Result<String, MetadataError>> {
        self.get(attribute).boxed()
    }
}

/// Fixed identity, for hosts outside GCE or for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticMetadata {
    pub project_id: Option<String>,
    pub instance_id: Option<String>,
    pub zone: Option<String>,
    pub instance_name: Option<String>,
}

impl StaticMetadata {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn with_instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = Some(instance_name.into());
        self
    }

    fn value(&self, attribute: Attribute) -> Option<&String> {
        match attribute {
            Attribute::ProjectId => self.project_id.as_ref(),
            Attribute::InstanceId => self.instance_id.as_ref(),
            Attribute::Zone => self.zone.as_ref(),
            Attribute::InstanceName => self.instance_name.as_ref(),
        }
    }
}

impl MetadataSource for StaticMetadata {
    fn fetch(&self, attribute: Attribute) -> BoxFuture<'_, Result<String, MetadataError>> {
        let result = self
            .value(attribute)
            .cloned()
            .ok_or(MetadataError::NotConfigured(attribute.label()));
        future::ready(result).boxed()
    }
}
