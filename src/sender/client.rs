use super::{LogWriter, WriteError};
use crate::domain::WriteLogEntriesRequest;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

const WRITE_PATH: &str = "/v2/entries:write";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub user_agent: String,
    /// Opaque OAuth bearer token. Acquiring and refreshing it is the caller's job.
    pub access_token: Option<String>,
    pub enable_compression: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://logging.googleapis.com".to_string(),
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            user_agent: format!("stackdriver-output/{}", env!("CARGO_PKG_VERSION")),
            access_token: None,
            enable_compression: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub entries_sent: u64,
    pub average_response_time: Duration,
}

#[derive(Debug, Default)]
pub struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    entries_sent: AtomicU64,
    total_response_time: AtomicU64,
}

impl ClientStats {
    pub fn record_request(&self, success: bool, entries: usize, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
            self.entries_sent.fetch_add(entries as u64, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ConnectionStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.total_response_time.load(Ordering::Relaxed);

        let average_response_time = if total_requests > 0 {
            Duration::from_millis(total_response_time / total_requests)
        } else {
            Duration::ZERO
        };

        ConnectionStats {
            total_requests,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            entries_sent: self.entries_sent.load(Ordering::Relaxed),
            average_response_time,
        }
    }
}

/// HTTP client for the Cloud Logging `entries.write` method.
#[derive(Debug)]
pub struct CloudLoggingClient {
    client: Client,
    config: ClientConfig,
    write_url: Url,
    stats: Arc<ClientStats>,
    closed: AtomicBool,
}

impl CloudLoggingClient {
    pub fn new(config: ClientConfig) -> Result<Self, WriteError> {
        let endpoint_url: Url = config.endpoint.parse().map_err(|e| {
            WriteError::InvalidConfiguration(format!("Invalid endpoint URL: {e}"))
        })?;

        let write_url = if endpoint_url.path().ends_with(WRITE_PATH) {
            endpoint_url
        } else {
            let mut url = endpoint_url;
            let base = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{base}{WRITE_PATH}"));
            url
        };

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .user_agent(&config.user_agent)
            .gzip(config.enable_compression)
            .build()
            .map_err(|e| {
                WriteError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            write_url,
            stats: Arc::new(ClientStats::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.stats.snapshot()
    }
}

impl LogWriter for CloudLoggingClient {
    async fn write_log_entries(
        &self,
        request: &WriteLogEntriesRequest<'_>,
    ) -> Result<(), WriteError> {
        if self.is_closed() {
            return Err(WriteError::Closed);
        }

        let body =
            serde_json::to_vec(request).map_err(|e| WriteError::Serialization(e.to_string()))?;
        let entries = request.entries.len();
        let bytes = body.len();

        let mut builder = self
            .client
            .post(self.write_url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body);
        if let Some(token) = &self.config.access_token {
            builder = builder.bearer_auth(token);
        }

        let start = Instant::now();
        let response = timeout(self.config.timeout, builder.send())
            .await
            .map_err(|_| {
                WriteError::RequestTimeout(format!("entries.write for {}", request.log_name))
            })?
            .map_err(WriteError::Network)?;

        let latency = start.elapsed();
        let status = response.status();
        self.stats
            .record_request(status.is_success(), entries, latency);

        if status.is_success() {
            debug!(
                "Wrote {} entries ({} bytes) to {} in {:?}",
                entries, bytes, request.log_name, latency
            );
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            warn!(
                "entries.write for {} failed: HTTP {}",
                request.log_name,
                status.as_u16()
            );
            Err(WriteError::Http {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn close(&self) -> Result<(), WriteError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let stats = self.stats.snapshot();
            info!(
                "Cloud Logging client closed after {} requests ({} entries sent)",
                stats.total_requests, stats.entries_sent
            );
        }
        Ok(())
    }
}
