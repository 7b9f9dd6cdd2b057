//! Bundled runner: acts as the collector host for buffers read from files.

pub mod config;
pub mod logging_system;

pub use config::{Config, ConfigError, LogFormat, LogLevel, WriterKind};
pub use logging_system::{LogDirective, LoggingSystem, setup_logging};

use crate::buffer::{BatchShipper, ShipperStatsSnapshot};
use crate::domain::{OutputError, WriteLogEntriesRequest};
use crate::metadata::{GceMetadataClient, ResourceDetector};
use crate::output::{FlushResult, OutputInstance};
use crate::reliability::{RedeliveryPolicy, deliver_with_redelivery};
use crate::sender::{CloudLoggingClient, LogWriter, StdoutWriter, WriteError};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

/// Writer chosen by configuration.
#[derive(Debug)]
pub enum OutputWriter {
    CloudLogging(CloudLoggingClient),
    Stdout(StdoutWriter),
}

impl LogWriter for OutputWriter {
    async fn write_log_entries(
        &self,
        request: &WriteLogEntriesRequest<'_>,
    ) -> Result<(), WriteError> {
        match self {
            OutputWriter::CloudLogging(client) => client.write_log_entries(request).await,
            OutputWriter::Stdout(writer) => writer.write_log_entries(request).await,
        }
    }

    async fn close(&self) -> Result<(), WriteError> {
        match self {
            OutputWriter::CloudLogging(client) => client.close().await,
            OutputWriter::Stdout(writer) => writer.close().await,
        }
    }
}

/// Totals of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub inputs: usize,
    pub delivered: usize,
    /// Inputs still answered with `RETRY` when redelivery gave up.
    pub abandoned: usize,
    pub deliveries: u32,
    pub shipper: ShipperStatsSnapshot,
}

pub struct App {
    config: Config,
    instance: OutputInstance<OutputWriter>,
    policy: RedeliveryPolicy,
}

impl App {
    pub fn from_config(config: Config) -> Result<Self, OutputError> {
        let writer = match config.writer {
            WriterKind::CloudLogging => {
                OutputWriter::CloudLogging(CloudLoggingClient::new(config.client_config())?)
            }
            WriterKind::Stdout => OutputWriter::Stdout(StdoutWriter::new()),
        };
        Self::with_writer(config, writer)
    }

    pub fn with_writer(config: Config, writer: OutputWriter) -> Result<Self, OutputError> {
        let detector = detector_for(&config);
        let shipper = BatchShipper::new(writer, detector, config.shipper_config())?;
        let policy = RedeliveryPolicy::new(config.retry_config.clone())
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        info!(
            "stackdriver-output v{} (tag={}, writer={:?}, max_entries={})",
            crate::VERSION,
            config.tag,
            config.writer,
            config.max_entries
        );

        Ok(Self {
            config,
            instance: OutputInstance::new(shipper),
            policy,
        })
    }

    pub fn instance(&self) -> &OutputInstance<OutputWriter> {
        &self.instance
    }

    /// Delivers every input in order, redelivering on `RETRY`.
    ///
    /// Stops at the first `ERROR`; the instance is closed in every case.
    pub async fn run(mut self) -> Result<RunSummary, OutputError> {
        if self.config.ping
            && let Err(e) = self.instance.ping().await
        {
            self.close_after_failure("ping").await;
            return Err(e.into());
        }

        let mut summary = RunSummary::default();
        let inputs = self.config.input.clone();
        for input in &inputs {
            summary.inputs += 1;
            let data = match read_input(input).await {
                Ok(data) => data,
                Err(e) => {
                    self.close_after_failure(&input.display().to_string()).await;
                    return Err(e.into());
                }
            };

            let outcome =
                deliver_with_redelivery(&self.policy, &mut self.instance, data, &self.config.tag)
                    .await;
            summary.deliveries += outcome.deliveries;
            match outcome.result {
                FlushResult::Ok => summary.delivered += 1,
                FlushResult::Retry => {
                    warn!(
                        "Abandoned {} after {} deliveries",
                        input.display(),
                        outcome.deliveries
                    );
                    summary.abandoned += 1;
                }
                FlushResult::Error => {
                    error!("Fatal output error while delivering {}", input.display());
                    self.close_after_failure(&input.display().to_string()).await;
                    return Err(OutputError::Fatal {
                        input: input.display().to_string(),
                    });
                }
            }
        }

        let exit = self.instance.exit().await;
        summary.shipper = self.instance.shipper().stats_snapshot();
        info!(
            "Delivered {}/{} inputs ({} entries in {} batches)",
            summary.delivered,
            summary.inputs,
            summary.shipper.entries_written,
            summary.shipper.batches_written
        );
        if exit != FlushResult::Ok {
            return Err(OutputError::Fatal {
                input: "shutdown".to_string(),
            });
        }
        Ok(summary)
    }

    /// Closes the instance on an error path. The original error is what the
    /// caller returns; a failed close is only reported.
    async fn close_after_failure(&mut self, input: &str) {
        let exit = self.instance.exit().await;
        if exit != FlushResult::Ok {
            warn!(
                "Closing output after failure on {} also failed (code {})",
                input,
                exit.code()
            );
        }
    }
}

fn detector_for(config: &Config) -> Arc<ResourceDetector> {
    if let Some(metadata) = config.static_metadata() {
        return Arc::new(ResourceDetector::new(metadata));
    }
    match &config.metadata_host {
        Some(host) => Arc::new(ResourceDetector::new(GceMetadataClient::new(
            host,
            config.metadata_timeout,
        ))),
        None => ResourceDetector::global(),
    }
}

async fn read_input(path: &Path) -> Result<Bytes, std::io::Error> {
    if path.as_os_str() == "-" {
        let mut data = Vec::new();
        tokio::io::stdin().read_to_end(&mut data).await?;
        return Ok(Bytes::from(data));
    }
    Ok(Bytes::from(tokio::fs::read(path).await?))
}
