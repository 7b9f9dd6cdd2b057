pub mod client;
pub mod stdout;

pub use client::{ClientConfig, ClientStats, CloudLoggingClient, ConnectionStats};
pub use stdout::StdoutWriter;

use crate::domain::WriteLogEntriesRequest;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Request timeout: {0}")]
    RequestTimeout(String),
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Writer is closed")]
    Closed,
}

/// Boundary to the remote logging service: one call delivers one batch.
///
/// A write either delivers every entry or fails as a whole.
pub trait LogWriter: Send + Sync {
    fn write_log_entries(
        &self,
        request: &WriteLogEntriesRequest<'_>,
    ) -> impl Future<Output = Result<(), WriteError>> + Send;

    /// Releases the underlying connection. Writes after close fail with
    /// [`WriteError::Closed`].
    fn close(&self) -> impl Future<Output = Result<(), WriteError>> + Send;
}

impl<W: LogWriter> LogWriter for Arc<W> {
    fn write_log_entries(
        &self,
        request: &WriteLogEntriesRequest<'_>,
    ) -> impl Future<Output = Result<(), WriteError>> + Send {
        (**self).write_log_entries(request)
    }

    fn close(&self) -> impl Future<Output = Result<(), WriteError>> + Send {
        (**self).close()
    }
}
