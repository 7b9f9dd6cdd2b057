use crate::output::FlushResult;
use crate::sender::WriteError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShipperError {
    #[error("project_id not detected")]
    MissingProjectId,

    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    #[error("Invalid shipper configuration: {0}")]
    InvalidConfig(String),

    #[error("reset must succeed before entries are appended")]
    NotReset,

    #[error("Shipper is closed")]
    Closed,

    #[error("Write failed: {0}")]
    Write(#[from] WriteError),
}

impl ShipperError {
    /// Whether redelivering the same input can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ShipperError::Write(WriteError::InvalidConfiguration(_) | WriteError::Closed) => false,
            ShipperError::Write(_) => true,
            ShipperError::MissingProjectId
            | ShipperError::InvalidTag(_)
            | ShipperError::InvalidConfig(_)
            | ShipperError::NotReset
            | ShipperError::Closed => false,
        }
    }

    /// Host return code for this failure.
    pub fn flush_result(&self) -> FlushResult {
        if self.is_retryable() {
            FlushResult::Retry
        } else {
            FlushResult::Error
        }
    }
}
