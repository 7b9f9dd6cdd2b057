use thiserror::Error;

/// Top-level error type for the output pipeline.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("Shipper error: {0}")]
    Shipper(#[from] crate::buffer::ShipperError),

    #[error("Writer error: {0}")]
    Writer(#[from] crate::sender::WriteError),

    #[error("Logging setup error: {0}")]
    Logging(String),

    #[error("Input error: {0}")]
    Input(#[from] std::io::Error),

    #[error("Fatal output error while delivering {input}")]
    Fatal { input: String },
}
