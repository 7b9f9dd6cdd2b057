use super::config::{LogFormat, LogLevel};
use crate::domain::OutputError;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// One `target=level` entry of the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirective {
    pub target: String,
    pub level: LogLevel,
}

impl LogDirective {
    pub fn new(target: impl Into<String>, level: LogLevel) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    pub fn to_filter_string(&self) -> String {
        format!("{}={}", self.target, self.level.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoggingSystem {
    directives: Vec<LogDirective>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_directive(&mut self, directive: LogDirective) {
        self.directives.push(directive);
    }

    /// Quiets the HTTP stack unless asked otherwise.
    pub fn add_default_directives(&mut self) {
        for target in ["hyper", "hyper_util", "reqwest", "h2", "rustls"] {
            self.add_directive(LogDirective::new(target, LogLevel::Warn));
        }
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let mut filter_parts = Vec::with_capacity(self.directives.len() + 1);
        filter_parts.push(default_level.as_str().to_string());
        filter_parts.extend(self.directives.iter().map(LogDirective::to_filter_string));
        filter_parts.join(",")
    }

    /// Installs the global subscriber. `RUST_LOG` overrides the built filter.
    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), OutputError> {
        let filter_string = self.build_filter_string(default_level);
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&filter_string).map_err(|e| {
                OutputError::Logging(format!("Invalid filter '{filter_string}': {e}"))
            })?,
        };

        let (text, json) = match format {
            LogFormat::Text => (
                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_writer(std::io::stderr)
                        .compact(),
                ),
                None,
            ),
            LogFormat::Json => (
                None,
                Some(
                    fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_writer(std::io::stderr),
                ),
            ),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(text)
            .with(json)
            .try_init()
            .map_err(|e| OutputError::Logging(format!("Failed to set global subscriber: {e}")))
    }
}

/// Sets up logging once per process; later calls return the first outcome.
pub fn setup_logging(level: LogLevel, format: LogFormat) -> Result<(), OutputError> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    INIT.get_or_init(|| {
        let mut logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        logging_system
            .initialize_tracing(level, format)
            .map_err(|e| e.to_string())
    })
    .clone()
    .map_err(OutputError::Logging)
}
