use crate::buffer::{ENTRIES_MAX, ResourcePolicy, ShipperConfig};
use crate::metadata::StaticMetadata;
use crate::parser::SubsecondUnit;
use crate::reliability::{RetryConfig, RetryStrategy};
use crate::sender::ClientConfig;
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where entries go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriterKind {
    /// Cloud Logging `entries.write` over HTTPS
    #[default]
    CloudLogging,
    /// One JSON line per entry on stdout (dry run)
    Stdout,
}

#[derive(Parser, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Configuration file path (optional, TOML)
    #[arg(long = "config", env = "STACKDRIVER_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Input files holding MessagePack record buffers ("-" reads stdin)
    #[arg(long, num_args = 1..)]
    pub input: Vec<PathBuf>,

    /// Tag of the delivered records; becomes the log id
    #[arg(long, env = "OUTPUT_TAG", default_value = "fluent-bit")]
    pub tag: String,

    /// Destination for entries
    #[arg(long, env = "OUTPUT_WRITER", default_value = "cloud-logging")]
    pub writer: WriterKind,

    /// Cloud Logging API endpoint
    #[arg(long, env = "LOGGING_ENDPOINT", default_value = "https://logging.googleapis.com")]
    pub endpoint: String,

    /// OAuth bearer token for the logging API
    #[arg(long, env = "GOOGLE_LOGGING_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Request timeout for entries.write in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Metadata server host (the process-wide detector is used when unset)
    #[arg(long, env = "GCE_METADATA_HOST")]
    pub metadata_host: Option<String>,

    /// Metadata request timeout in seconds
    #[arg(long, env = "METADATA_TIMEOUT_SECS", default_value = "5")]
    pub metadata_timeout_secs: u64,

    /// Static project id; replaces metadata server detection
    #[arg(long, env = "GCP_PROJECT_ID")]
    pub project_id: Option<String>,

    #[arg(long, env = "GCE_INSTANCE_ID")]
    pub instance_id: Option<String>,

    #[arg(long, env = "GCE_ZONE")]
    pub zone: Option<String>,

    #[arg(long, env = "GCE_INSTANCE_NAME")]
    pub instance_name: Option<String>,

    /// Entries per write (at most 1000)
    #[arg(long, env = "MAX_ENTRIES", default_value = "1000")]
    pub max_entries: usize,

    /// Unit of the second timestamp word
    #[arg(long, env = "SUBSECOND_UNIT", default_value = "micros")]
    pub subsecond_unit: SubsecondUnit,

    /// How resource and labels are attached to a batch
    #[arg(long, env = "RESOURCE_POLICY", default_value = "first-record")]
    pub resource_policy: ResourcePolicy,

    /// Deliveries of one input before giving up on RETRY
    #[arg(long, env = "MAX_DELIVERIES", default_value = "5")]
    pub max_deliveries: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "500")]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "60000")]
    pub retry_max_delay_ms: u64,

    #[arg(long, env = "RETRY_STRATEGY", default_value = "exponential-backoff")]
    pub retry_strategy: RetryStrategy,

    #[arg(long, env = "RETRY_JITTER", default_value_t = true, action = ArgAction::Set)]
    pub retry_jitter: bool,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Send a connectivity probe before delivering
    #[arg(long, env = "PING")]
    pub ping: bool,

    #[serde(skip)]
    #[arg(skip)]
    pub request_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub metadata_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub retry_config: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_file: None,
            input: Vec::new(),
            tag: "fluent-bit".to_string(),
            writer: WriterKind::CloudLogging,
            endpoint: "https://logging.googleapis.com".to_string(),
            access_token: None,
            request_timeout_secs: 30,
            metadata_host: None,
            metadata_timeout_secs: 5,
            project_id: None,
            instance_id: None,
            zone: None,
            instance_name: None,
            max_entries: ENTRIES_MAX,
            subsecond_unit: SubsecondUnit::Micros,
            resource_policy: ResourcePolicy::FirstRecord,
            max_deliveries: 5,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 60_000,
            retry_strategy: RetryStrategy::ExponentialBackoff,
            retry_jitter: true,
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            ping: false,
            request_timeout: Duration::from_secs(30),
            metadata_timeout: Duration::from_secs(5),
            retry_config: RetryConfig::default(),
        }
    }
}

// Values given on the command line or in the environment win; anything left
// at its default is taken from the file.
macro_rules! prefer_explicit {
    ($config:ident, $file:ident, $defaults:ident; $($field:ident),+ $(,)?) => {
        $(
            if $config.$field == $defaults.$field {
                $config.$field = $file.$field.clone();
            }
        )+
    };
}

impl Config {
    /// CLI and environment, then the optional config file.
    pub fn load<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        if let Some(path) = config.config_file.clone() {
            let file = Self::read_file(&path)?;
            config.merge_file(file);
        }
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn merge_file(&mut self, file: Config) {
        let defaults = Config::default();
        let config = self;
        prefer_explicit!(config, file, defaults;
            input,
            tag,
            writer,
            endpoint,
            access_token,
            request_timeout_secs,
            metadata_host,
            metadata_timeout_secs,
            project_id,
            instance_id,
            zone,
            instance_name,
            max_entries,
            subsecond_unit,
            resource_policy,
            max_deliveries,
            retry_base_delay_ms,
            retry_max_delay_ms,
            retry_strategy,
            retry_jitter,
            log_level,
            log_format,
            ping,
        );
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.request_timeout = Duration::from_secs(self.request_timeout_secs);
        self.metadata_timeout = Duration::from_secs(self.metadata_timeout_secs);

        self.retry_config = RetryConfig {
            max_deliveries: self.max_deliveries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            strategy: self.retry_strategy,
            jitter: self.retry_jitter,
        };

        if self.input.is_empty() {
            self.input.push(PathBuf::from("-"));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.writer == WriterKind::CloudLogging {
            Url::parse(&self.endpoint).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
            })?;
        }

        if self.tag.is_empty() {
            return Err(ConfigError::InvalidConfig("Tag must not be empty".to_string()));
        }

        if self.max_entries == 0 || self.max_entries > ENTRIES_MAX {
            return Err(ConfigError::InvalidConfig(format!(
                "max_entries must be between 1 and {ENTRIES_MAX}, got {}",
                self.max_entries
            )));
        }

        if self.request_timeout_secs == 0 || self.metadata_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if let Some(project_id) = &self.project_id
            && project_id.trim().is_empty()
        {
            return Err(ConfigError::InvalidConfig(
                "project_id must not be blank".to_string(),
            ));
        }

        self.retry_config
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            timeout: self.request_timeout,
            access_token: self.access_token.clone(),
            ..ClientConfig::default()
        }
    }

    pub fn shipper_config(&self) -> ShipperConfig {
        ShipperConfig {
            max_entries: self.max_entries,
            subsecond_unit: self.subsecond_unit,
            resource_policy: self.resource_policy,
        }
    }

    /// Configured identity, when a project id was given.
    pub fn static_metadata(&self) -> Option<StaticMetadata> {
        let project_id = self.project_id.as_ref()?;
        Some(StaticMetadata {
            project_id: Some(project_id.clone()),
            instance_id: self.instance_id.clone(),
            zone: self.zone.clone(),
            instance_name: self.instance_name.clone(),
        })
    }
}
