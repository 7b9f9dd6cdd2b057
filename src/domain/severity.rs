use serde::{Deserialize, Serialize};

/// Severity levels accepted by the remote logging service.
///
/// Ordered from least to most severe. The ordering exists for completeness;
/// this crate only ever maps into it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Default,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Default => "DEFAULT",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Alert => "ALERT",
            Severity::Emergency => "EMERGENCY",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Severity {
    fn from(text: &str) -> Self {
        map_severity(text)
    }
}

/// Maps the many severity spellings found in the wild onto [`Severity`].
///
/// Matching is case-insensitive and exact. Anything unrecognized is `Default`.
pub fn map_severity(text: &str) -> Severity {
    match text.to_ascii_uppercase().as_str() {
        "EMERGENCY" | "EMERG" => Severity::Emergency,
        "A" | "ALERT" => Severity::Alert,
        "C" | "F" | "CRIT" | "FATAL" | "CRITICAL" => Severity::Critical,
        "E" | "ERR" | "ERROR" | "SEVERE" => Severity::Error,
        "W" | "WARN" | "WARNING" => Severity::Warning,
        "N" | "NOTICE" => Severity::Notice,
        "I" | "INFO" => Severity::Info,
        "D" | "DEBUG" | "TRACE" | "TRACE_INT" | "FINE" | "FINER" | "FINEST" | "CONFIG" => {
            Severity::Debug
        }
        _ => Severity::Default,
    }
}
