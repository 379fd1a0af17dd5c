//! Logging utilities for Upwatch components.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable key=value lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::config(format!("unsupported log format {other:?}"))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Normalize a user supplied log level.
///
/// Accepts `debug`, `info`, `warn` and `error` in any case and returns the
/// lowercase directive understood by [`EnvFilter`].
pub fn normalize_level(raw: &str) -> Result<String> {
    let level = raw.trim().to_ascii_lowercase();
    match level.as_str() {
        "debug" | "info" | "warn" | "error" => Ok(level),
        _ => Err(Error::config(format!("unsupported log level {raw:?}"))),
    }
}

/// Initialize tracing with the given level and format.
///
/// The RUST_LOG environment variable, when set, takes precedence over `level`.
pub fn init(level: &str, format: LogFormat) -> Result<()> {
    let level = normalize_level(level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry.with(tracing_fmt::layer()).try_init(),
        LogFormat::Json => registry.with(tracing_fmt::layer().json()).try_init(),
    };

    installed.map_err(Error::logging)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level("INFO").unwrap(), "info");
        assert_eq!(normalize_level(" Warn ").unwrap(), "warn");
        assert!(normalize_level("verbose").is_err());
        assert!(normalize_level("").is_err());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::default().to_string(), "text");
    }
}
