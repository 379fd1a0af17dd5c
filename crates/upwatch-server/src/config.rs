//! Configuration loading and validation for the upwatch server

use common::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use upwatch::{DispatchSettings, EngineConfig};
use validator::{Validate, ValidationError};

const REDACTED: &str = "***";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub mail: MailSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.monitor.validate()?;
        self.http.validate()?;
        self.mail.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Monitoring cycle settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitorSettings {
    /// File or directory holding check definitions
    #[validate(length(min = 1))]
    pub spec_path: String,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_cycle_interval")]
    pub cycle_interval: Duration,

    #[validate(range(min = 1, max = 1000))]
    pub stale_gap_multiplier: u32,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_stream_interval")]
    pub stream_interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_shutdown_grace")]
    pub shutdown_grace: Duration,
}

/// HTTP status server settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_basic_auth"))]
pub struct HttpSettings {
    #[validate(length(min = 1))]
    pub address: String,

    #[validate(range(min = 1))]
    pub port: u16,

    pub basic_auth_username: Option<String>,
    pub basic_auth_password: Option<String>,
}

/// Outbound mail settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MailSettings {
    pub endpoint: Option<String>,

    #[validate(range(min = 1))]
    pub port: u16,

    pub username: Option<String>,
    pub password: Option<String>,
    pub sender: Option<String>,

    #[validate(custom = "validate_receivers")]
    pub receivers: Vec<String>,

    pub no_tls: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingSettings {
    #[validate(custom = "validate_log_level")]
    pub level: String,
    pub format: LogFormat,
}

// Default implementations

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            spec_path: default_spec_path(),
            cycle_interval: upwatch::config::DEFAULT_CYCLE_INTERVAL,
            stale_gap_multiplier: upwatch::hysteresis::DEFAULT_STALE_GAP_MULTIPLIER,
            stream_interval: upwatch::status::DEFAULT_STREAM_INTERVAL,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            basic_auth_username: None,
            basic_auth_password: None,
        }
    }
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            port: 587,
            username: None,
            password: None,
            sender: None,
            receivers: Vec::new(),
            no_tls: false,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Definitions live in `<config dir>/upwatch/config.d` unless configured.
fn default_spec_path() -> String {
    dirs::config_dir()
        .map(|dir| dir.join("upwatch").join("config.d"))
        .unwrap_or_else(|| PathBuf::from("config.d"))
        .to_string_lossy()
        .into_owned()
}

// Custom validators

fn validate_cycle_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval < Duration::from_secs(1) || *interval > Duration::from_secs(24 * 3600) {
        return Err(ValidationError::new("cycle_interval_out_of_range"));
    }
    Ok(())
}

fn validate_stream_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval < Duration::from_millis(100) || *interval > Duration::from_secs(3600) {
        return Err(ValidationError::new("stream_interval_out_of_range"));
    }
    Ok(())
}

fn validate_shutdown_grace(grace: &Duration) -> Result<(), ValidationError> {
    if *grace > Duration::from_secs(300) {
        return Err(ValidationError::new("shutdown_grace_too_long"));
    }
    Ok(())
}

fn validate_basic_auth(http: &HttpSettings) -> Result<(), ValidationError> {
    let user = http.basic_auth_username.as_deref().unwrap_or("");
    let password = http.basic_auth_password.as_deref().unwrap_or("");
    if user.is_empty() != password.is_empty() {
        return Err(ValidationError::new("basic_auth_incomplete"));
    }
    Ok(())
}

fn validate_receivers(receivers: &[String]) -> Result<(), ValidationError> {
    if receivers.iter().any(|r| r.trim().is_empty()) {
        return Err(ValidationError::new("mail_receiver_empty"));
    }
    Ok(())
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    common::logging::normalize_level(level)
        .map(|_| ())
        .map_err(|_| ValidationError::new("log_level_unsupported"))
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl HttpSettings {
    /// Basic auth credentials when both halves are configured
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (
            self.basic_auth_username.as_deref(),
            self.basic_auth_password.as_deref(),
        ) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some((user, password))
            }
            _ => None,
        }
    }

    /// `address:port` to bind
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl MailSettings {
    /// Mail is usable only when endpoint, credentials and sender are all set.
    pub fn is_complete(&self) -> bool {
        is_set(&self.endpoint) && is_set(&self.username) && is_set(&self.password) && is_set(&self.sender)
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from `explicit` or from the default search paths.
    ///
    /// Also returns the file that was read, `None` when the defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = match explicit {
            Some(path) if !path.is_file() => {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(),
        };

        match path {
            Some(path) => Ok((Self::load_from_file(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/upwatch/upwatch.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./upwatch.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/upwatch/upwatch.yaml"))
    }

    /// Settings handed to the monitoring engine
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            cycle_interval: self.monitor.cycle_interval,
            stale_gap_multiplier: self.monitor.stale_gap_multiplier,
            stream_interval: self.monitor.stream_interval,
            dispatch: DispatchSettings::default(),
        }
    }

    /// Copy with every secret replaced, safe to log
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.http.basic_auth_password.is_some() {
            copy.http.basic_auth_password = Some(REDACTED.to_string());
        }
        if copy.mail.password.is_some() {
            copy.mail.password = Some(REDACTED.to_string());
        }
        copy
    }
}
