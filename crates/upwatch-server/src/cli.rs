//! Command line overrides.

use crate::config::Config;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP uptime monitor
#[derive(Debug, Default, Parser)]
#[command(name = "upwatch-server")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Configuration file, overrides the search paths
    #[arg(long, env = "UPWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// File, directory or glob pattern with check definitions
    #[arg(long, env = "UPWATCH_SPEC_PATH")]
    pub spec_path: Option<String>,

    /// Period between check rounds (e.g. 60s, 1m)
    #[arg(long, env = "UPWATCH_CYCLE_INTERVAL", value_parser = parse_duration)]
    pub cycle_interval: Option<Duration>,

    /// Log level (debug, info, warn, error)
    #[arg(long, env = "UPWATCH_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Status server listen address
    #[arg(long, env = "UPWATCH_HTTP_ADDRESS")]
    pub http_address: Option<String>,

    /// Status server listen port
    #[arg(long, env = "UPWATCH_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Basic auth user for the status server
    #[arg(long, env = "UPWATCH_HTTP_BASIC_AUTH_USERNAME")]
    pub http_basic_auth_username: Option<String>,

    /// Basic auth password for the status server
    #[arg(long, env = "UPWATCH_HTTP_BASIC_AUTH_PASSWORD", hide_env_values = true)]
    pub http_basic_auth_password: Option<String>,

    /// Mail server host
    #[arg(long, env = "UPWATCH_MAIL_ENDPOINT")]
    pub mail_endpoint: Option<String>,

    /// Mail server port
    #[arg(long, env = "UPWATCH_MAIL_PORT")]
    pub mail_port: Option<u16>,

    /// Mail server user
    #[arg(long, env = "UPWATCH_MAIL_USERNAME")]
    pub mail_username: Option<String>,

    /// Mail server password
    #[arg(long, env = "UPWATCH_MAIL_PASSWORD", hide_env_values = true)]
    pub mail_password: Option<String>,

    /// Sender address for notifications
    #[arg(long, env = "UPWATCH_MAIL_SENDER")]
    pub mail_sender: Option<String>,

    /// Talk to the mail server without STARTTLS
    #[arg(long, env = "UPWATCH_MAIL_NO_TLS")]
    pub mail_no_tls: bool,

    /// Notification recipient, repeatable; replaces configured receivers
    #[arg(long = "mail-receiver", env = "UPWATCH_MAIL_RECEIVERS", value_delimiter = ',')]
    pub mail_receivers: Vec<String>,
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(raw.trim()).map_err(|e| e.to_string())
}

impl Args {
    /// Overlay the given flags on `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.spec_path {
            config.monitor.spec_path = path.clone();
        }
        if let Some(interval) = self.cycle_interval {
            config.monitor.cycle_interval = interval;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(address) = &self.http_address {
            config.http.address = address.clone();
        }
        if let Some(port) = self.http_port {
            config.http.port = port;
        }

        if let Some(user) = &self.http_basic_auth_username {
            config.http.basic_auth_username = Some(user.clone());
        }
        if let Some(password) = &self.http_basic_auth_password {
            config.http.basic_auth_password = Some(password.clone());
        }

        if let Some(endpoint) = &self.mail_endpoint {
            config.mail.endpoint = Some(endpoint.clone());
        }
        if let Some(port) = self.mail_port {
            config.mail.port = port;
        }
        if let Some(user) = &self.mail_username {
            config.mail.username = Some(user.clone());
        }
        if let Some(password) = &self.mail_password {
            config.mail.password = Some(password.clone());
        }
        if let Some(sender) = &self.mail_sender {
            config.mail.sender = Some(sender.clone());
        }
        if self.mail_no_tls {
            config.mail.no_tls = true;
        }

        let receivers: Vec<String> = self
            .mail_receivers
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if !receivers.is_empty() {
            config.mail.receivers = receivers;
        }
    }
}
