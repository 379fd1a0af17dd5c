//! Upwatch server
//!
//! Runs the [`upwatch`] engine as a long-lived process:
//!
//! - **config / cli**: YAML settings with command line and environment overrides
//! - **definitions**: loads check definitions from a file or directory
//! - **notifier**: queues transition and parse failure mail
//! - **http_server**: text, JSON, event stream and Prometheus views of the
//!   current status
//! - **server**: ties the pieces to one shutdown token

pub mod cli;
pub mod config;
pub mod definitions;
pub mod http_server;
pub mod metrics;
pub mod notifier;
pub mod server;

pub use cli::Args;
pub use config::{Config, ConfigError};
pub use definitions::{DefinitionError, load_definitions};
pub use http_server::StatusServer;
pub use metrics::MetricsRegistry;
pub use notifier::{Outbox, OutboxNotifier};
pub use server::UpwatchServer;
