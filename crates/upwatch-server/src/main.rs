//! Upwatch server binary

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use upwatch_server::notifier::{DEFAULT_OUTBOX_CAPACITY, outbox};
use upwatch_server::server::{report_parse_failure, shutdown_signal};
use upwatch_server::{Args, Config, UpwatchServer, load_definitions};
use validator::Validate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (mut config, source) =
        Config::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    common::logging::init(&config.logging.level, config.logging.format)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Upwatch server starting");
    match &source {
        Some(path) => tracing::info!(path = %path.display(), "Configuration file loaded"),
        None => tracing::info!("No configuration file found, using defaults"),
    }
    tracing::debug!(config = ?config.redacted(), "Configuration loaded");

    let mail = outbox(&config.mail, DEFAULT_OUTBOX_CAPACITY);

    let definitions = match load_definitions(&config.monitor.spec_path) {
        Ok(definitions) => definitions,
        Err(e) => {
            tracing::error!(spec_path = %config.monitor.spec_path, error = %e, "failed to load specs");
            report_parse_failure(mail, &config.mail.receivers, &config.monitor.spec_path, &e).await;
            std::process::exit(1);
        }
    };
    tracing::info!(count = definitions.len(), "Specs loaded");

    let server = UpwatchServer::new(config, definitions, mail)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    server.run(shutdown).await?;
    Ok(())
}
