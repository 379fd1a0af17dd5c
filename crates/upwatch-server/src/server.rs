//! Process wiring: engine, status server and mail outbox under one
//! shutdown token.

use crate::config::Config;
use crate::http_server::StatusServer;
use crate::metrics::MetricsRegistry;
use crate::notifier::{Outbox, OutboxNotifier, notify_parse_failure};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use upwatch::{CheckDefinition, Engine, Notifier, ShellHookRunner};

/// The upwatch server
pub struct UpwatchServer {
    config: Config,
    engine: Engine,
    outbox: Option<Outbox>,
    metrics: Arc<MetricsRegistry>,
}

impl UpwatchServer {
    /// Build the engine from `definitions`. Mail is sent only when `mail`
    /// carries a notifier/outbox pair.
    pub fn new(
        config: Config,
        definitions: Vec<CheckDefinition>,
        mail: Option<(OutboxNotifier, Outbox)>,
    ) -> common::Result<Self> {
        let (notifier, outbox) = match mail {
            Some((notifier, outbox)) => (Some(Arc::new(notifier) as Arc<dyn Notifier>), Some(outbox)),
            None => (None, None),
        };
        if notifier.is_some() && config.mail.receivers.is_empty() {
            warn!("mail is configured but no receivers are set");
        }

        let engine = Engine::new(
            definitions,
            config.to_engine_config(),
            Arc::new(ShellHookRunner::new()),
            notifier,
            config.mail.receivers.clone(),
        )?;

        Ok(Self {
            config,
            engine,
            outbox,
            metrics: Arc::new(MetricsRegistry::new()),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Bind the status server and run until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> common::Result<()> {
        let listener = TcpListener::bind(self.config.http.listen_addr()).await?;
        self.serve(listener, shutdown).await
    }

    /// Run on an already bound listener until `shutdown` fires.
    ///
    /// In-flight hooks and notifications get `shutdown_grace` to finish,
    /// then the outbox is flushed.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> common::Result<()> {
        let outbox_cancel = CancellationToken::new();
        let outbox_task = self
            .outbox
            .map(|outbox| tokio::spawn(outbox.run(outbox_cancel.clone())));

        let status = StatusServer::new(
            self.engine.publisher(),
            self.metrics.clone(),
            &self.config.http,
            shutdown.clone(),
        );
        let mut http_task = tokio::spawn(status.serve(listener));

        info!(
            targets = self.engine.definitions().len(),
            active = self.engine.scheduler().target_count(),
            cycle_interval = ?self.config.monitor.cycle_interval,
            "Upwatch server running"
        );

        let mut http_joined = None;
        tokio::select! {
            _ = self.engine.run(shutdown.clone()) => {}
            joined = &mut http_task => {
                error!("Status server exited before shutdown");
                http_joined = Some(joined);
                shutdown.cancel();
            }
        }

        info!("Shutting down");
        self.engine.shutdown(self.config.monitor.shutdown_grace).await;

        outbox_cancel.cancel();
        if let Some(task) = outbox_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Outbox task failed");
            }
        }

        let joined = match http_joined {
            Some(joined) => joined,
            None => http_task.await,
        };
        match joined {
            Ok(result) => result?,
            Err(e) => return Err(common::Error::other(format!("status server task failed: {}", e))),
        }

        info!("Upwatch server stopped");
        Ok(())
    }
}

/// Send the parse failure notice and flush it before the process exits.
pub async fn report_parse_failure(
    mail: Option<(OutboxNotifier, Outbox)>,
    recipients: &[String],
    spec_path: &str,
    err: &dyn std::error::Error,
) {
    let Some((notifier, outbox)) = mail else {
        notify_parse_failure(None, recipients, spec_path, err).await;
        return;
    };

    notify_parse_failure(Some(&notifier as &dyn Notifier), recipients, spec_path, err).await;
    drop(notifier);

    let flushed = CancellationToken::new();
    flushed.cancel();
    outbox.run(flushed).await;
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
