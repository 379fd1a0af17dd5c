//! Wiring of the monitoring engine.

use crate::config::{EngineConfig, validate_definitions};
use crate::dispatch::{Notifier, TransitionDispatcher};
use crate::hooks::HookRunner;
use crate::scheduler::CycleScheduler;
use crate::status::StatusPublisher;
use crate::store::{InMemoryStore, StateStore};
use crate::types::CheckDefinition;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Scheduler, store, dispatcher and publisher sharing one definition set.
pub struct Engine {
    definitions: Arc<[Arc<CheckDefinition>]>,
    store: Arc<dyn StateStore>,
    dispatcher: TransitionDispatcher,
    scheduler: CycleScheduler,
    publisher: StatusPublisher,
}

impl Engine {
    /// Validate `config` and `definitions` and build every component.
    pub fn new(
        definitions: Vec<CheckDefinition>,
        config: EngineConfig,
        hooks: Arc<dyn HookRunner>,
        notifier: Option<Arc<dyn Notifier>>,
        recipients: Vec<String>,
    ) -> common::Result<Self> {
        config.validate()?;
        validate_definitions(&definitions)?;

        let definitions: Arc<[Arc<CheckDefinition>]> =
            definitions.into_iter().map(Arc::new).collect();
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let dispatcher = TransitionDispatcher::new(config.dispatch, hooks, notifier, recipients);
        let scheduler = CycleScheduler::new(&definitions, &config, store.clone(), dispatcher.clone())?;
        let publisher = StatusPublisher::new(definitions.clone(), store.clone(), config.stream_interval);

        Ok(Self {
            definitions,
            store,
            dispatcher,
            scheduler,
            publisher,
        })
    }

    pub fn definitions(&self) -> &[Arc<CheckDefinition>] {
        &self.definitions
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    pub fn dispatcher(&self) -> &TransitionDispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &CycleScheduler {
        &self.scheduler
    }

    /// Publisher handle for status views and streams
    pub fn publisher(&self) -> StatusPublisher {
        self.publisher.clone()
    }

    /// Run check rounds until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        self.scheduler.run(cancel).await;
    }

    /// Wait up to `grace` for in-flight hooks and notifications.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let pending = self.dispatcher.pending();
        let drained = self.dispatcher.shutdown(grace).await;
        if drained {
            info!(pending, "Side effects drained");
        } else {
            warn!(pending = self.dispatcher.pending(), grace = ?grace, "Side effects still running after grace period");
        }
        drained
    }
}
