//! Periodic check rounds.
//!
//! A round probes every active target concurrently and waits for all of
//! them before the next tick is considered, so rounds never overlap. Each
//! result is folded into the store on its own: stale guard, then hysteresis,
//! then the cycle timestamps.

use crate::config::EngineConfig;
use crate::dispatch::TransitionDispatcher;
use crate::hysteresis::{apply, reset_if_stale, resolve_threshold};
use crate::probe::{HttpProbe, Probe};
use crate::store::StateStore;
use crate::types::{CheckDefinition, TargetState, Transition};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Hysteresis parameters of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleRules {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cycle_interval: Duration,
    pub stale_gap_multiplier: u32,
}

impl CycleRules {
    pub fn for_definition(definition: &CheckDefinition, config: &EngineConfig) -> Self {
        Self {
            failure_threshold: resolve_threshold(definition.failure_threshold),
            success_threshold: resolve_threshold(definition.success_threshold),
            cycle_interval: config.cycle_interval,
            stale_gap_multiplier: config.stale_gap_multiplier,
        }
    }
}

/// Fold one probe result into the stored state of `name`.
///
/// `completed_at` is also the instant the stale guard compares against.
pub fn record_outcome(
    store: &dyn StateStore,
    name: &str,
    success: bool,
    rules: CycleRules,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
) -> (TargetState, Transition) {
    let current = store.get(name).unwrap_or_default();
    let current = reset_if_stale(
        current,
        completed_at,
        rules.cycle_interval,
        rules.stale_gap_multiplier,
    );

    let (mut next, transition) = apply(
        current,
        success,
        rules.failure_threshold,
        rules.success_threshold,
    );
    next.last_cycle_started_at = Some(started_at);
    next.last_cycle_completed_at = Some(completed_at);
    store.set(name, next);

    (next, transition)
}

/// Summary of one round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Targets whose result was recorded
    pub probed: usize,
    /// Recorded results that failed
    pub failed: usize,
    /// Recorded results that changed the target status
    pub transitions: usize,
    /// Probes aborted by cancellation, not recorded
    pub cancelled: usize,
}

#[derive(Clone)]
struct ScheduledTarget {
    definition: Arc<CheckDefinition>,
    probe: Arc<dyn Probe>,
    rules: CycleRules,
}

enum TargetResult {
    Recorded { success: bool, transition: Transition },
    Cancelled,
}

/// Runs check rounds on a fixed period.
pub struct CycleScheduler {
    targets: Vec<ScheduledTarget>,
    store: Arc<dyn StateStore>,
    dispatcher: TransitionDispatcher,
    cycle_interval: Duration,
}

impl CycleScheduler {
    /// Build an HTTP probe for every active definition.
    pub fn new(
        definitions: &[Arc<CheckDefinition>],
        config: &EngineConfig,
        store: Arc<dyn StateStore>,
        dispatcher: TransitionDispatcher,
    ) -> common::Result<Self> {
        let mut probes: Vec<(Arc<CheckDefinition>, Arc<dyn Probe>)> = Vec::new();
        for definition in definitions.iter().filter(|d| d.is_active()) {
            let probe = HttpProbe::new(definition.clone())?;
            probes.push((definition.clone(), Arc::new(probe)));
        }
        Ok(Self::with_probes(probes, config, store, dispatcher))
    }

    /// Use caller-provided probes. Disabled definitions are skipped.
    pub fn with_probes(
        probes: Vec<(Arc<CheckDefinition>, Arc<dyn Probe>)>,
        config: &EngineConfig,
        store: Arc<dyn StateStore>,
        dispatcher: TransitionDispatcher,
    ) -> Self {
        let targets = probes
            .into_iter()
            .filter(|(definition, _)| definition.is_active())
            .map(|(definition, probe)| ScheduledTarget {
                rules: CycleRules::for_definition(&definition, config),
                definition,
                probe,
            })
            .collect();

        Self {
            targets,
            store,
            dispatcher,
            cycle_interval: config.cycle_interval,
        }
    }

    /// Number of targets probed per round
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Run rounds until `cancel` fires. The first round starts immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            targets = self.targets.len(),
            interval = ?self.cycle_interval,
            "Cycle scheduler started"
        );

        let mut ticker = interval(self.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let report = self.run_cycle(&cancel).await;
                    debug!(
                        probed = report.probed,
                        failed = report.failed,
                        transitions = report.transitions,
                        cancelled = report.cancelled,
                        duration_ms = start.elapsed().as_millis(),
                        "Cycle completed"
                    );
                }
            }
        }

        info!("Cycle scheduler stopped");
    }

    /// Probe every target once and wait for all of them.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let mut tasks = JoinSet::new();
        for target in &self.targets {
            let span = info_span!("probe", spec = %target.definition.name);
            tasks.spawn(
                run_target(
                    target.clone(),
                    self.store.clone(),
                    self.dispatcher.clone(),
                    cancel.clone(),
                )
                .instrument(span),
            );
        }

        let mut report = CycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TargetResult::Recorded {
                    success,
                    transition,
                }) => {
                    report.probed += 1;
                    if !success {
                        report.failed += 1;
                    }
                    if transition != Transition::None {
                        report.transitions += 1;
                    }
                }
                Ok(TargetResult::Cancelled) => report.cancelled += 1,
                Err(e) => error!(error = %e, "Probe task aborted"),
            }
        }
        report
    }
}

async fn run_target(
    target: ScheduledTarget,
    store: Arc<dyn StateStore>,
    dispatcher: TransitionDispatcher,
    cancel: CancellationToken,
) -> TargetResult {
    let started_at = Utc::now();
    let outcome = target.probe.check(&cancel).await;
    if outcome.is_cancelled() {
        return TargetResult::Cancelled;
    }

    let definition = &target.definition;
    let success = outcome.is_success();
    let (state, transition) = record_outcome(
        store.as_ref(),
        &definition.name,
        success,
        target.rules,
        started_at,
        Utc::now(),
    );

    match transition {
        Transition::EnteredFailing => warn!(
            spec = %definition.name,
            source = %definition.source_path,
            error = %outcome.error.as_ref().map_or_else(|| "unknown".to_string(), ToString::to_string),
            "spec_failed"
        ),
        Transition::Recovered => info!(
            spec = %definition.name,
            source = %definition.source_path,
            "spec_recovered"
        ),
        Transition::None => debug!(
            spec = %definition.name,
            status = %state.status,
            failures = state.consecutive_failures,
            successes = state.consecutive_successes,
            "Result recorded"
        ),
    }

    dispatcher.dispatch(definition, transition, outcome.error.as_ref());
    TargetResult::Recorded {
        success,
        transition,
    }
}
