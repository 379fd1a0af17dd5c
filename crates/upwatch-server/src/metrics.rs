//! Prometheus metrics for the upwatch server.
//!
//! Per-target gauges are rebuilt from a [`StatusSnapshot`] at scrape time,
//! so they always agree with `/status`.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Mutex;
use upwatch::{StatusSnapshot, ViewState};

/// Labels for per-target metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TargetLabels {
    /// Target name
    pub target: String,
}

/// Metrics registry with all upwatch server metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    registry: Registry,

    /// Known targets, disabled ones included
    targets: Gauge,
    /// Targets currently failing
    targets_failing: Gauge,
    /// Current state (0=unknown, 1=healthy, 2=failing)
    state: Family<TargetLabels, Gauge>,
    /// Consecutive failures
    consecutive_failures: Family<TargetLabels, Gauge>,
    /// Consecutive successes
    consecutive_successes: Family<TargetLabels, Gauge>,
    /// Open status stream sessions
    stream_sessions: Gauge,

    /// Serializes refresh and encode of one scrape
    scrape: Mutex<()>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let targets = Gauge::default();
        registry.register("upwatch_targets", "Number of configured targets", targets.clone());

        let targets_failing = Gauge::default();
        registry.register(
            "upwatch_targets_failing",
            "Number of targets in failing state",
            targets_failing.clone(),
        );

        let state = Family::<TargetLabels, Gauge>::default();
        registry.register(
            "upwatch_target_state",
            "Current target state (0=unknown, 1=healthy, 2=failing)",
            state.clone(),
        );

        let consecutive_failures = Family::<TargetLabels, Gauge>::default();
        registry.register(
            "upwatch_consecutive_failures",
            "Current consecutive failure count",
            consecutive_failures.clone(),
        );

        let consecutive_successes = Family::<TargetLabels, Gauge>::default();
        registry.register(
            "upwatch_consecutive_successes",
            "Current consecutive success count",
            consecutive_successes.clone(),
        );

        let stream_sessions = Gauge::default();
        registry.register(
            "upwatch_stream_sessions",
            "Open status stream sessions",
            stream_sessions.clone(),
        );

        Self {
            registry,
            targets,
            targets_failing,
            state,
            consecutive_failures,
            consecutive_successes,
            stream_sessions,
            scrape: Mutex::new(()),
        }
    }

    /// Mirror `snapshot` into the gauges and encode the registry.
    pub fn render(&self, snapshot: &StatusSnapshot) -> Result<String, std::fmt::Error> {
        let _guard = self.scrape.lock().unwrap_or_else(|e| e.into_inner());
        self.refresh(snapshot);

        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    fn refresh(&self, snapshot: &StatusSnapshot) {
        self.targets.set(snapshot.spec_count as i64);
        self.targets_failing.set(snapshot.failing_count() as i64);

        // Targets can disappear between scrapes only on restart, but keep
        // the families exact anyway.
        self.state.clear();
        self.consecutive_failures.clear();
        self.consecutive_successes.clear();

        for spec in &snapshot.specs {
            let labels = TargetLabels {
                target: spec.name.clone(),
            };
            self.state.get_or_create(&labels).set(state_value(spec.state));
            self.consecutive_failures
                .get_or_create(&labels)
                .set(i64::from(spec.consecutive_failures));
            self.consecutive_successes
                .get_or_create(&labels)
                .set(i64::from(spec.consecutive_successes));
        }
    }

    /// Track an opened status stream
    pub fn stream_opened(&self) {
        self.stream_sessions.inc();
    }

    /// Track a closed status stream
    pub fn stream_closed(&self) {
        self.stream_sessions.dec();
    }

    /// Open status stream sessions
    pub fn stream_sessions(&self) -> i64 {
        self.stream_sessions.get()
    }
}

fn state_value(state: ViewState) -> i64 {
    match state {
        ViewState::Unknown => 0,
        ViewState::Healthy => 1,
        ViewState::Failing => 2,
    }
}
