//! Status snapshots for pull and push consumers.

use crate::store::StateStore;
use crate::types::{CheckDefinition, TargetStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default period between two pushed snapshots.
pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_secs(2);

const NEVER: &str = "never";

/// Rendered state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewState {
    Healthy,
    Failing,
    Unknown,
}

impl From<TargetStatus> for ViewState {
    fn from(status: TargetStatus) -> Self {
        match status {
            TargetStatus::Healthy => ViewState::Healthy,
            TargetStatus::Failing => ViewState::Failing,
        }
    }
}

impl fmt::Display for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewState::Healthy => write!(f, "healthy"),
            ViewState::Failing => write!(f, "failing"),
            ViewState::Unknown => write!(f, "unknown"),
        }
    }
}

/// One target inside a [`StatusSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatusView {
    pub name: String,
    pub source_path: String,
    pub disabled: bool,
    pub has_state: bool,
    pub state: ViewState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(serialize_with = "serialize_timestamp")]
    pub last_cycle_started_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastCycleAt", serialize_with = "serialize_timestamp")]
    pub last_cycle_completed_at: Option<DateTime<Utc>>,
}

/// Immutable point-in-time view of every known target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    #[serde(serialize_with = "serialize_generated_at")]
    pub generated_at: DateTime<Utc>,
    pub spec_count: usize,
    pub specs: Vec<TargetStatusView>,
}

impl StatusSnapshot {
    /// Number of targets currently failing
    pub fn failing_count(&self) -> usize {
        self.specs
            .iter()
            .filter(|spec| spec.state == ViewState::Failing)
            .count()
    }
}

/// Render a timestamp the way snapshots expose it.
pub fn format_timestamp(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => NEVER.to_string(),
    }
}

fn serialize_timestamp<S: Serializer>(
    at: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*at))
}

fn serialize_generated_at<S: Serializer>(
    at: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "generated_at={} spec_count={}",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.spec_count
        )?;
        for spec in &self.specs {
            writeln!(
                f,
                "name={} state={} disabled={} consecutive_failures={} consecutive_successes={} \
                 last_cycle_started_at={} last_cycle_at={} source={}",
                spec.name,
                spec.state,
                spec.disabled,
                spec.consecutive_failures,
                spec.consecutive_successes,
                format_timestamp(spec.last_cycle_started_at),
                format_timestamp(spec.last_cycle_completed_at),
                spec.source_path,
            )?;
        }
        Ok(())
    }
}

/// Builds snapshots from the state store and the static definitions.
#[derive(Clone)]
pub struct StatusPublisher {
    definitions: Arc<[Arc<CheckDefinition>]>,
    store: Arc<dyn StateStore>,
    stream_interval: Duration,
}

impl StatusPublisher {
    pub fn new(
        definitions: Arc<[Arc<CheckDefinition>]>,
        store: Arc<dyn StateStore>,
        stream_interval: Duration,
    ) -> Self {
        Self {
            definitions,
            store,
            stream_interval,
        }
    }

    /// Render the current state of every target.
    pub fn snapshot(&self) -> StatusSnapshot {
        let specs = self
            .definitions
            .iter()
            .map(|definition| self.view(definition))
            .collect::<Vec<_>>();

        StatusSnapshot {
            generated_at: Utc::now(),
            spec_count: specs.len(),
            specs,
        }
    }

    fn view(&self, definition: &CheckDefinition) -> TargetStatusView {
        let state = if definition.is_active() {
            self.store.get(&definition.name)
        } else {
            None
        };

        match state {
            Some(state) => TargetStatusView {
                name: definition.name.clone(),
                source_path: definition.source_path.clone(),
                disabled: false,
                has_state: true,
                state: state.status.into(),
                consecutive_failures: state.consecutive_failures,
                consecutive_successes: state.consecutive_successes,
                last_cycle_started_at: state.last_cycle_started_at,
                last_cycle_completed_at: state.last_cycle_completed_at,
            },
            None => TargetStatusView {
                name: definition.name.clone(),
                source_path: definition.source_path.clone(),
                disabled: definition.disabled,
                has_state: false,
                state: ViewState::Unknown,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_cycle_started_at: None,
                last_cycle_completed_at: None,
            },
        }
    }

    /// Stream snapshots: one immediately, then one per stream interval.
    ///
    /// The stream ends when `cancel` fires. Dropping the stream ends the
    /// session as well.
    pub fn subscribe(&self, cancel: CancellationToken) -> BoxStream<'static, StatusSnapshot> {
        debug!(interval = ?self.stream_interval, "Status stream session started");

        let session = StreamSession {
            publisher: self.clone(),
            cancel,
            ticker: None,
        };

        stream::unfold(session, |mut session| async move {
            if session.cancel.is_cancelled() {
                return None;
            }

            if let Some(ticker) = session.ticker.as_mut() {
                tokio::select! {
                    biased;
                    _ = session.cancel.cancelled() => return None,
                    _ = ticker.tick() => {}
                }
            } else {
                let period = session.publisher.stream_interval;
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                session.ticker = Some(ticker);
            }

            let snapshot = session.publisher.snapshot();
            Some((snapshot, session))
        })
        .boxed()
    }
}

struct StreamSession {
    publisher: StatusPublisher,
    cancel: CancellationToken,
    ticker: Option<Interval>,
}
