//! Check definitions, probe outcomes and per-target state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Timeout applied when a definition leaves it unset.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One monitored HTTP endpoint and its expectations.
///
/// Definitions are produced by the definition loader and never mutated by
/// the engine. `name` is the target identity and the state store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckDefinition {
    /// Unique, non-empty target name
    pub name: String,

    /// Where the definition came from (usually a file path)
    pub source_path: String,

    /// Disabled targets are never probed and never get state
    pub disabled: bool,

    /// HTTP method, GET when empty
    pub method: String,

    /// Absolute URL including scheme and host
    pub url: String,

    /// Query arguments that overwrite same-named keys of `url`
    pub extra_query_args: BTreeMap<String, String>,

    /// Request timeout, [`DEFAULT_PROBE_TIMEOUT`] when zero
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Follow 3xx responses instead of validating them
    pub follow_redirects: bool,

    /// Expected status code
    pub expect_status_code: Option<u16>,

    /// Expected header values, exact match per key
    pub expect_headers: BTreeMap<String, String>,

    /// Expected body, exact match
    pub expect_body_exact: Option<String>,

    /// Expected body substring
    pub expect_body_contains: Option<String>,

    /// Consecutive failures before entering failing (values < 1 mean 1)
    pub failure_threshold: i64,

    /// Consecutive successes before recovering (values < 1 mean 1)
    pub success_threshold: i64,

    /// Shell script run when the target enters failing
    pub on_failure_script: Option<String>,

    /// Shell script run when the target recovers
    pub on_recovery_script: Option<String>,
}

impl Default for CheckDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            source_path: String::new(),
            disabled: false,
            method: "GET".to_string(),
            url: String::new(),
            extra_query_args: BTreeMap::new(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            follow_redirects: false,
            expect_status_code: None,
            expect_headers: BTreeMap::new(),
            expect_body_exact: None,
            expect_body_contains: None,
            failure_threshold: 1,
            success_threshold: 1,
            on_failure_script: None,
            on_recovery_script: None,
        }
    }
}

impl CheckDefinition {
    /// Whether the scheduler should probe this target.
    pub fn is_active(&self) -> bool {
        !self.disabled
    }

    /// Request timeout with the default applied.
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_PROBE_TIMEOUT
        } else {
            self.timeout
        }
    }
}

/// Why a probe did not pass.
///
/// Only the first failing expectation class is reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("parse url: {0}")]
    InvalidUrl(String),

    #[error("url must include scheme and host: {0:?}")]
    MissingHost(String),

    #[error("build request: invalid method {0:?}")]
    InvalidMethod(String),

    #[error("perform request: {0}")]
    Request(String),

    #[error("read response body: {0}")]
    ReadBody(String),

    #[error("unexpected status code: got {got}, want {want}")]
    StatusMismatch { got: u16, want: u16 },

    #[error("unexpected header {name:?}: got {got:?}, want {want:?}")]
    HeaderMismatch {
        name: String,
        got: String,
        want: String,
    },

    #[error("unexpected body exact match")]
    BodyMismatch,

    #[error("response body does not contain {0:?}")]
    BodyMissingSubstring(String),

    #[error("probe cancelled")]
    Cancelled,
}

impl ProbeError {
    /// Expectation class of the failure.
    pub fn class(&self) -> &'static str {
        match self {
            ProbeError::InvalidUrl(_) | ProbeError::MissingHost(_) | ProbeError::InvalidMethod(_) => {
                "parse"
            }
            ProbeError::Request(_) | ProbeError::ReadBody(_) => "network",
            ProbeError::StatusMismatch { .. } => "status",
            ProbeError::HeaderMismatch { .. } => "header",
            ProbeError::BodyMismatch | ProbeError::BodyMissingSubstring(_) => "body",
            ProbeError::Cancelled => "cancelled",
        }
    }
}

/// Result of one probe against one target.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    /// Time spent on the probe
    pub duration: Duration,

    /// First failing expectation, `None` on success
    pub error: Option<ProbeError>,

    /// Response code, when a response was received
    pub response_code: Option<u16>,
}

impl CheckOutcome {
    /// Create a passing outcome
    pub fn success(duration: Duration) -> Self {
        Self {
            duration,
            error: None,
            response_code: None,
        }
    }

    /// Create a failing outcome
    pub fn failure(duration: Duration, error: ProbeError) -> Self {
        Self {
            duration,
            error: Some(error),
            response_code: None,
        }
    }

    /// Attach the observed response code
    pub fn with_response_code(mut self, code: u16) -> Self {
        self.response_code = Some(code);
        self
    }

    /// Check if every expectation passed
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the probe was aborted by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(ProbeError::Cancelled))
    }
}

/// High-level status of a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    #[default]
    Healthy,
    Failing,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetStatus::Healthy => write!(f, "healthy"),
            TargetStatus::Failing => write!(f, "failing"),
        }
    }
}

/// Cycle counters and status for one target.
///
/// `consecutive_failures` and `consecutive_successes` are never both
/// non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    pub status: TargetStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
    pub last_cycle_completed_at: Option<DateTime<Utc>>,
}

/// Edge-triggered status change emitted once per threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    EnteredFailing,
    Recovered,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::None => write!(f, "none"),
            Transition::EnteredFailing => write!(f, "entered_failing"),
            Transition::Recovered => write!(f, "recovered"),
        }
    }
}
