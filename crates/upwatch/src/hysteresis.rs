//! Hysteresis state machine and staleness guard.
//!
//! Both functions are pure: they take the current [`TargetState`] by value
//! and return the next one. The cycle handler runs [`reset_if_stale`] first
//! and then [`apply`].
//!
//! ```text
//! Healthy --(failures >= failure_threshold)--> Failing   emits EnteredFailing
//! Failing --(successes >= success_threshold)--> Healthy  emits Recovered
//! ```
//!
//! Successes are not accumulated while healthy, and failures keep counting
//! while failing without re-emitting a transition.

use crate::types::{TargetState, TargetStatus, Transition};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default multiple of the cycle interval after which counters go stale.
pub const DEFAULT_STALE_GAP_MULTIPLIER: u32 = 2;

/// Resolve a configured threshold; values below 1 mean 1.
pub fn resolve_threshold(configured: i64) -> u32 {
    configured.clamp(1, u32::MAX as i64) as u32
}

/// Feed one probe result through the state machine.
pub fn apply(
    mut current: TargetState,
    success: bool,
    failure_threshold: u32,
    success_threshold: u32,
) -> (TargetState, Transition) {
    if success {
        current.consecutive_failures = 0;
        if current.status == TargetStatus::Failing {
            current.consecutive_successes = current.consecutive_successes.saturating_add(1);
            if current.consecutive_successes >= success_threshold {
                current.status = TargetStatus::Healthy;
                current.consecutive_successes = 0;
                return (current, Transition::Recovered);
            }
            return (current, Transition::None);
        }
        current.consecutive_successes = 0;
        return (current, Transition::None);
    }

    current.consecutive_successes = 0;
    current.consecutive_failures = current.consecutive_failures.saturating_add(1);
    if current.status == TargetStatus::Failing {
        return (current, Transition::None);
    }

    if current.consecutive_failures >= failure_threshold {
        current.status = TargetStatus::Failing;
        current.consecutive_failures = 0;
        return (current, Transition::EnteredFailing);
    }
    (current, Transition::None)
}

/// Drop both counters when the last completed cycle is too far in the past.
///
/// The gap is stale when it exceeds `gap_multiplier * cycle_interval`. A
/// target without a completed cycle, a zero interval or a zero multiplier is
/// returned unchanged. The status is never touched.
pub fn reset_if_stale(
    mut current: TargetState,
    now: DateTime<Utc>,
    cycle_interval: Duration,
    gap_multiplier: u32,
) -> TargetState {
    let Some(last) = current.last_cycle_completed_at else {
        return current;
    };
    if cycle_interval.is_zero() || gap_multiplier == 0 {
        return current;
    }

    let Some(max_gap) = cycle_interval.checked_mul(gap_multiplier) else {
        return current;
    };
    let Ok(max_gap) = chrono::Duration::from_std(max_gap) else {
        return current;
    };

    if now.signed_duration_since(last) <= max_gap {
        return current;
    }

    current.consecutive_failures = 0;
    current.consecutive_successes = 0;
    current
}
