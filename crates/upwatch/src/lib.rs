//! HTTP uptime monitoring engine.
//!
//! The engine probes a fixed set of HTTP endpoints on a periodic cycle and
//! keeps a small state machine per endpoint:
//! - status, consecutive failure and success counters
//! - configurable failure/success thresholds (hysteresis)
//! - a stale guard that drops counters after long gaps between cycles
//!
//! Status transitions fan out to shell hooks and notifications without
//! blocking the cycle, and the current state can be read as snapshots or
//! streamed to subscribers.
//!
//! # Example
//!
//! ```no_run
//! use upwatch::{CheckDefinition, Engine, EngineConfig, ShellHookRunner};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> common::Result<()> {
//! let definition = CheckDefinition {
//!     name: "api".to_string(),
//!     url: "https://example.com/health".to_string(),
//!     expect_status_code: Some(200),
//!     failure_threshold: 3,
//!     ..CheckDefinition::default()
//! };
//!
//! let engine = Engine::new(
//!     vec![definition],
//!     EngineConfig::default(),
//!     Arc::new(ShellHookRunner::new()),
//!     None,
//!     vec![],
//! )?;
//!
//! let cancel = CancellationToken::new();
//! engine.run(cancel).await;
//! println!("{}", engine.publisher().snapshot());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod hooks;
pub mod hysteresis;
pub mod probe;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use dispatch::{DispatchSettings, Message, Notifier, NotifyError, TransitionDispatcher};
pub use engine::Engine;
pub use hooks::{HookAction, HookError, HookRunner, ShellHookRunner};
pub use probe::{HttpProbe, Probe};
pub use scheduler::{CycleReport, CycleScheduler};
pub use status::{StatusPublisher, StatusSnapshot, TargetStatusView, ViewState};
pub use store::{InMemoryStore, StateStore};
pub use types::{CheckDefinition, CheckOutcome, ProbeError, TargetState, TargetStatus, Transition};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(TargetStatus::Healthy.to_string(), "healthy");
        assert_eq!(TargetStatus::Failing.to_string(), "failing");
        assert_eq!(ViewState::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_outcome_helpers() {
        let outcome = CheckOutcome::success(std::time::Duration::from_millis(100));
        assert!(outcome.is_success());
        assert!(outcome.error.is_none());

        let outcome = CheckOutcome::failure(std::time::Duration::ZERO, ProbeError::Cancelled);
        assert!(!outcome.is_success());
        assert!(outcome.is_cancelled());
    }
}
