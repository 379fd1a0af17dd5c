//! Engine configuration.

use crate::dispatch::DispatchSettings;
use crate::hysteresis::DEFAULT_STALE_GAP_MULTIPLIER;
use crate::status::DEFAULT_STREAM_INTERVAL;
use crate::types::CheckDefinition;
use common::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Default period between two check rounds.
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(60);

/// Settings of the monitoring cycle engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Period between two check rounds
    pub cycle_interval: Duration,

    /// Counters reset when the gap since the last cycle exceeds this many
    /// cycle intervals
    pub stale_gap_multiplier: u32,

    /// Period between two pushed status snapshots
    pub stream_interval: Duration,

    /// Timeouts of transition side effects
    pub dispatch: DispatchSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            stale_gap_multiplier: DEFAULT_STALE_GAP_MULTIPLIER,
            stream_interval: DEFAULT_STREAM_INTERVAL,
            dispatch: DispatchSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        if self.cycle_interval.is_zero() {
            return Err(Error::config("cycle interval must be positive"));
        }
        if self.stale_gap_multiplier == 0 {
            return Err(Error::config("stale gap multiplier must be at least 1"));
        }
        if self.stream_interval.is_zero() {
            return Err(Error::config("stream interval must be positive"));
        }
        if self.dispatch.notify_timeout.is_zero() {
            return Err(Error::config("notification timeout must be positive"));
        }
        if self.dispatch.hook_timeout.is_zero() {
            return Err(Error::config("hook timeout must be positive"));
        }
        Ok(())
    }
}

/// Check that every definition has a non-empty, unique name.
pub fn validate_definitions<'a>(
    definitions: impl IntoIterator<Item = &'a CheckDefinition>,
) -> Result<()> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for definition in definitions {
        let name = definition.name.trim();
        if name.is_empty() {
            return Err(Error::config(format!(
                "spec in {:?} has empty name",
                definition.source_path
            )));
        }
        if let Some(first) = seen.insert(name, &definition.source_path) {
            return Err(Error::config(format!(
                "duplicate name {:?} found in {:?} and {:?}",
                name, first, definition.source_path
            )));
        }
    }
    Ok(())
}
