//! Per-target state storage.

use crate::types::TargetState;
use dashmap::DashMap;

/// Storage for per-target state, keyed by target name.
///
/// Writes come only from the cycle handler; reads come from the status
/// publisher and may run concurrently with writes.
pub trait StateStore: Send + Sync {
    /// Current state of `name`, if a cycle result was ever recorded.
    fn get(&self, name: &str) -> Option<TargetState>;

    /// Replace the state of `name`.
    fn set(&self, name: &str, state: TargetState);

    /// Number of targets with recorded state.
    fn len(&self) -> usize;

    /// Whether no target has recorded state.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide in-memory store. Entries are never removed.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    states: DashMap<String, TargetState>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStore {
    fn get(&self, name: &str) -> Option<TargetState> {
        self.states.get(name).map(|entry| *entry.value())
    }

    fn set(&self, name: &str, state: TargetState) {
        self.states.insert(name.to_string(), state);
    }

    fn len(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetStatus;
    use std::sync::Arc;

    #[test]
    fn test_get_missing_target() {
        let store = InMemoryStore::new();
        assert!(store.get("api").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_replaces_state() {
        let store = InMemoryStore::new();
        store.set("api", TargetState::default());
        store.set(
            "api",
            TargetState {
                status: TargetStatus::Failing,
                consecutive_failures: 3,
                ..TargetState::default()
            },
        );

        let state = store.get("api").unwrap();
        assert_eq!(state.status, TargetStatus::Failing);
        assert_eq!(state.consecutive_failures, 3);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_and_readers() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = Vec::new();

        for i in 0..16u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("target-{}", i % 4);
                store.set(
                    &name,
                    TargetState {
                        consecutive_failures: i,
                        ..TargetState::default()
                    },
                );
                store.get(&name).is_some()
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(store.len(), 4);
    }
}
