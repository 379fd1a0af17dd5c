//! Transition side effects: notifications and hooks.
//!
//! Every side effect runs as a detached task on a [`TaskTracker`], bounded
//! by its own timeout. Failures are logged and never reach the cycle.

use crate::hooks::{HookAction, HookError, HookRunner};
use crate::types::{CheckDefinition, ProbeError, Transition};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// Default bound on delivering one notification.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on one hook execution.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// Notification delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier unavailable: {0}")]
    Unavailable(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("delivery timed out")]
    Timeout,
}

/// Delivers one message to one recipient.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Timeouts for dispatched side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub notify_timeout: Duration,
    pub hook_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }
}

/// Subject and body of a transition notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

impl Message {
    /// Message sent when a target enters failing.
    pub fn failure(definition: &CheckDefinition, detail: Option<&ProbeError>) -> Self {
        let reason = detail.map_or_else(|| "unknown".to_string(), ToString::to_string);
        Self {
            subject: "upwatch failure".to_string(),
            body: format!(
                "spec failed: {}\r\nsource: {}\r\nreason: {}\r\n",
                definition.name, definition.source_path, reason
            ),
        }
    }

    /// Message sent when a target recovers.
    pub fn recovery(definition: &CheckDefinition) -> Self {
        Self {
            subject: "upwatch recovery".to_string(),
            body: format!(
                "spec recovered: {}\r\nsource: {}\r\n",
                definition.name, definition.source_path
            ),
        }
    }
}

/// Fans transitions out to the hook runner and the notifier.
#[derive(Clone)]
pub struct TransitionDispatcher {
    settings: DispatchSettings,
    hooks: Arc<dyn HookRunner>,
    notifier: Option<Arc<dyn Notifier>>,
    recipients: Arc<[String]>,
    tracker: TaskTracker,
}

impl TransitionDispatcher {
    /// Create a dispatcher. Without a notifier, or without recipients, only
    /// hooks run.
    pub fn new(
        settings: DispatchSettings,
        hooks: Arc<dyn HookRunner>,
        notifier: Option<Arc<dyn Notifier>>,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            settings,
            hooks,
            notifier,
            recipients: recipients.into(),
            tracker: TaskTracker::new(),
        }
    }

    /// Start side effects for `transition`. Never blocks on them.
    pub fn dispatch(
        &self,
        definition: &CheckDefinition,
        transition: Transition,
        detail: Option<&ProbeError>,
    ) {
        let (action, script, message) = match transition {
            Transition::None => return,
            Transition::EnteredFailing => (
                HookAction::OnFailure,
                definition.on_failure_script.as_deref(),
                Message::failure(definition, detail),
            ),
            Transition::Recovered => (
                HookAction::OnRecovery,
                definition.on_recovery_script.as_deref(),
                Message::recovery(definition),
            ),
        };

        if let Some(script) = script.filter(|s| !s.trim().is_empty()) {
            self.spawn_hook(action, &definition.name, script);
        }
        self.notify_all(message);
    }

    /// Send `message` to every configured recipient.
    pub fn notify_all(&self, message: Message) {
        let Some(notifier) = self.notifier.as_ref() else {
            return;
        };

        let message = Arc::new(message);
        for recipient in self.recipients.iter() {
            let notifier = notifier.clone();
            let recipient = recipient.clone();
            let message = message.clone();
            let limit = self.settings.notify_timeout;

            self.tracker.spawn(async move {
                let sent = timeout(
                    limit,
                    notifier.notify(&recipient, &message.subject, &message.body),
                )
                .await
                .unwrap_or(Err(NotifyError::Timeout));

                match sent {
                    Ok(()) => debug!(recipient = %recipient, subject = %message.subject, "Notification sent"),
                    Err(e) => error!(recipient = %recipient, error = %e, "failed to send monitor email"),
                }
            });
        }
    }

    fn spawn_hook(&self, action: HookAction, target: &str, script: &str) {
        let hooks = self.hooks.clone();
        let target = target.to_string();
        let script = script.to_string();
        let limit = self.settings.hook_timeout;

        self.tracker.spawn(async move {
            if let Err(e) = run_hook_bounded(hooks.as_ref(), action, &target, &script, limit).await {
                error!(action = %action, spec = %target, error = %e, "script execution failed");
            }
        });
    }

    /// Number of side effects still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for outstanding side effects for at most `grace`.
    ///
    /// Returns `true` when everything finished in time. New dispatches are
    /// still accepted afterwards but are no longer awaited by later calls.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        timeout(grace, self.tracker.wait()).await.is_ok()
    }
}

/// Run one hook, turning an elapsed `limit` into [`HookError::Timeout`].
async fn run_hook_bounded(
    hooks: &dyn HookRunner,
    action: HookAction,
    target: &str,
    script: &str,
    limit: Duration,
) -> Result<String, HookError> {
    timeout(limit, hooks.run_hook(action, target, script))
        .await
        .unwrap_or(Err(HookError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::MockHookRunner;
    use mockall::predicate::eq;

    fn definition() -> CheckDefinition {
        CheckDefinition {
            name: "api".to_string(),
            source_path: "/etc/upwatch/specs/api.yaml".to_string(),
            url: "http://127.0.0.1:1/".to_string(),
            on_failure_script: Some("notify-oncall".to_string()),
            on_recovery_script: Some("resolve-oncall".to_string()),
            ..CheckDefinition::default()
        }
    }

    fn recipients() -> Vec<String> {
        vec!["ops@example.com".to_string(), "dev@example.com".to_string()]
    }

    #[test]
    fn test_failure_message() {
        let detail = ProbeError::StatusMismatch { got: 500, want: 200 };
        let message = Message::failure(&definition(), Some(&detail));
        assert_eq!(message.subject, "upwatch failure");
        assert_eq!(
            message.body,
            "spec failed: api\r\nsource: /etc/upwatch/specs/api.yaml\r\nreason: unexpected status code: got 500, want 200\r\n"
        );
    }

    #[test]
    fn test_recovery_message() {
        let message = Message::recovery(&definition());
        assert_eq!(message.subject, "upwatch recovery");
        assert!(message.body.starts_with("spec recovered: api\r\n"));
    }

    #[tokio::test]
    async fn test_failure_runs_hook_and_notifies_every_recipient() {
        let mut hooks = MockHookRunner::new();
        hooks
            .expect_run_hook()
            .with(eq(HookAction::OnFailure), eq("api"), eq("notify-oncall"))
            .times(1)
            .returning(|_, _, _| Ok(String::new()));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|_, subject, body| subject == "upwatch failure" && body.contains("reason: probe cancelled"))
            .times(2)
            .returning(|_, _, _| Ok(()));

        let dispatcher = TransitionDispatcher::new(
            DispatchSettings::default(),
            Arc::new(hooks),
            Some(Arc::new(notifier)),
            recipients(),
        );
        dispatcher.dispatch(&definition(), Transition::EnteredFailing, Some(&ProbeError::Cancelled));

        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_recovery_runs_recovery_hook() {
        let mut hooks = MockHookRunner::new();
        hooks
            .expect_run_hook()
            .with(eq(HookAction::OnRecovery), eq("api"), eq("resolve-oncall"))
            .times(1)
            .returning(|_, _, _| Ok("done".to_string()));

        let dispatcher =
            TransitionDispatcher::new(DispatchSettings::default(), Arc::new(hooks), None, recipients());
        dispatcher.dispatch(&definition(), Transition::Recovered, None);

        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_none_dispatches_nothing() {
        let mut hooks = MockHookRunner::new();
        hooks.expect_run_hook().times(0);
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(0);

        let dispatcher = TransitionDispatcher::new(
            DispatchSettings::default(),
            Arc::new(hooks),
            Some(Arc::new(notifier)),
            recipients(),
        );
        dispatcher.dispatch(&definition(), Transition::None, None);

        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_stop_others() {
        let mut hooks = MockHookRunner::new();
        hooks
            .expect_run_hook()
            .returning(|_, _, _| Err(HookError::Timeout));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .with(eq("ops@example.com"), mockall::predicate::always(), mockall::predicate::always())
            .times(1)
            .returning(|_, _, _| Err(NotifyError::Delivery("mailbox full".to_string())));
        notifier
            .expect_notify()
            .with(eq("dev@example.com"), mockall::predicate::always(), mockall::predicate::always())
            .times(1)
            .returning(|_, _, _| Ok(()));

        let dispatcher = TransitionDispatcher::new(
            DispatchSettings::default(),
            Arc::new(hooks),
            Some(Arc::new(notifier)),
            recipients(),
        );
        dispatcher.dispatch(&definition(), Transition::EnteredFailing, None);

        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_blank_script_is_skipped() {
        let mut hooks = MockHookRunner::new();
        hooks.expect_run_hook().times(0);

        let mut def = definition();
        def.on_failure_script = Some("   ".to_string());

        let dispatcher =
            TransitionDispatcher::new(DispatchSettings::default(), Arc::new(hooks), None, vec![]);
        dispatcher.dispatch(&def, Transition::EnteredFailing, None);

        assert!(dispatcher.shutdown(Duration::from_secs(1)).await);
    }

    struct SlowHooks;

    #[async_trait]
    impl HookRunner for SlowHooks {
        async fn run_hook(&self, _: HookAction, _: &str, _: &str) -> Result<String, HookError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_hook_is_timeout_error() {
        let result = run_hook_bounded(
            &SlowHooks,
            HookAction::OnFailure,
            "api",
            "sleep 3600",
            Duration::from_secs(2),
        )
        .await;
        assert!(matches!(result, Err(HookError::Timeout)));
    }

    #[tokio::test]
    async fn test_hook_within_limit_returns_output() {
        let mut hooks = MockHookRunner::new();
        hooks
            .expect_run_hook()
            .returning(|_, _, _| Ok("done".to_string()));

        let result = run_hook_bounded(
            &hooks,
            HookAction::OnRecovery,
            "api",
            "echo done",
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_hook_is_bounded_by_timeout() {

        let settings = DispatchSettings {
            notify_timeout: Duration::from_secs(1),
            hook_timeout: Duration::from_secs(2),
        };
        let dispatcher = TransitionDispatcher::new(settings, Arc::new(SlowHooks), None, vec![]);
        dispatcher.dispatch(&definition(), Transition::EnteredFailing, None);
        assert_eq!(dispatcher.pending(), 1);

        assert!(dispatcher.shutdown(Duration::from_secs(10)).await);
        assert_eq!(dispatcher.pending(), 0);
    }
}
