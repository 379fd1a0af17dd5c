//! Script hooks run on status transitions.

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Which transition triggered a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    OnFailure,
    OnRecovery,
}

impl HookAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookAction::OnFailure => "on_failure",
            HookAction::OnRecovery => "on_recovery",
        }
    }
}

impl fmt::Display for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook execution errors
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to spawn hook: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("hook exited with {status}: {output}")]
    Failed { status: String, output: String },

    #[error("hook timed out")]
    Timeout,
}

/// Runs a transition hook for a target.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HookRunner: Send + Sync {
    /// Run `script` for `target`. Returns the trimmed combined output.
    async fn run_hook(
        &self,
        action: HookAction,
        target: &str,
        script: &str,
    ) -> Result<String, HookError>;
}

/// Runs hooks with `sh -c`.
///
/// The child is killed when the returned future is dropped, so an outer
/// timeout stops runaway scripts.
#[derive(Debug, Clone)]
pub struct ShellHookRunner {
    shell: String,
}

impl ShellHookRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different POSIX shell binary
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellHookRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HookRunner for ShellHookRunner {
    async fn run_hook(
        &self,
        action: HookAction,
        target: &str,
        script: &str,
    ) -> Result<String, HookError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(script)
            .env("UPWATCH_ACTION", action.as_str())
            .env("UPWATCH_TARGET", target)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            return Err(HookError::Failed {
                status: output.status.to_string(),
                output: combined,
            });
        }

        debug!(action = %action, spec = target, output = %combined, "script_executed");
        Ok(combined)
    }
}
