//! Hook playbook execution.
//!
//! The orchestrator runs pre/post hooks synchronously through a
//! [`HookRunner`] and only cares about the observed outcome. Whether the
//! playbook actually ran to completion, and why not, is the runner's concern.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use vmigrate_core::{HookOutcome, HookPhase, HookPlaybook, RunId, SessionId};

use crate::ExecutorError;

/// One hook execution request.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct HookInvocation {
    pub phase: HookPhase,
    pub playbook: HookPlaybook,
    pub session: SessionId,
    pub run: RunId,
}

impl HookInvocation {
    #[must_use]
    pub fn new(phase: HookPhase, playbook: HookPlaybook, session: SessionId, run: RunId) -> Self {
        Self { phase, playbook, session, run }
    }
}

/// Executes hook playbooks.
#[async_trait]
pub trait HookRunner: Send + Sync {
    /// Run the playbook and report whether it succeeded.
    ///
    /// A playbook that runs and fails is `Ok(HookOutcome::Fail)`, not an error.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HookExecution`] if the playbook could not be
    /// run at all or did not finish in time.
    async fn run(&self, invocation: &HookInvocation) -> Result<HookOutcome, ExecutorError>;
}

/// Settings for [`CommandHookRunner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct HookRunnerConfig {
    /// Program invoked as `<program> <extra_args>... <playbook file>`.
    pub program: PathBuf,
    pub extra_args: Vec<String>,
    /// Seconds before the playbook process is killed.
    pub timeout_secs: u64,
}

impl HookRunnerConfig {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, extra_args: Vec<String>, timeout: Duration) -> Self {
        Self { program: program.into(), extra_args, timeout_secs: timeout.as_secs() }
    }
}

impl Default for HookRunnerConfig {
    fn default() -> Self {
        Self { program: PathBuf::from("ansible-playbook"), extra_args: Vec::new(), timeout_secs: 600 }
    }
}

/// Runs playbooks with a local command, `ansible-playbook` by default.
#[derive(Debug, Clone, Default)]
pub struct CommandHookRunner {
    config: HookRunnerConfig,
    /// Overrides `timeout_secs` when set; lets tests use sub-second limits.
    timeout: Option<Duration>,
}

impl CommandHookRunner {
    #[must_use]
    pub fn new(config: HookRunnerConfig) -> Self {
        Self { config, timeout: None }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_secs(self.config.timeout_secs))
    }
}

#[async_trait]
impl HookRunner for CommandHookRunner {
    async fn run(&self, invocation: &HookInvocation) -> Result<HookOutcome, ExecutorError> {
        let phase = invocation.phase;
        let failed = |reason: String| ExecutorError::HookExecution { phase, reason };

        let playbook = STANDARD
            .decode(invocation.playbook.to_base64())
            .map_err(|e| failed(format!("playbook is not valid base64: {e}")))?;
        let file = tempfile::Builder::new()
            .prefix("vmigrate-hook-")
            .suffix(".yml")
            .tempfile()
            .map_err(|e| failed(format!("create playbook file: {e}")))?;
        tokio::fs::write(file.path(), &playbook)
            .await
            .map_err(|e| failed(format!("write playbook file: {e}")))?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.extra_args)
            .arg(file.path())
            .env("VMIGRATE_SESSION", invocation.session.as_str())
            .env("VMIGRATE_RUN_ID", invocation.run.to_string())
            .env("VMIGRATE_HOOK_PHASE", phase.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            phase = %phase,
            run = %invocation.run,
            program = %self.config.program.display(),
            "running hook playbook"
        );
        let child = cmd
            .spawn()
            .map_err(|e| failed(format!("spawn {}: {e}", self.config.program.display())))?;

        let timeout = self.timeout();
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(failed(format!("wait for playbook: {e}"))),
            Err(_) => return Err(failed(format!("playbook did not finish within {timeout:?}"))),
        };

        let outcome = if output.status.success() { HookOutcome::Succeed } else { HookOutcome::Fail };
        if outcome == HookOutcome::Fail {
            tracing::warn!(
                phase = %phase,
                run = %invocation.run,
                exit_code = output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                "hook playbook failed"
            );
        }
        Ok(outcome)
    }
}

/// Reports configured outcomes without running anything.
///
/// A phase left unconfigured follows the playbook's declared expectation, so
/// built-in playbooks behave as they would under a real runner.
#[derive(Debug, Default)]
pub struct StaticHookRunner {
    pre: Option<HookOutcome>,
    post: Option<HookOutcome>,
    calls: Mutex<Vec<HookPhase>>,
}

impl StaticHookRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `outcome` for every `phase` hook.
    #[must_use]
    pub fn with_outcome(mut self, phase: HookPhase, outcome: HookOutcome) -> Self {
        match phase {
            HookPhase::Pre => self.pre = Some(outcome),
            HookPhase::Post => self.post = Some(outcome),
        }
        self
    }

    /// Phases run so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<HookPhase> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HookRunner for StaticHookRunner {
    async fn run(&self, invocation: &HookInvocation) -> Result<HookOutcome, ExecutorError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.phase);
        }
        let configured = match invocation.phase {
            HookPhase::Pre => self.pre,
            HookPhase::Post => self.post,
        };
        configured.or_else(|| invocation.playbook.expected()).ok_or_else(|| ExecutorError::HookExecution {
            phase: invocation.phase,
            reason: "no outcome configured for a custom playbook".to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(phase: HookPhase, outcome: HookOutcome) -> HookInvocation {
        let session = match SessionId::new("h1") {
            Ok(s) => s,
            Err(e) => panic!("unexpected error: {e}"),
        };
        HookInvocation::new(phase, HookPlaybook::Predefined(outcome), session, RunId::new())
    }

    /// Fails when the playbook file contains the built-in fail task.
    fn grep_runner() -> CommandHookRunner {
        CommandHookRunner::new(HookRunnerConfig::new(
            "sh",
            vec![
                "-c".to_owned(),
                r#"if grep -q ansible.builtin.fail "$1"; then exit 2; fi"#.to_owned(),
                "hook".to_owned(),
            ],
            Duration::from_secs(30),
        ))
    }

    #[tokio::test]
    async fn command_runner_reports_exit_status() {
        let runner = grep_runner();
        match runner.run(&invocation(HookPhase::Pre, HookOutcome::Succeed)).await {
            Ok(outcome) => assert_eq!(outcome, HookOutcome::Succeed),
            Err(e) => panic!("unexpected error: {e}"),
        }
        match runner.run(&invocation(HookPhase::Post, HookOutcome::Fail)).await {
            Ok(outcome) => assert_eq!(outcome, HookOutcome::Fail),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn command_runner_exports_environment() {
        let runner = CommandHookRunner::new(HookRunnerConfig::new(
            "sh",
            vec![
                "-c".to_owned(),
                r#"test "$VMIGRATE_HOOK_PHASE" = post && test "$VMIGRATE_SESSION" = h1 && test -n "$VMIGRATE_RUN_ID""#
                    .to_owned(),
                "hook".to_owned(),
            ],
            Duration::from_secs(30),
        ));
        match runner.run(&invocation(HookPhase::Post, HookOutcome::Succeed)).await {
            Ok(outcome) => assert_eq!(outcome, HookOutcome::Succeed, "hook environment not set"),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn command_runner_times_out() {
        let runner = CommandHookRunner::new(HookRunnerConfig::new(
            "sh",
            vec!["-c".to_owned(), "sleep 5".to_owned(), "hook".to_owned()],
            Duration::from_secs(30),
        ))
        .with_timeout(Duration::from_millis(200));
        let result = runner.run(&invocation(HookPhase::Pre, HookOutcome::Succeed)).await;
        assert!(matches!(result, Err(ExecutorError::HookExecution { phase: HookPhase::Pre, .. })));
    }

    #[tokio::test]
    async fn missing_program_is_execution_error() {
        let runner = CommandHookRunner::new(HookRunnerConfig::new(
            "/nonexistent/ansible-playbook",
            Vec::new(),
            Duration::from_secs(5),
        ));
        let result = runner.run(&invocation(HookPhase::Pre, HookOutcome::Succeed)).await;
        assert!(matches!(result, Err(ExecutorError::HookExecution { .. })));
    }

    #[tokio::test]
    async fn static_runner_follows_expectation_unless_configured() {
        let runner = StaticHookRunner::new().with_outcome(HookPhase::Post, HookOutcome::Succeed);
        assert!(matches!(runner.run(&invocation(HookPhase::Pre, HookOutcome::Fail)).await, Ok(HookOutcome::Fail)));
        assert!(matches!(runner.run(&invocation(HookPhase::Post, HookOutcome::Fail)).await, Ok(HookOutcome::Succeed)));
        assert_eq!(runner.calls(), vec![HookPhase::Pre, HookPhase::Post]);
    }
}
