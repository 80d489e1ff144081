//! Migration run state machine.
//!
//! `Pending → [PreHookRunning →] Running → [PostHookRunning →] {Succeeded | Failed} | TimedOut`
//!
//! Every state has a rank and a run may only move to a state of strictly
//! higher rank, so no state is ever revisited. `Failed` is also reachable
//! straight from `PreHookRunning` (the migration body never starts).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hook::{HookPhase, HookRecord};
use crate::id::RunId;

/// Local state of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MigrationState {
    Pending,
    PreHookRunning,
    Running,
    PostHookRunning,
    Succeeded,
    Failed,
    /// The local deadline elapsed; the remote run may still be going.
    TimedOut,
}

impl MigrationState {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::PreHookRunning => 1,
            Self::Running => 2,
            Self::PostHookRunning => 3,
            Self::Succeeded | Self::Failed | Self::TimedOut => 4,
        }
    }

    /// Terminal states accept no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.rank() == 4
    }

    /// Whether a run in `self` may move to `next`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::PreHookRunning => "PreHookRunning",
            Self::Running => "Running",
            Self::PostHookRunning => "PostHookRunning",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
        };
        f.write_str(s)
    }
}

/// Phase reported by the remote migration object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RemotePhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    /// A value this crate does not know; treated as non-terminal.
    Unknown(String),
}

impl RemotePhase {
    /// Whether the remote side has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for RemotePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Running => f.write_str("Running"),
            Self::Succeeded => f.write_str("Succeeded"),
            Self::Failed => f.write_str("Failed"),
            Self::Canceled => f.write_str("Canceled"),
            Self::Unknown(raw) => write!(f, "Unknown({raw})"),
        }
    }
}

impl FromStr for RemotePhase {
    type Err = std::convert::Infallible;

    /// Case-insensitive; `Executing` is an alias of `Running` and
    /// `Cancelled` of `Canceled`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let phase = match s.trim().to_ascii_lowercase().as_str() {
            "" | "pending" => Self::Pending,
            "running" | "executing" => Self::Running,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Unknown(s.to_owned()),
        };
        Ok(phase)
    }
}

/// Local record of one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct MigrationRun {
    pub id: RunId,
    /// Base name of the plan being executed.
    pub plan_name: String,
    pub started_at: DateTime<Utc>,
    state: MigrationState,
    history: Vec<MigrationState>,
    last_phase: Option<RemotePhase>,
    hooks: Vec<HookRecord>,
    retain_resources: bool,
}

impl MigrationRun {
    /// Start a run in [`MigrationState::Pending`].
    pub fn new(plan_name: impl Into<String>) -> Self {
        Self {
            id: RunId::new(),
            plan_name: plan_name.into(),
            started_at: Utc::now(),
            state: MigrationState::Pending,
            history: vec![MigrationState::Pending],
            last_phase: None,
            hooks: Vec::new(),
            retain_resources: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Every state the run has been in, oldest first.
    #[must_use]
    pub fn history(&self) -> &[MigrationState] {
        &self.history
    }

    #[must_use]
    pub fn last_phase(&self) -> Option<&RemotePhase> {
        self.last_phase.as_ref()
    }

    #[must_use]
    pub fn hooks(&self) -> &[HookRecord] {
        &self.hooks
    }

    /// The record of the hook executed in `phase`, if it ran.
    #[must_use]
    pub fn hook(&self, phase: HookPhase) -> Option<&HookRecord> {
        self.hooks.iter().find(|h| h.phase == phase)
    }

    /// Whether the run's resources must survive teardown.
    #[must_use]
    pub fn retain_resources(&self) -> bool {
        self.retain_resources
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// Returns [`CoreError::StateRegression`] if `next` does not rank above
    /// the current state.
    pub fn advance(&mut self, next: MigrationState) -> Result<(), CoreError> {
        if !self.state.can_advance_to(next) {
            return Err(CoreError::StateRegression { from: self.state, to: next });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Record the latest phase sampled from the remote object.
    pub fn observe(&mut self, phase: RemotePhase) {
        self.last_phase = Some(phase);
    }

    pub fn record_hook(&mut self, record: HookRecord) {
        self.hooks.push(record);
    }

    /// Keep this run's resources out of automatic teardown.
    pub fn mark_retained(&mut self) {
        self.retain_resources = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance(run: &mut MigrationRun, next: MigrationState) {
        if let Err(e) = run.advance(next) {
            panic!("unexpected error: {e}");
        }
    }

    #[test]
    fn new_run_starts_pending() {
        let run = MigrationRun::new("plan");
        assert_eq!(run.state(), MigrationState::Pending);
        assert_eq!(run.history(), &[MigrationState::Pending]);
    }

    #[test]
    fn full_path_is_accepted_in_order() {
        let mut run = MigrationRun::new("plan");
        for next in [
            MigrationState::PreHookRunning,
            MigrationState::Running,
            MigrationState::PostHookRunning,
            MigrationState::Succeeded,
        ] {
            advance(&mut run, next);
        }
        assert_eq!(run.history().len(), 5);
        assert!(run.state().is_terminal());
    }

    #[test]
    fn pre_hook_can_fail_without_running() {
        let mut run = MigrationRun::new("plan");
        advance(&mut run, MigrationState::PreHookRunning);
        advance(&mut run, MigrationState::Failed);
        assert!(!run.history().contains(&MigrationState::Running));
    }

    #[test]
    fn regression_is_rejected() {
        let mut run = MigrationRun::new("plan");
        advance(&mut run, MigrationState::Running);
        let result = run.advance(MigrationState::PreHookRunning);
        assert!(matches!(result, Err(CoreError::StateRegression { .. })));
        assert_eq!(run.state(), MigrationState::Running, "failed advance must not change state");
    }

    #[test]
    fn terminal_state_is_final() {
        let mut run = MigrationRun::new("plan");
        advance(&mut run, MigrationState::Running);
        advance(&mut run, MigrationState::TimedOut);
        assert!(run.advance(MigrationState::Succeeded).is_err());
        assert!(run.advance(MigrationState::TimedOut).is_err(), "no state is revisited");
    }

    #[test]
    fn remote_phase_parse_accepts_aliases() {
        assert_eq!("Executing".parse::<RemotePhase>(), Ok(RemotePhase::Running));
        assert_eq!("SUCCEEDED".parse::<RemotePhase>(), Ok(RemotePhase::Succeeded));
        assert_eq!("Cancelled".parse::<RemotePhase>(), Ok(RemotePhase::Canceled));
        assert_eq!("Archived".parse::<RemotePhase>(), Ok(RemotePhase::Unknown("Archived".to_owned())));
        assert!(!RemotePhase::Unknown("x".to_owned()).is_terminal());
    }

    proptest::proptest! {
        #[test]
        fn proptest_history_never_decreases(steps in proptest::collection::vec(0u8..7, 0..20)) {
            let all = [
                MigrationState::Pending,
                MigrationState::PreHookRunning,
                MigrationState::Running,
                MigrationState::PostHookRunning,
                MigrationState::Succeeded,
                MigrationState::Failed,
                MigrationState::TimedOut,
            ];
            let mut run = MigrationRun::new("plan");
            for step in steps {
                let _ = run.advance(all[usize::from(step)]);
            }
            let ranks: Vec<u8> = run.history().iter().map(|s| s.rank()).collect();
            proptest::prop_assert!(ranks.windows(2).all(|w| w[0] < w[1]), "history regressed: {:?}", run.history());
        }

        #[test]
        fn proptest_phase_parse_never_panics(raw in ".{0,40}") {
            let _ = raw.parse::<RemotePhase>();
        }
    }
}
