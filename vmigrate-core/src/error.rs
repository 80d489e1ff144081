use crate::hook::HookPhase;
use crate::state::MigrationState;

/// Errors produced by the `vmigrate-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A session identifier was empty, too long, or not lowercase alphanumeric.
    #[error("invalid session id '{value}': {reason}")]
    InvalidSessionId { value: String, reason: String },

    /// An explicit resource name is not a valid DNS-1123 label.
    #[error("invalid resource name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A migration plan field failed validation.
    #[error("plan validation failed for field '{field}': {reason}")]
    InvalidPlan { field: String, reason: String },

    /// A pre- or post-hook configuration failed validation.
    #[error("invalid {phase} hook config: {reason}")]
    InvalidHookConfig { phase: HookPhase, reason: String },

    /// A migration run was asked to move backwards in its state order.
    #[error("migration run cannot move from {from} to {to}")]
    StateRegression { from: MigrationState, to: MigrationState },

    /// A resource kind string did not name a known kind.
    #[error("unknown resource kind '{0}'")]
    UnknownResourceKind(String),
}
