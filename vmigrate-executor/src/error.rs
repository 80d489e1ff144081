//! Error types for the executor crate.

use std::time::Duration;

use vmigrate_core::{CoreError, HookOutcome, HookPhase, ProviderType, RemotePhase, ResourceRef, RunId};

/// Errors that can occur while creating, driving or tearing down resources.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The object already exists. Recovered locally by the resource creator.
    #[error("{resource} already exists")]
    Conflict { resource: ResourceRef },

    /// The object does not exist.
    #[error("{0} not found")]
    NotFound(ResourceRef),

    /// A request was rejected before reaching the backend.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The readiness predicate did not hold before the wait timeout.
    /// The resource stays tracked for teardown.
    #[error("{resource} not ready after {waited:?} (last status: {last_status})")]
    ResourceNotReadyTimeout { resource: ResourceRef, waited: Duration, last_status: String },

    /// A backend error, wrapped with the identity of the resource it concerns.
    #[error("{resource}: {source}")]
    Resource {
        resource: ResourceRef,
        #[source]
        source: Box<ExecutorError>,
    },

    /// The migration did not reach a terminal phase before its deadline.
    /// The remote run is left running.
    #[error("migration run {run} of plan '{plan}' timed out after {waited:?} (last phase: {})", last_phase.as_ref().map_or_else(|| "none".to_owned(), ToString::to_string))]
    MigrationTimeout { run: RunId, plan: String, last_phase: Option<RemotePhase>, waited: Duration },

    /// The remote side reported a failed or canceled migration.
    #[error("migration run {run} of plan '{plan}' ended in phase {phase}: {reason}")]
    MigrationPlanExec { run: RunId, plan: String, phase: RemotePhase, reason: String },

    /// The pre-hook result differs from the declared expectation.
    #[error("pre-hook of run {run} expected to {expected} but observed {observed}")]
    PreHookExpectationMismatch { run: RunId, expected: HookOutcome, observed: HookOutcome },

    /// The post-hook result differs from the declared expectation.
    #[error("post-hook of run {run} expected to {expected} but observed {observed}")]
    PostHookExpectationMismatch { run: RunId, expected: HookOutcome, observed: HookOutcome },

    /// The provider endpoint is unreachable, rejected the login, or the
    /// provider is not connected.
    #[error("{provider} provider at {endpoint}: {reason}")]
    ProviderConnection { provider: ProviderType, endpoint: String, reason: String },

    /// A provider call failed after the connection was established.
    #[error("{provider} provider error: {reason}")]
    Provider { provider: ProviderType, reason: String },

    /// The provider variant does not offer the requested capability.
    #[error("{provider} provider does not support {capability}")]
    Unsupported { provider: ProviderType, capability: vmigrate_core::Capability },

    /// The provider has no VM with this name.
    #[error("VM '{name}' not found on {provider} provider")]
    VmNotFound { provider: ProviderType, name: String },

    /// The hook runner could not execute a playbook.
    #[error("hook {phase} execution failed: {reason}")]
    HookExecution { phase: HookPhase, reason: String },

    /// Object-store API request failed.
    #[error("API request failed: {0}")]
    Api(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ExecutorError {
    /// Wrap `self` with the identity of `resource`, unless it already names one.
    #[must_use]
    pub fn for_resource(self, resource: &ResourceRef) -> Self {
        match self {
            e @ (Self::Resource { .. } | Self::Conflict { .. } | Self::NotFound(_) | Self::ResourceNotReadyTimeout { .. }) => e,
            other => Self::Resource { resource: resource.clone(), source: Box::new(other) },
        }
    }
}
