//! Executor configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether the teardown engine deletes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownPolicy {
    #[default]
    Enabled,
    /// Leave everything in place for diagnostics. Not an error path.
    Suppressed,
}

/// Timing and teardown settings shared by the creator, the migration
/// orchestrator and the teardown engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct ExecutorConfig {
    /// Sleep between samples of every bounded poll, in seconds.
    #[serde(with = "secs")]
    pub poll_interval: Duration,

    /// Readiness deadline for infrastructure objects (secrets, providers, maps).
    #[serde(with = "secs")]
    pub resource_wait_timeout: Duration,

    /// Deadline for a Plan object to report `Ready`.
    #[serde(with = "secs")]
    pub plan_ready_timeout: Duration,

    /// How long teardown waits for one object to disappear.
    #[serde(with = "secs")]
    pub deletion_timeout: Duration,

    pub teardown: TeardownPolicy,

    /// Where teardown writes the resources it left in place. `None` writes
    /// nothing.
    pub tracking_file: Option<PathBuf>,
}

impl ExecutorConfig {
    /// Configuration with the given poll interval and defaults elsewhere.
    #[must_use]
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval, ..Self::default() }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            resource_wait_timeout: Duration::from_secs(300),
            plan_ready_timeout: Duration::from_secs(600),
            deletion_timeout: Duration::from_secs(120),
            teardown: TeardownPolicy::Enabled,
            tracking_file: Some(PathBuf::from("resources.json")),
        }
    }
}

/// `Duration` as whole seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
