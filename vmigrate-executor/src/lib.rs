//! Resource lifecycle and migration orchestration for vmigrate.
//!
//! Creates remote objects idempotently and tracks them for teardown, drives
//! externally executed migrations through a polling state machine with hook
//! sequencing, and tears everything down again in reverse creation order.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod context;
pub mod creator;
pub mod error;
pub mod hooks;
pub mod memory;
pub mod migration;
pub mod poll;
pub mod provider;
pub mod proxy;
pub mod store;
pub mod teardown;
pub mod tracking;

pub use config::{ExecutorConfig, TeardownPolicy};
pub use context::ExecutionContext;
pub use creator::{readiness, CreateRequest, ResourceCreator, ResourceHandle, ResourceName};
pub use error::ExecutorError;
pub use hooks::{CommandHookRunner, HookInvocation, HookRunner, HookRunnerConfig, StaticHookRunner};
pub use memory::MemoryStore;
pub use migration::{MigrationOrchestrator, MigrationOutcome, MigrationTargets};
pub use poll::{PollError, Poller};
pub use provider::{SourceProvider, VendorApi, VendorProvider, VendorVm};
pub use proxy::ProxyStore;
pub use store::ObjectStore;
pub use teardown::{TeardownEngine, TeardownOutcome, TeardownReport, TeardownStatus};
pub use tracking::TrackingFile;
