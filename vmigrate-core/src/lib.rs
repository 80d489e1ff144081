//! Core types for the vmigrate migration validation harness.
//!
//! Defines the domain model shared by the orchestration layer: session
//! identity and naming, tracked resources, migration plans, hook
//! specifications, the migration run state machine and the
//! provider-neutral VM descriptor.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod hook;
pub mod id;
pub mod naming;
pub mod plan;
pub mod resource;
pub mod state;
pub mod vm;

pub use error::CoreError;
pub use hook::{HookOutcome, HookPhase, HookPlaybook, HookRecord, HookSpec};
pub use id::{RunId, SessionId};
pub use naming::{NameGenerator, MAX_NAME_LEN};
pub use plan::{MigrationMode, MigrationPlan, PlanHooks, VmSpec};
pub use resource::{ResourceKind, ResourceRecord, ResourceRef};
pub use state::{MigrationRun, MigrationState, RemotePhase};
pub use vm::{Capability, DiskDescriptor, DiskType, NicDescriptor, PowerState, ProviderType, VmDescriptor};
