//! Per-run resource registry.
//!
//! An [`ExecutionContext`] is owned by exactly one logical thread of control
//! and handed around by `&mut`. It holds the session identity, the name
//! generator, shared values and the ordered creation log that teardown
//! consumes.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use vmigrate_core::{NameGenerator, ResourceRecord, ResourceRef, SessionId};

use crate::ExecutorError;

/// Mutable state of one test run.
#[derive(Debug)]
pub struct ExecutionContext {
    names: NameGenerator,
    shared: BTreeMap<String, Value>,
    log: Vec<ResourceRecord>,
    claimed_vms: BTreeSet<String>,
    retained: BTreeSet<ResourceRef>,
    consumed: bool,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(session: SessionId) -> Self {
        Self {
            names: NameGenerator::new(session),
            shared: BTreeMap::new(),
            log: Vec::new(),
            claimed_vms: BTreeSet::new(),
            retained: BTreeSet::new(),
            consumed: false,
        }
    }

    /// A context with a freshly generated session id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(SessionId::generate())
    }

    #[must_use]
    pub fn session(&self) -> &SessionId {
        self.names.session()
    }

    /// A name no other call in this session has returned.
    pub fn fresh_name(&mut self, base: &str) -> String {
        self.names.fresh(base)
    }

    /// The deterministic session-scoped name for `base`.
    #[must_use]
    pub fn scoped_name(&self, base: &str) -> String {
        self.names.scoped(base)
    }

    /// Append `record` to the creation log.
    ///
    /// Returns `false`, leaving the log untouched, if the same resource is
    /// already registered.
    pub fn register(&mut self, record: ResourceRecord) -> bool {
        if self.is_registered(&record.resource) {
            return false;
        }
        tracing::debug!(resource = %record.resource, session = %record.session, "registered resource");
        self.log.push(record);
        true
    }

    #[must_use]
    pub fn is_registered(&self, resource: &ResourceRef) -> bool {
        self.log.iter().any(|r| &r.resource == resource)
    }

    /// The creation log, oldest first.
    #[must_use]
    pub fn records(&self) -> &[ResourceRecord] {
        &self.log
    }

    /// Hand the creation log to teardown. Only the first call gets records.
    pub fn take_records(&mut self) -> Vec<ResourceRecord> {
        if self.consumed {
            return Vec::new();
        }
        self.consumed = true;
        std::mem::take(&mut self.log)
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Record that `vm` is used by this session. Returns `false` if it was
    /// already claimed.
    pub fn claim_vm(&mut self, vm: impl Into<String>) -> bool {
        self.claimed_vms.insert(vm.into())
    }

    #[must_use]
    pub fn claimed_vms(&self) -> &BTreeSet<String> {
        &self.claimed_vms
    }

    /// Keep `resource` out of automatic teardown.
    pub fn retain(&mut self, resource: ResourceRef) {
        tracing::warn!(resource = %resource, "resource retained for inspection");
        self.retained.insert(resource);
    }

    /// Retain every root and every registered resource whose parent chain
    /// reaches one of them.
    pub fn retain_with_dependents(&mut self, roots: &[ResourceRef]) {
        let mut keep: BTreeSet<ResourceRef> = roots.iter().cloned().collect();
        // Records only point at earlier records, so one pass in creation
        // order sees every parent before its children.
        for record in &self.log {
            if record.parent.as_ref().is_some_and(|p| keep.contains(p)) {
                keep.insert(record.resource.clone());
            }
        }
        for resource in keep {
            self.retain(resource);
        }
    }

    #[must_use]
    pub fn is_retained(&self, resource: &ResourceRef) -> bool {
        self.retained.contains(resource)
    }

    /// Store a value other components can read back by key.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Json`] if `value` cannot be serialised.
    pub fn set_shared<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), ExecutorError> {
        self.shared.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Read a shared value; `Ok(None)` when the key is unset.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Json`] if the stored value is not a `T`.
    pub fn shared<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ExecutorError> {
        self.shared
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(ExecutorError::from)
    }
}
