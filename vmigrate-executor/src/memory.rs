//! In-process object store.
//!
//! Backs dry runs and tests. Status sequences can be scripted per object or
//! per kind so that a poller sees a remote object move through phases, and
//! create/delete failures can be injected.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use vmigrate_core::{ResourceKind, ResourceRef};

use crate::store::ObjectStore;
use crate::ExecutorError;

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ResourceRef, Value>,
    /// Pending `status` values per object; the last one sticks.
    scripts: BTreeMap<ResourceRef, VecDeque<Value>>,
    /// Copied into `scripts` when an object of the kind is created.
    kind_scripts: BTreeMap<ResourceKind, Vec<Value>>,
    conflict_on_create: BTreeSet<ResourceRef>,
    failing_deletes: BTreeSet<ResourceRef>,
    /// Objects that accept a delete request but never disappear.
    lingering: BTreeSet<ResourceRef>,
    create_calls: usize,
    deleted: Vec<ResourceRef>,
}

/// [`ObjectStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock poisoned")
    }

    /// Put an object in place as if someone else had created it.
    pub fn insert(&self, resource: ResourceRef, object: Value) {
        self.lock().objects.insert(resource, object);
    }

    /// The stored object, without consuming any scripted status.
    #[must_use]
    pub fn object(&self, resource: &ResourceRef) -> Option<Value> {
        self.lock().objects.get(resource).cloned()
    }

    #[must_use]
    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.lock().objects.contains_key(resource)
    }

    /// Every stored object of `kind`, in identity order.
    #[must_use]
    pub fn objects_of(&self, kind: ResourceKind) -> Vec<(ResourceRef, Value)> {
        self.lock()
            .objects
            .iter()
            .filter(|(r, _)| r.kind == kind)
            .map(|(r, v)| (r.clone(), v.clone()))
            .collect()
    }

    /// Serve `statuses` one per `get` of `resource`, repeating the last.
    pub fn script_status(&self, resource: ResourceRef, statuses: Vec<Value>) {
        self.lock().scripts.insert(resource, statuses.into());
    }

    /// Like [`MemoryStore::script_status`] for every object of `kind` created
    /// from now on.
    pub fn script_kind_status(&self, kind: ResourceKind, statuses: Vec<Value>) {
        self.lock().kind_scripts.insert(kind, statuses);
    }

    /// The next `create` of `resource` loses a race: the object appears but
    /// the call reports a conflict.
    pub fn conflict_on_create(&self, resource: ResourceRef) {
        self.lock().conflict_on_create.insert(resource);
    }

    /// Every `delete` of `resource` fails.
    pub fn fail_delete(&self, resource: ResourceRef) {
        self.lock().failing_deletes.insert(resource);
    }

    /// `delete` of `resource` is accepted but the object never goes away.
    pub fn linger_on_delete(&self, resource: ResourceRef) {
        self.lock().lingering.insert(resource);
    }

    /// Number of `create` calls that reached the store.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    /// Objects removed by `delete`, in call order.
    #[must_use]
    pub fn deleted(&self) -> Vec<ResourceRef> {
        self.lock().deleted.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>, ExecutorError> {
        let mut state = self.lock();
        if !state.objects.contains_key(resource) {
            return Ok(None);
        }
        let status = match state.scripts.get_mut(resource) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        let Some(object) = state.objects.get_mut(resource) else {
            return Ok(None);
        };
        if let (Some(status), Some(map)) = (status, object.as_object_mut()) {
            map.insert("status".to_owned(), status);
        }
        Ok(Some(object.clone()))
    }

    async fn create(&self, resource: &ResourceRef, body: &Value) -> Result<Value, ExecutorError> {
        let mut state = self.lock();
        state.create_calls += 1;
        if state.conflict_on_create.remove(resource) {
            state.objects.insert(resource.clone(), body.clone());
            return Err(ExecutorError::Conflict { resource: resource.clone() });
        }
        if state.objects.contains_key(resource) {
            return Err(ExecutorError::Conflict { resource: resource.clone() });
        }
        if !state.scripts.contains_key(resource) {
            if let Some(statuses) = state.kind_scripts.get(&resource.kind).cloned() {
                state.scripts.insert(resource.clone(), statuses.into());
            }
        }
        state.objects.insert(resource.clone(), body.clone());
        Ok(body.clone())
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<bool, ExecutorError> {
        let mut state = self.lock();
        if state.failing_deletes.contains(resource) {
            return Err(ExecutorError::Api(format!("delete of {resource} refused")));
        }
        if state.lingering.contains(resource) {
            return Ok(state.objects.contains_key(resource));
        }
        let existed = state.objects.remove(resource).is_some();
        if existed {
            state.scripts.remove(resource);
            state.deleted.push(resource.clone());
        }
        Ok(existed)
    }
}
