//! Idempotent create-or-reuse of remote objects.
//!
//! Every object a session stands up goes through [`ResourceCreator`]: the
//! name is resolved through the session's generator, an existing object is
//! reused as-is, a create race is recovered by re-fetching, and the object is
//! registered for teardown before the caller waits on readiness.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use vmigrate_core::naming::validate_name;
use vmigrate_core::{ResourceKind, ResourceRecord, ResourceRef};

use crate::poll::{PollError, Poller};
use crate::store::ObjectStore;
use crate::{ExecutionContext, ExecutorError};

/// Label stamped on every object, carrying the session id.
pub const SESSION_LABEL: &str = "vmigrate.io/session";

/// How the object name is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceName {
    /// Used verbatim; must already be a valid DNS-1123 label.
    Explicit(String),
    /// `<base>-<session>`: a second request resolves to the same object.
    Scoped(String),
    /// A name never used before in this session.
    Fresh(String),
}

/// Everything needed to create one object.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CreateRequest {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: ResourceName,
    /// Object body without identity: `spec`, `data`, `type` and so on. Nothing
    /// is defaulted, so it must carry every field the backend requires.
    pub body: Value,
    pub parent: Option<ResourceRef>,
}

impl CreateRequest {
    #[must_use]
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: ResourceName, body: Value) -> Self {
        Self { kind, namespace: namespace.map(ToOwned::to_owned), name, body, parent: None }
    }

    /// Record `parent` as the object this one depends on.
    #[must_use]
    pub fn with_parent(mut self, parent: ResourceRef) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A created or reused object.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ResourceHandle {
    pub reference: ResourceRef,
    /// The object as last read, after readiness was confirmed.
    pub object: Value,
    /// The object already existed (or a concurrent create won the race).
    pub reused: bool,
}

/// Creates objects through an [`ObjectStore`] and tracks them in the context.
#[derive(Clone)]
pub struct ResourceCreator {
    store: Arc<dyn ObjectStore>,
    poll_interval: Duration,
}

impl ResourceCreator {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, poll_interval: Duration) -> Self {
        Self { store, poll_interval }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Create the object, or reuse an existing one of the same identity, then
    /// wait until `ready` holds for it.
    ///
    /// The object is registered in `ctx` exactly once, as soon as it is known
    /// to exist, so a readiness timeout still leaves it tracked for teardown.
    /// An existing object is assumed equivalent to the request; its spec is
    /// not compared.
    ///
    /// # Errors
    /// - [`ExecutorError::InvalidRequest`] for a missing or unexpected
    ///   namespace, a provider-side kind, or a body that is not a JSON object.
    /// - [`ExecutorError::Core`] for an invalid explicit name.
    /// - [`ExecutorError::ResourceNotReadyTimeout`] if `ready` never holds
    ///   within `wait_timeout`.
    /// - [`ExecutorError::Resource`] wrapping any backend error.
    pub async fn create_or_reuse<P>(
        &self,
        ctx: &mut ExecutionContext,
        request: CreateRequest,
        ready: P,
        wait_timeout: Duration,
    ) -> Result<ResourceHandle, ExecutorError>
    where
        P: Fn(&Value) -> bool + Send + Sync,
    {
        check_scope(request.kind, request.namespace.as_deref())?;
        let Value::Object(fields) = request.body else {
            return Err(ExecutorError::InvalidRequest(format!("{} body must be a JSON object", request.kind)));
        };
        let name = match request.name {
            ResourceName::Explicit(name) => {
                validate_name(&name)?;
                name
            }
            ResourceName::Scoped(base) => ctx.scoped_name(&base),
            ResourceName::Fresh(base) => ctx.fresh_name(&base),
        };
        let reference = ResourceRef::new(request.kind, name, request.namespace);

        let (object, reused) = match self.store.get(&reference).await.map_err(|e| e.for_resource(&reference))? {
            Some(existing) => {
                tracing::warn!(resource = %reference, "already exists, reusing it");
                (existing, true)
            }
            None => {
                let body = stamp_identity(fields, &reference, ctx);
                match self.store.create(&reference, &body).await {
                    Ok(created) => {
                        tracing::info!(resource = %reference, "created");
                        (created, false)
                    }
                    Err(ExecutorError::Conflict { .. }) => {
                        tracing::warn!(resource = %reference, "lost create race, reusing existing object");
                        let existing = self.store.get(&reference).await.map_err(|e| e.for_resource(&reference))?;
                        let existing = existing.ok_or_else(|| ExecutorError::Resource {
                            resource: reference.clone(),
                            source: Box::new(ExecutorError::Api(
                                "create reported a conflict but the object does not exist".to_owned(),
                            )),
                        })?;
                        (existing, true)
                    }
                    Err(e) => return Err(e.for_resource(&reference)),
                }
            }
        };

        let record = ResourceRecord::new(reference.clone(), ctx.session().clone(), request.parent);
        ctx.register(record);

        if ready(&object) {
            return Ok(ResourceHandle { reference, object, reused });
        }
        let object = self.wait_until(&reference, &ready, wait_timeout).await?;
        tracing::info!(resource = %reference, "ready");
        Ok(ResourceHandle { reference, object, reused })
    }

    /// Poll `resource` until `ready` holds for it.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ResourceNotReadyTimeout`] with the last seen
    /// status, or [`ExecutorError::Resource`] if a fetch fails.
    pub async fn wait_until<P>(
        &self,
        resource: &ResourceRef,
        ready: &P,
        wait_timeout: Duration,
    ) -> Result<Value, ExecutorError>
    where
        P: Fn(&Value) -> bool + Send + Sync,
    {
        let last_status = Mutex::new("object not found".to_owned());
        let poller = Poller::new(self.poll_interval, wait_timeout);
        let store = &self.store;
        let last = &last_status;
        let result = poller
            .until(|| async move {
                let Some(object) = store.get(resource).await? else {
                    return Ok(None);
                };
                if ready(&object) {
                    return Ok(Some(object));
                }
                if let Ok(mut seen) = last.lock() {
                    *seen = object.get("status").map_or_else(|| "none".to_owned(), Value::to_string);
                }
                Ok::<_, ExecutorError>(None)
            })
            .await;
        let last_status = last_status.into_inner().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(object) => Ok(object),
            Err(PollError::DeadlineExceeded { waited, .. }) => {
                tracing::warn!(resource = %resource, waited_secs = waited.as_secs(), "not ready before deadline");
                Err(ExecutorError::ResourceNotReadyTimeout { resource: resource.clone(), waited, last_status })
            }
            Err(PollError::Sample(e)) => Err(ExecutorError::for_resource(e, resource)),
        }
    }
}

fn check_scope(kind: ResourceKind, namespace: Option<&str>) -> Result<(), ExecutorError> {
    if !kind.is_cluster_object() {
        return Err(ExecutorError::InvalidRequest(format!("{kind} objects are created through their provider")));
    }
    match (kind.is_namespaced(), namespace) {
        (true, None) => Err(ExecutorError::InvalidRequest(format!("{kind} requires a namespace"))),
        (false, Some(ns)) => Err(ExecutorError::InvalidRequest(format!(
            "{kind} is cluster-scoped but namespace '{ns}' was given"
        ))),
        (true, Some(ns)) => Ok(validate_name(ns)?),
        (false, None) => Ok(()),
    }
}

/// Add `apiVersion`, `kind`, `metadata.name`, `metadata.namespace` and the
/// session label to `fields`. Nothing else is added.
fn stamp_identity(mut fields: Map<String, Value>, reference: &ResourceRef, ctx: &ExecutionContext) -> Value {
    if let Some(api_version) = reference.kind.api_version() {
        fields.insert("apiVersion".to_owned(), Value::from(api_version));
    }
    fields.insert("kind".to_owned(), Value::from(reference.kind.object_kind()));

    let metadata = fields.entry("metadata").or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    if let Some(meta) = metadata.as_object_mut() {
        meta.insert("name".to_owned(), Value::from(reference.name.as_str()));
        if let Some(ns) = &reference.namespace {
            meta.insert("namespace".to_owned(), Value::from(ns.as_str()));
        }
        let labels = meta.entry("labels").or_insert_with(|| Value::Object(Map::new()));
        if let Some(labels) = labels.as_object_mut() {
            labels.insert(SESSION_LABEL.to_owned(), Value::from(ctx.session().as_str()));
        }
    }
    Value::Object(fields)
}

/// Stock readiness predicates.
pub mod readiness {
    use serde_json::Value;

    use crate::store::{conditions, field};

    /// Ready as soon as the object exists.
    #[must_use]
    pub fn always() -> impl Fn(&Value) -> bool + Send + Sync + Copy {
        |_| true
    }

    /// A `status.conditions[]` entry of `condition_type` has status `"True"`.
    #[must_use]
    pub fn condition_true(condition_type: &'static str) -> impl Fn(&Value) -> bool + Send + Sync + Copy {
        move |object| conditions(object).any(|(kind, status, _)| kind == condition_type && status == "True")
    }

    /// `status.phase` equals `phase`.
    #[must_use]
    pub fn phase_is(phase: &'static str) -> impl Fn(&Value) -> bool + Send + Sync + Copy {
        move |object| field(object, "status.phase").and_then(Value::as_str) == Some(phase)
    }
}
