//! Object-store abstraction.
//!
//! The orchestration layer only ever needs three verbs against the remote
//! object API, so backends (in-memory, `kubectl proxy`) are interchangeable
//! without touching the creator, the migration loop or teardown.

use async_trait::async_trait;
use serde_json::Value;
use vmigrate_core::ResourceRef;

use crate::ExecutorError;

/// Typed create/get/delete of named objects.
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Cancel Safety
/// Every method is a single request; dropping the future leaves at most that
/// one request in flight.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, including its `status`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Api`] on transport or server errors. A missing
    /// object is `Ok(None)`, not an error.
    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>, ExecutorError>;

    /// Create an object from a complete body and return what the store holds.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Conflict`] if an object with the same identity
    /// already exists, [`ExecutorError::Api`] on any other failure.
    async fn create(&self, resource: &ResourceRef, body: &Value) -> Result<Value, ExecutorError>;

    /// Request deletion. Returns `false` if the object was already gone.
    ///
    /// Deletion may complete asynchronously; callers that need the object gone
    /// poll [`ObjectStore::get`] afterwards.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Api`] if the store refused the request.
    async fn delete(&self, resource: &ResourceRef) -> Result<bool, ExecutorError>;
}

/// Read a dotted path (`status.phase`) out of a JSON object.
#[must_use]
pub fn field<'a>(object: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(object, |value, key| value.get(key))
}

/// `status.conditions[]` entries as `(type, status, message)`.
pub fn conditions(object: &Value) -> impl Iterator<Item = (&str, &str, &str)> {
    field(object, "status.conditions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|c| {
            let kind = c.get("type")?.as_str()?;
            let status = c.get("status").and_then(Value::as_str).unwrap_or_default();
            let message = c.get("message").and_then(Value::as_str).unwrap_or_default();
            Some((kind, status, message))
        })
}
