//! Object store backed by `kubectl proxy --unix-socket`.
//!
//! The proxy handles authentication against the cluster, so the store only
//! has to speak plain HTTP/1.1 to a local Unix socket. hyper over tokio's
//! `UnixStream` does that without pulling in a full client.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::UnixStream;
use vmigrate_core::{ResourceKind, ResourceRef};

use crate::store::ObjectStore;
use crate::ExecutorError;

/// [`ObjectStore`] speaking to the cluster API through a local proxy socket.
#[derive(Debug, Clone)]
pub struct ProxyStore {
    socket_path: PathBuf,
}

impl ProxyStore {
    /// Create a store for the proxy listening on `socket_path`.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into() }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn request(
        &self,
        method: Method,
        uri_path: &str,
        body: Option<String>,
    ) -> Result<(StatusCode, String), ExecutorError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| ExecutorError::Api(format!("connect to {}: {e}", self.socket_path.display())))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ExecutorError::Api(format!("HTTP handshake: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("proxy connection closed: {e}");
            }
        });

        let uri: Uri = uri_path
            .parse()
            .map_err(|e| ExecutorError::Api(format!("invalid URI path {uri_path}: {e}")))?;
        let body_bytes = body.map(Bytes::from).unwrap_or_default();

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header("Host", "localhost")
            .header("Accept", "application/json");
        if !body_bytes.is_empty() {
            builder = builder
                .header("Content-Type", "application/json")
                .header("Content-Length", body_bytes.len().to_string());
        }
        let req = builder
            .body(Full::new(body_bytes))
            .map_err(|e| ExecutorError::Api(format!("build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ExecutorError::Api(format!("send {method} {uri_path}: {e}")))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ExecutorError::Api(format!("read response body: {e}")))?
            .to_bytes();

        tracing::debug!(%method, path = uri_path, %status, "proxy request");
        Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Plural resource segment used in API paths.
fn plural(kind: ResourceKind) -> Option<&'static str> {
    let plural = match kind {
        ResourceKind::Namespace => "namespaces",
        ResourceKind::Secret => "secrets",
        ResourceKind::NetworkAttachmentDefinition => "network-attachment-definitions",
        ResourceKind::Provider => "providers",
        ResourceKind::Host => "hosts",
        ResourceKind::NetworkMap => "networkmaps",
        ResourceKind::StorageMap => "storagemaps",
        ResourceKind::Hook => "hooks",
        ResourceKind::Plan => "plans",
        ResourceKind::Migration => "migrations",
        ResourceKind::VirtualMachine => "virtualmachines",
        _ => return None,
    };
    Some(plural)
}

/// Path of the collection `resource` belongs to.
fn collection_path(resource: &ResourceRef) -> Result<String, ExecutorError> {
    let (Some(api_version), Some(plural)) = (resource.kind.api_version(), plural(resource.kind)) else {
        return Err(ExecutorError::InvalidRequest(format!("{} is not a cluster object", resource.kind)));
    };
    let prefix = if api_version.contains('/') { "apis" } else { "api" };
    match (&resource.namespace, resource.kind.is_namespaced()) {
        (Some(ns), true) => Ok(format!("/{prefix}/{api_version}/namespaces/{ns}/{plural}")),
        (None, false) => Ok(format!("/{prefix}/{api_version}/{plural}")),
        (None, true) => Err(ExecutorError::InvalidRequest(format!("{resource} requires a namespace"))),
        (Some(_), false) => Err(ExecutorError::InvalidRequest(format!("{} is cluster-scoped", resource.kind))),
    }
}

fn object_path(resource: &ResourceRef) -> Result<String, ExecutorError> {
    Ok(format!("{}/{}", collection_path(resource)?, resource.name))
}

fn unexpected(resource: &ResourceRef, status: StatusCode, body: &str) -> ExecutorError {
    ExecutorError::Resource {
        resource: resource.clone(),
        source: Box::new(ExecutorError::Api(format!("HTTP {status}: {body}"))),
    }
}

#[async_trait]
impl ObjectStore for ProxyStore {
    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>, ExecutorError> {
        let (status, body) = self.request(Method::GET, &object_path(resource)?, None).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(serde_json::from_str(&body)?)),
            s => Err(unexpected(resource, s, &body)),
        }
    }

    async fn create(&self, resource: &ResourceRef, body: &Value) -> Result<Value, ExecutorError> {
        let path = collection_path(resource)?;
        let (status, text) = self.request(Method::POST, &path, Some(body.to_string())).await?;
        match status {
            StatusCode::CONFLICT => Err(ExecutorError::Conflict { resource: resource.clone() }),
            s if s.is_success() => Ok(serde_json::from_str(&text)?),
            s => Err(unexpected(resource, s, &text)),
        }
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<bool, ExecutorError> {
        let (status, body) = self.request(Method::DELETE, &object_path(resource)?, None).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(unexpected(resource, s, &body)),
        }
    }
}
