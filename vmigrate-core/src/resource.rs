use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::SessionId;
use crate::vm::ProviderType;

const FORKLIFT: &str = "forklift.konveyor.io/v1beta1";

/// The kinds of objects a session creates and later tears down.
///
/// Cluster kinds live in the object store; [`ResourceKind::ClonedVm`] lives on
/// the source provider and is deleted through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[non_exhaustive]
pub enum ResourceKind {
    Namespace,
    Secret,
    NetworkAttachmentDefinition,
    Provider,
    Host,
    NetworkMap,
    StorageMap,
    Hook,
    Plan,
    Migration,
    VirtualMachine,
    /// A VM cloned on a source provider for this session.
    ClonedVm(ProviderType),
}

impl ResourceKind {
    /// `apiVersion` of the cluster object, `None` for provider-side kinds.
    #[must_use]
    pub fn api_version(self) -> Option<&'static str> {
        match self {
            Self::Namespace | Self::Secret => Some("v1"),
            Self::NetworkAttachmentDefinition => Some("k8s.cni.cncf.io/v1"),
            Self::Provider
            | Self::Host
            | Self::NetworkMap
            | Self::StorageMap
            | Self::Hook
            | Self::Plan
            | Self::Migration => Some(FORKLIFT),
            Self::VirtualMachine => Some("kubevirt.io/v1"),
            Self::ClonedVm(_) => None,
        }
    }

    /// Whether objects of this kind require a namespace.
    #[must_use]
    pub fn is_namespaced(self) -> bool {
        !matches!(self, Self::Namespace | Self::ClonedVm(_))
    }

    /// Whether the object lives in the cluster object store.
    #[must_use]
    pub fn is_cluster_object(self) -> bool {
        !matches!(self, Self::ClonedVm(_))
    }

    /// The object `kind` string as the API server spells it.
    #[must_use]
    pub fn object_kind(self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Secret => "Secret",
            Self::NetworkAttachmentDefinition => "NetworkAttachmentDefinition",
            Self::Provider => "Provider",
            Self::Host => "Host",
            Self::NetworkMap => "NetworkMap",
            Self::StorageMap => "StorageMap",
            Self::Hook => "Hook",
            Self::Plan => "Plan",
            Self::Migration => "Migration",
            Self::VirtualMachine => "VirtualMachine",
            Self::ClonedVm(_) => "ClonedVm",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClonedVm(provider) => write!(f, "ClonedVm:{provider}"),
            other => f.write_str(other.object_kind()),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(provider) = s.strip_prefix("ClonedVm:") {
            let provider = provider
                .parse::<ProviderType>()
                .map_err(|_| CoreError::UnknownResourceKind(s.to_owned()))?;
            return Ok(Self::ClonedVm(provider));
        }
        let kind = match s {
            "Namespace" => Self::Namespace,
            "Secret" => Self::Secret,
            "NetworkAttachmentDefinition" => Self::NetworkAttachmentDefinition,
            "Provider" => Self::Provider,
            "Host" => Self::Host,
            "NetworkMap" => Self::NetworkMap,
            "StorageMap" => Self::StorageMap,
            "Hook" => Self::Hook,
            "Plan" => Self::Plan,
            "Migration" => Self::Migration,
            "VirtualMachine" => Self::VirtualMachine,
            other => return Err(CoreError::UnknownResourceKind(other.to_owned())),
        };
        Ok(kind)
    }
}

impl TryFrom<String> for ResourceKind {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceKind> for String {
    fn from(kind: ResourceKind) -> Self {
        kind.to_string()
    }
}

/// Identity of one object: kind, name and (for namespaced kinds) namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceRef {
    /// Creates a reference from its parts.
    pub fn new(kind: ResourceKind, name: impl Into<String>, namespace: Option<String>) -> Self {
        Self { kind, name: name.into(), namespace }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {ns}/{}", self.kind, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A created object tracked for teardown.
///
/// Records are immutable once registered in an execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ResourceRecord {
    /// Identity of the tracked object.
    pub resource: ResourceRef,
    /// Session that created (or adopted) the object.
    pub session: SessionId,
    /// When the object was confirmed to exist.
    pub created_at: DateTime<Utc>,
    /// Object this one was created on behalf of, if any.
    pub parent: Option<ResourceRef>,
}

impl ResourceRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(resource: ResourceRef, session: SessionId, parent: Option<ResourceRef>) -> Self {
        Self { resource, session, created_at: Utc::now(), parent }
    }
}
