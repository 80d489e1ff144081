//! Source provider abstraction.
//!
//! Each backend family has its own raw VM representation (a vSphere managed
//! object, an oVirt VM, a Nova server, an OVF appliance, a KubeVirt VM) and
//! its own wire client. [`VendorProvider`] wraps one of each behind a common
//! set of capability calls that return [`VmDescriptor`]s, and
//! [`SourceProvider`] is the closed set of variants the orchestrator matches
//! on.

mod inventory;
mod native;
mod openstack;
mod ova;
mod ovirt;
mod vsphere;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use vmigrate_core::{Capability, PowerState, ProviderType, ResourceKind, ResourceRecord, ResourceRef, VmDescriptor};

pub use inventory::InMemoryInventory;
pub use native::{KubevirtInterface, KubevirtVm, KubevirtVolume};
pub use openstack::{OpenstackAddress, OpenstackServer, OpenstackVolume};
pub use ova::{OvaAppliance, OvaDisk, OvaNic};
pub use ovirt::{OvirtDisk, OvirtNic, OvirtVm};
pub use vsphere::{VsphereDisk, VsphereNic, VsphereVm};

use crate::{ExecutionContext, ExecutorError};

/// Capability set of backends that can inventory, clone and power VMs.
pub const FULL_CAPABILITIES: &[Capability] = &[Capability::Inventory, Capability::Clone, Capability::PowerControl];

/// A backend's own VM representation.
pub trait VendorVm: Clone + Send + Sync + 'static {
    const TYPE: ProviderType;
    const CAPABILITIES: &'static [Capability];

    fn name(&self) -> &str;

    /// Translate into the provider-neutral descriptor.
    ///
    /// # Errors
    /// Returns a reason string when the backend reports a value with no
    /// descriptor equivalent (an unknown power state, a malformed address).
    fn to_descriptor(&self) -> Result<VmDescriptor, String>;

    /// The same VM under another name, as a backend clone would report it.
    #[must_use]
    fn renamed(&self, name: &str) -> Self;

    /// The same VM in another power state.
    #[must_use]
    fn powered(&self, state: PowerState) -> Self;
}

/// Wire client of one backend. Provider protocols are opaque to this crate:
/// implementations own authentication, sessions and retries.
///
/// Capability methods default to [`ExecutorError::Unsupported`], so an
/// inventory-only backend implements just the first four.
#[async_trait]
pub trait VendorApi<V: VendorVm>: Send + Sync {
    /// # Errors
    /// Any error is reported to the caller as [`ExecutorError::ProviderConnection`].
    async fn login(&self) -> Result<(), ExecutorError>;

    /// # Errors
    /// Logout failures are logged and otherwise ignored.
    async fn logout(&self) -> Result<(), ExecutorError>;

    /// # Errors
    /// Returns the backend's error.
    async fn list(&self) -> Result<Vec<V>, ExecutorError>;

    /// # Errors
    /// Returns the backend's error; a missing VM is `Ok(None)`.
    async fn find(&self, name: &str) -> Result<Option<V>, ExecutorError>;

    /// Clone `source` to a new VM named `clone_name`, leaving `source` untouched.
    ///
    /// # Errors
    /// Returns the backend's error.
    async fn clone_vm(&self, source: &V, clone_name: &str) -> Result<V, ExecutorError> {
        let _ = (source, clone_name);
        Err(ExecutorError::Unsupported { provider: V::TYPE, capability: Capability::Clone })
    }

    /// # Errors
    /// Returns the backend's error.
    async fn set_power(&self, vm: &V, state: PowerState) -> Result<(), ExecutorError> {
        let _ = (vm, state);
        Err(ExecutorError::Unsupported { provider: V::TYPE, capability: Capability::PowerControl })
    }

    /// Delete a VM. Returns `false` if it was already gone.
    ///
    /// # Errors
    /// Returns the backend's error.
    async fn delete(&self, name: &str) -> Result<bool, ExecutorError> {
        let _ = name;
        Err(ExecutorError::Unsupported { provider: V::TYPE, capability: Capability::Clone })
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    connected: bool,
    cache: BTreeMap<String, VmDescriptor>,
}

/// Connection state, capability checks and descriptor cache around one
/// backend's [`VendorApi`].
pub struct VendorProvider<V: VendorVm> {
    endpoint: String,
    api: Arc<dyn VendorApi<V>>,
    state: Mutex<ConnectionState>,
}

impl<V: VendorVm> VendorProvider<V> {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api: Arc<dyn VendorApi<V>>) -> Self {
        Self { endpoint: endpoint.into(), api, state: Mutex::new(ConnectionState::default()) }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// # Errors
    /// Returns [`ExecutorError::ProviderConnection`] carrying the endpoint if
    /// the login fails.
    pub async fn connect(&self) -> Result<(), ExecutorError> {
        let mut state = self.state.lock().await;
        if state.connected {
            return Ok(());
        }
        self.api.login().await.map_err(|e| self.connection_error(e.to_string()))?;
        state.connected = true;
        tracing::info!(provider = %V::TYPE, endpoint = %self.endpoint, "connected");
        Ok(())
    }

    /// Log out and drop the descriptor cache. Never fails.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if !state.connected {
            return;
        }
        if let Err(e) = self.api.logout().await {
            tracing::warn!(provider = %V::TYPE, endpoint = %self.endpoint, error = %e, "logout failed");
        }
        state.connected = false;
        state.cache.clear();
        tracing::info!(provider = %V::TYPE, endpoint = %self.endpoint, "disconnected");
    }

    /// # Errors
    /// [`ExecutorError::Unsupported`] or [`ExecutorError::ProviderConnection`].
    pub async fn list_inventory(&self) -> Result<Vec<VmDescriptor>, ExecutorError> {
        self.require(Capability::Inventory)?;
        let mut state = self.connected_state().await?;
        let raw = self.api.list().await.map_err(|e| self.provider_error(&e))?;
        let mut descriptors = Vec::with_capacity(raw.len());
        for vm in &raw {
            let descriptor = self.translate(vm)?;
            state.cache.insert(descriptor.name.clone(), descriptor.clone());
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }

    /// Descriptor of `name`, served from the cache when present.
    ///
    /// # Errors
    /// [`ExecutorError::VmNotFound`] if the backend has no such VM.
    pub async fn vm_descriptor(&self, name: &str) -> Result<VmDescriptor, ExecutorError> {
        self.require(Capability::Inventory)?;
        let mut state = self.connected_state().await?;
        if let Some(cached) = state.cache.get(name) {
            return Ok(cached.clone());
        }
        let vm = self.find(name).await?;
        let descriptor = self.translate(&vm)?;
        state.cache.insert(name.to_owned(), descriptor.clone());
        Ok(descriptor)
    }

    /// Clone `source` under a fresh session-scoped name.
    ///
    /// The clone is registered in `ctx` as a [`ResourceKind::ClonedVm`] and
    /// claimed; the source is never modified.
    ///
    /// # Errors
    /// [`ExecutorError::Unsupported`], [`ExecutorError::VmNotFound`] or the
    /// backend's error.
    pub async fn clone_vm(&self, ctx: &mut ExecutionContext, source: &str) -> Result<VmDescriptor, ExecutorError> {
        self.require(Capability::Clone)?;
        let mut state = self.connected_state().await?;
        let template = self.find(source).await?;
        let clone_name = ctx.fresh_name(source);
        let cloned = self.api.clone_vm(&template, &clone_name).await.map_err(|e| self.provider_error(&e))?;

        let reference = ResourceRef::new(ResourceKind::ClonedVm(V::TYPE), cloned.name(), None);
        ctx.register(ResourceRecord::new(reference, ctx.session().clone(), None));
        ctx.claim_vm(cloned.name());
        tracing::info!(provider = %V::TYPE, source, clone = cloned.name(), "cloned VM");

        let descriptor = self.translate(&cloned)?;
        state.cache.insert(descriptor.name.clone(), descriptor.clone());
        Ok(descriptor)
    }

    /// # Errors
    /// [`ExecutorError::Unsupported`], [`ExecutorError::VmNotFound`] or the
    /// backend's error.
    pub async fn set_power_state(&self, name: &str, power: PowerState) -> Result<(), ExecutorError> {
        self.require(Capability::PowerControl)?;
        let mut state = self.connected_state().await?;
        let vm = self.find(name).await?;
        self.api.set_power(&vm, power).await.map_err(|e| self.provider_error(&e))?;
        state.cache.remove(name);
        tracing::info!(provider = %V::TYPE, vm = name, power = %power, "set power state");
        Ok(())
    }

    /// Delete a VM this session cloned. Returns `false` if it was already gone.
    ///
    /// # Errors
    /// [`ExecutorError::Unsupported`] or the backend's error.
    pub async fn delete_vm(&self, name: &str) -> Result<bool, ExecutorError> {
        self.require(Capability::Clone)?;
        let mut state = self.connected_state().await?;
        let deleted = self.api.delete(name).await.map_err(|e| self.provider_error(&e))?;
        state.cache.remove(name);
        Ok(deleted)
    }

    fn require(&self, capability: Capability) -> Result<(), ExecutorError> {
        if V::CAPABILITIES.contains(&capability) {
            Ok(())
        } else {
            Err(ExecutorError::Unsupported { provider: V::TYPE, capability })
        }
    }

    async fn connected_state(&self) -> Result<tokio::sync::MutexGuard<'_, ConnectionState>, ExecutorError> {
        let state = self.state.lock().await;
        if state.connected {
            Ok(state)
        } else {
            Err(self.connection_error("not connected".to_owned()))
        }
    }

    async fn find(&self, name: &str) -> Result<V, ExecutorError> {
        self.api
            .find(name)
            .await
            .map_err(|e| self.provider_error(&e))?
            .ok_or_else(|| ExecutorError::VmNotFound { provider: V::TYPE, name: name.to_owned() })
    }

    fn translate(&self, vm: &V) -> Result<VmDescriptor, ExecutorError> {
        vm.to_descriptor().map_err(|reason| ExecutorError::Provider {
            provider: V::TYPE,
            reason: format!("VM '{}' at {}: {reason}", vm.name(), self.endpoint),
        })
    }

    fn connection_error(&self, reason: String) -> ExecutorError {
        ExecutorError::ProviderConnection { provider: V::TYPE, endpoint: self.endpoint.clone(), reason }
    }

    /// Backend errors that already carry provider context pass through.
    fn provider_error(&self, error: &ExecutorError) -> ExecutorError {
        match error {
            ExecutorError::Unsupported { provider, capability } => {
                ExecutorError::Unsupported { provider: *provider, capability: *capability }
            }
            ExecutorError::VmNotFound { provider, name } => {
                ExecutorError::VmNotFound { provider: *provider, name: name.clone() }
            }
            other => ExecutorError::Provider { provider: V::TYPE, reason: format!("{}: {other}", self.endpoint) },
        }
    }
}

/// The provider variants a migration can read from.
pub enum SourceProvider {
    Vsphere(VendorProvider<VsphereVm>),
    Ovirt(VendorProvider<OvirtVm>),
    Openstack(VendorProvider<OpenstackServer>),
    Ova(VendorProvider<OvaAppliance>),
    /// The destination platform acting as its own source.
    Native(VendorProvider<KubevirtVm>),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            SourceProvider::Vsphere($p) => $body,
            SourceProvider::Ovirt($p) => $body,
            SourceProvider::Openstack($p) => $body,
            SourceProvider::Ova($p) => $body,
            SourceProvider::Native($p) => $body,
        }
    };
}

impl SourceProvider {
    #[must_use]
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::Vsphere(_) => VsphereVm::TYPE,
            Self::Ovirt(_) => OvirtVm::TYPE,
            Self::Openstack(_) => OpenstackServer::TYPE,
            Self::Ova(_) => OvaAppliance::TYPE,
            Self::Native(_) => KubevirtVm::TYPE,
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Self::Vsphere(_) => VsphereVm::CAPABILITIES,
            Self::Ovirt(_) => OvirtVm::CAPABILITIES,
            Self::Openstack(_) => OpenstackServer::CAPABILITIES,
            Self::Ova(_) => OvaAppliance::CAPABILITIES,
            Self::Native(_) => KubevirtVm::CAPABILITIES,
        }
    }

    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        dispatch!(self, p => p.endpoint())
    }

    /// # Errors
    /// [`ExecutorError::ProviderConnection`] if the login fails.
    pub async fn connect(&self) -> Result<(), ExecutorError> {
        dispatch!(self, p => p.connect().await)
    }

    pub async fn disconnect(&self) {
        dispatch!(self, p => p.disconnect().await);
    }

    /// # Errors
    /// See [`VendorProvider::list_inventory`].
    pub async fn list_inventory(&self) -> Result<Vec<VmDescriptor>, ExecutorError> {
        dispatch!(self, p => p.list_inventory().await)
    }

    /// Resolve the VM a plan entry migrates.
    ///
    /// With `clone_requested` the result describes a new session-scoped clone
    /// of `name`; otherwise it describes `name` itself. Either way the VM is
    /// claimed in `ctx`.
    ///
    /// # Errors
    /// See [`VendorProvider::vm_descriptor`] and [`VendorProvider::clone_vm`].
    pub async fn vm_descriptor(
        &self,
        ctx: &mut ExecutionContext,
        name: &str,
        clone_requested: bool,
    ) -> Result<VmDescriptor, ExecutorError> {
        if clone_requested {
            return self.clone_vm(ctx, name).await;
        }
        let descriptor = dispatch!(self, p => p.vm_descriptor(name).await)?;
        ctx.claim_vm(name);
        Ok(descriptor)
    }

    /// # Errors
    /// See [`VendorProvider::clone_vm`].
    pub async fn clone_vm(&self, ctx: &mut ExecutionContext, source: &str) -> Result<VmDescriptor, ExecutorError> {
        dispatch!(self, p => p.clone_vm(ctx, source).await)
    }

    /// # Errors
    /// See [`VendorProvider::set_power_state`].
    pub async fn set_power_state(&self, name: &str, power: PowerState) -> Result<(), ExecutorError> {
        dispatch!(self, p => p.set_power_state(name, power).await)
    }

    /// # Errors
    /// See [`VendorProvider::delete_vm`].
    pub async fn delete_vm(&self, name: &str) -> Result<bool, ExecutorError> {
        dispatch!(self, p => p.delete_vm(name).await)
    }
}
