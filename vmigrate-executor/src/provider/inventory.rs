use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use vmigrate_core::{Capability, PowerState};

use super::{VendorApi, VendorVm};
use crate::ExecutorError;

#[derive(Debug)]
struct Inventory<V> {
    vms: BTreeMap<String, V>,
    reject_logins: bool,
    power_calls: Vec<(String, PowerState)>,
}

/// [`VendorApi`] over an in-process VM list, for dry runs and tests.
///
/// Honours the capability set of `V`: cloning an inventory-only backend's VM
/// fails the same way the real backend would.
#[derive(Debug)]
pub struct InMemoryInventory<V> {
    inner: Mutex<Inventory<V>>,
}

impl<V: VendorVm> InMemoryInventory<V> {
    #[must_use]
    pub fn new(vms: Vec<V>) -> Self {
        let vms = vms.into_iter().map(|vm| (vm.name().to_owned(), vm)).collect();
        Self { inner: Mutex::new(Inventory { vms, reject_logins: false, power_calls: Vec::new() }) }
    }

    #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
    fn lock(&self) -> MutexGuard<'_, Inventory<V>> {
        self.inner.lock().expect("inventory lock poisoned")
    }

    /// Make every subsequent login fail.
    pub fn reject_logins(&self) {
        self.lock().reject_logins = true;
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.lock().vms.contains_key(name)
    }

    /// Power requests received, in order.
    #[must_use]
    pub fn power_calls(&self) -> Vec<(String, PowerState)> {
        self.lock().power_calls.clone()
    }

    fn check(capability: Capability) -> Result<(), ExecutorError> {
        if V::CAPABILITIES.contains(&capability) {
            Ok(())
        } else {
            Err(ExecutorError::Unsupported { provider: V::TYPE, capability })
        }
    }
}

#[async_trait]
impl<V: VendorVm> VendorApi<V> for InMemoryInventory<V> {
    async fn login(&self) -> Result<(), ExecutorError> {
        if self.lock().reject_logins {
            return Err(ExecutorError::Provider { provider: V::TYPE, reason: "invalid credentials".to_owned() });
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<V>, ExecutorError> {
        Ok(self.lock().vms.values().cloned().collect())
    }

    async fn find(&self, name: &str) -> Result<Option<V>, ExecutorError> {
        Ok(self.lock().vms.get(name).cloned())
    }

    async fn clone_vm(&self, source: &V, clone_name: &str) -> Result<V, ExecutorError> {
        Self::check(Capability::Clone)?;
        let mut inventory = self.lock();
        if inventory.vms.contains_key(clone_name) {
            return Err(ExecutorError::Provider {
                provider: V::TYPE,
                reason: format!("a VM named '{clone_name}' already exists"),
            });
        }
        let clone = source.renamed(clone_name);
        inventory.vms.insert(clone_name.to_owned(), clone.clone());
        Ok(clone)
    }

    async fn set_power(&self, vm: &V, state: PowerState) -> Result<(), ExecutorError> {
        Self::check(Capability::PowerControl)?;
        let mut inventory = self.lock();
        inventory.power_calls.push((vm.name().to_owned(), state));
        let Some(current) = inventory.vms.get_mut(vm.name()) else {
            return Err(ExecutorError::VmNotFound { provider: V::TYPE, name: vm.name().to_owned() });
        };
        *current = current.powered(state);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, ExecutorError> {
        Self::check(Capability::Clone)?;
        Ok(self.lock().vms.remove(name).is_some())
    }
}
