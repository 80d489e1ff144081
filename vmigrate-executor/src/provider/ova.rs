use serde::{Deserialize, Serialize};
use vmigrate_core::{Capability, DiskType, PowerState, ProviderType, VmDescriptor};

use super::VendorVm;

/// A VM packaged as an OVA file. Appliances on disk are never running and
/// cannot be cloned or powered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvaAppliance {
    pub name: String,
    pub file_path: String,
    pub disks: Vec<OvaDisk>,
    pub nics: Vec<OvaNic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvaDisk {
    /// File reference inside the archive.
    pub href: String,
    pub capacity_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvaNic {
    pub network: String,
    /// OVF descriptors may omit the address.
    pub mac: Option<String>,
}

impl VendorVm for OvaAppliance {
    const TYPE: ProviderType = ProviderType::Ova;
    const CAPABILITIES: &'static [Capability] = &[Capability::Inventory];

    fn name(&self) -> &str {
        &self.name
    }

    fn to_descriptor(&self) -> Result<VmDescriptor, String> {
        let mut vm = VmDescriptor::new(&self.name, Self::TYPE, PowerState::Off, false);
        for disk in &self.disks {
            vm = vm.with_disk(DiskType::Thin, disk.capacity_bytes, format!("{}/{}", self.file_path, disk.href));
        }
        for nic in &self.nics {
            vm = vm.with_nic(&nic.network, nic.mac.clone().unwrap_or_default(), Vec::new());
        }
        Ok(vm)
    }

    fn renamed(&self, name: &str) -> Self {
        Self { name: name.to_owned(), ..self.clone() }
    }

    fn powered(&self, _state: PowerState) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vmigrate_core::SessionId;

    use super::*;
    use crate::provider::{InMemoryInventory, VendorProvider};
    use crate::{ExecutionContext, ExecutorError};

    fn appliance() -> OvaAppliance {
        OvaAppliance {
            name: "legacy-app".to_owned(),
            file_path: "/exports/legacy-app.ova".to_owned(),
            disks: vec![
                OvaDisk { href: "disk1.vmdk".to_owned(), capacity_bytes: 8 << 30 },
                OvaDisk { href: "disk2.vmdk".to_owned(), capacity_bytes: 1 << 30 },
            ],
            nics: vec![
                OvaNic { network: "VM Network".to_owned(), mac: Some("00:50:56:00:00:07".to_owned()) },
                OvaNic { network: "backup".to_owned(), mac: None },
            ],
        }
    }

    #[test]
    fn disks_point_into_the_archive() {
        let descriptor = match appliance().to_descriptor() {
            Ok(d) => d,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(descriptor.provider, ProviderType::Ova);
        assert_eq!(descriptor.power_state, PowerState::Off);
        assert!(!descriptor.guest_agent);
        assert_eq!(descriptor.disks.len(), 2);
        assert_eq!(descriptor.disks[0].path, "/exports/legacy-app.ova/disk1.vmdk");
        assert_eq!(descriptor.disks[0].disk_type, DiskType::Thin);
        assert_eq!(descriptor.disks[1].size_bytes, 1 << 30);
    }

    #[test]
    fn nics_without_mac_get_an_empty_one() {
        let descriptor = match appliance().to_descriptor() {
            Ok(d) => d,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(descriptor.nics[0].mac, "00:50:56:00:00:07");
        assert_eq!(descriptor.nics[1].network, "backup");
        assert!(descriptor.nics[1].mac.is_empty());
        assert!(descriptor.nics.iter().all(|n| n.ip_addresses.is_empty()));
    }

    #[test]
    fn power_changes_are_ignored() {
        assert_eq!(appliance().powered(PowerState::On), appliance());
        assert!(!OvaAppliance::CAPABILITIES.contains(&Capability::Clone));
        assert!(!OvaAppliance::CAPABILITIES.contains(&Capability::PowerControl));
    }

    #[tokio::test]
    async fn clone_is_unsupported() {
        let inventory = Arc::new(InMemoryInventory::new(vec![appliance()]));
        let provider = VendorProvider::new("nfs://exports", inventory.clone());
        if let Err(e) = provider.connect().await {
            panic!("unexpected error: {e}");
        }
        let mut ctx = match SessionId::new("ova01") {
            Ok(s) => ExecutionContext::new(s),
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert!(matches!(
            provider.clone_vm(&mut ctx, "legacy-app").await,
            Err(ExecutorError::Unsupported { provider: ProviderType::Ova, capability: Capability::Clone })
        ));
        assert!(matches!(
            provider.delete_vm("legacy-app").await,
            Err(ExecutorError::Unsupported { capability: Capability::Clone, .. })
        ));
        assert!(ctx.records().is_empty(), "a refused clone must not be tracked");
        assert!(inventory.contains("legacy-app"));
    }
}
