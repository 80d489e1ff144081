use serde::{Deserialize, Serialize};
use vmigrate_core::{Capability, DiskType, PowerState, ProviderType, VmDescriptor};

use super::vsphere::parse_ips;
use super::{VendorVm, FULL_CAPABILITIES};

/// A KubeVirt `VirtualMachine` on the destination platform used as a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtVm {
    pub name: String,
    pub namespace: String,
    /// `status.printableStatus`: `Running`, `Stopped`, `Provisioning`, ...
    pub printable_status: String,
    pub agent_connected: bool,
    pub volumes: Vec<KubevirtVolume>,
    pub interfaces: Vec<KubevirtInterface>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtVolume {
    pub claim_name: String,
    pub size_bytes: u64,
    /// The DataVolume was created with `preallocation: true`.
    pub preallocated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtInterface {
    pub network: String,
    pub mac: String,
    pub ip_addresses: Vec<String>,
}

impl VendorVm for KubevirtVm {
    const TYPE: ProviderType = ProviderType::Openshift;
    const CAPABILITIES: &'static [Capability] = FULL_CAPABILITIES;

    fn name(&self) -> &str {
        &self.name
    }

    fn to_descriptor(&self) -> Result<VmDescriptor, String> {
        let power = match self.printable_status.as_str() {
            "Running" | "Migrating" => PowerState::On,
            "Stopped" | "Paused" => PowerState::Off,
            other => return Err(format!("VM is in transient status '{other}'")),
        };
        let mut vm = VmDescriptor::new(&self.name, Self::TYPE, power, self.agent_connected);
        for volume in &self.volumes {
            let disk_type = if volume.preallocated { DiskType::Preallocated } else { DiskType::Thin };
            vm = vm.with_disk(disk_type, volume.size_bytes, format!("{}/{}", self.namespace, volume.claim_name));
        }
        for iface in &self.interfaces {
            vm = vm.with_nic(&iface.network, &iface.mac, parse_ips(&iface.ip_addresses)?);
        }
        Ok(vm)
    }

    fn renamed(&self, name: &str) -> Self {
        Self { name: name.to_owned(), ..self.clone() }
    }

    fn powered(&self, state: PowerState) -> Self {
        let status = match state {
            PowerState::On => "Running",
            PowerState::Off => "Stopped",
        };
        Self { printable_status: status.to_owned(), ..self.clone() }
    }
}
