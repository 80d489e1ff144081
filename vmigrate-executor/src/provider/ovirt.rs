use serde::{Deserialize, Serialize};
use vmigrate_core::{Capability, DiskType, PowerState, ProviderType, VmDescriptor};

use super::vsphere::parse_ips;
use super::{VendorVm, FULL_CAPABILITIES};

/// An oVirt/RHV virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvirtVm {
    pub name: String,
    /// Engine status: `up`, `down`, `powering_up`, `suspended`, ...
    pub status: String,
    /// The engine has guest agent data for the VM.
    pub guest_agent: bool,
    pub disks: Vec<OvirtDisk>,
    pub nics: Vec<OvirtNic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvirtDisk {
    pub alias: String,
    pub storage_domain: String,
    pub provisioned_size: u64,
    pub sparse: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvirtNic {
    pub vnic_profile: String,
    pub mac: String,
    pub ips: Vec<String>,
}

impl VendorVm for OvirtVm {
    const TYPE: ProviderType = ProviderType::Ovirt;
    const CAPABILITIES: &'static [Capability] = FULL_CAPABILITIES;

    fn name(&self) -> &str {
        &self.name
    }

    fn to_descriptor(&self) -> Result<VmDescriptor, String> {
        let power = match self.status.as_str() {
            "up" | "powering_up" | "reboot_in_progress" | "migrating" => PowerState::On,
            "down" | "powering_down" | "suspended" => PowerState::Off,
            other => return Err(format!("unknown VM status '{other}'")),
        };
        let mut vm = VmDescriptor::new(&self.name, Self::TYPE, power, self.guest_agent);
        for disk in &self.disks {
            let disk_type = if disk.sparse { DiskType::Thin } else { DiskType::Preallocated };
            vm = vm.with_disk(disk_type, disk.provisioned_size, format!("{}/{}", disk.storage_domain, disk.alias));
        }
        for nic in &self.nics {
            vm = vm.with_nic(&nic.vnic_profile, &nic.mac, parse_ips(&nic.ips)?);
        }
        Ok(vm)
    }

    fn renamed(&self, name: &str) -> Self {
        Self { name: name.to_owned(), ..self.clone() }
    }

    fn powered(&self, state: PowerState) -> Self {
        let status = match state {
            PowerState::On => "up",
            PowerState::Off => "down",
        };
        Self { status: status.to_owned(), ..self.clone() }
    }
}
