use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use vmigrate_core::{Capability, DiskType, PowerState, ProviderType, VmDescriptor};

use super::{VendorVm, FULL_CAPABILITIES};

/// A vSphere virtual machine as the inventory reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsphereVm {
    pub name: String,
    /// `runtime.powerState`: `poweredOn`, `poweredOff` or `suspended`.
    pub power_state: String,
    /// VMware Tools running in the guest.
    pub tools_running: bool,
    pub disks: Vec<VsphereDisk>,
    pub nics: Vec<VsphereNic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsphereDisk {
    /// Datastore path, e.g. `[datastore1] vm/vm.vmdk`.
    pub file_name: String,
    pub capacity_in_kb: u64,
    pub thin_provisioned: bool,
    /// Eager-zeroed thick.
    pub eagerly_scrub: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsphereNic {
    pub network: String,
    pub mac_address: String,
    pub ip_addresses: Vec<String>,
}

impl VendorVm for VsphereVm {
    const TYPE: ProviderType = ProviderType::Vsphere;
    const CAPABILITIES: &'static [Capability] = FULL_CAPABILITIES;

    fn name(&self) -> &str {
        &self.name
    }

    fn to_descriptor(&self) -> Result<VmDescriptor, String> {
        let power = match self.power_state.as_str() {
            "poweredOn" => PowerState::On,
            "poweredOff" | "suspended" => PowerState::Off,
            other => return Err(format!("unknown power state '{other}'")),
        };
        let mut vm = VmDescriptor::new(&self.name, Self::TYPE, power, self.tools_running);
        for disk in &self.disks {
            let disk_type = match (disk.thin_provisioned, disk.eagerly_scrub) {
                (true, _) => DiskType::Thin,
                (false, true) => DiskType::Preallocated,
                (false, false) => DiskType::Thick,
            };
            vm = vm.with_disk(disk_type, disk.capacity_in_kb.saturating_mul(1024), &disk.file_name);
        }
        for nic in &self.nics {
            vm = vm.with_nic(&nic.network, &nic.mac_address, parse_ips(&nic.ip_addresses)?);
        }
        Ok(vm)
    }

    fn renamed(&self, name: &str) -> Self {
        Self { name: name.to_owned(), ..self.clone() }
    }

    fn powered(&self, state: PowerState) -> Self {
        let power_state = match state {
            PowerState::On => "poweredOn",
            PowerState::Off => "poweredOff",
        };
        Self { power_state: power_state.to_owned(), ..self.clone() }
    }
}

/// Parse reported addresses, skipping IPv6 link-local ones the guest
/// configures by itself.
pub(super) fn parse_ips(raw: &[String]) -> Result<Vec<IpAddr>, String> {
    let mut ips = Vec::with_capacity(raw.len());
    for text in raw {
        let ip: IpAddr = text.parse().map_err(|e| format!("bad IP address '{text}': {e}"))?;
        if let IpAddr::V6(v6) = ip {
            if v6.segments()[0] & 0xffc0 == 0xfe80 {
                continue;
            }
        }
        ips.push(ip);
    }
    Ok(ips)
}
