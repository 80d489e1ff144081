use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vmigrate_core::{Capability, DiskType, PowerState, ProviderType, VmDescriptor};

use super::vsphere::parse_ips;
use super::{VendorVm, FULL_CAPABILITIES};

/// A Nova server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenstackServer {
    pub name: String,
    /// `ACTIVE`, `SHUTOFF`, ...
    pub status: String,
    /// Image/server metadata; `hw_qemu_guest_agent=yes` marks the agent.
    pub metadata: BTreeMap<String, String>,
    pub volumes: Vec<OpenstackVolume>,
    /// Addresses keyed by network name, as in the server's `addresses` field.
    pub addresses: BTreeMap<String, Vec<OpenstackAddress>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenstackVolume {
    pub id: String,
    pub size_gb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenstackAddress {
    pub addr: String,
    #[serde(rename = "OS-EXT-IPS-MAC:mac_addr")]
    pub mac: String,
    /// `fixed` or `floating`.
    #[serde(rename = "OS-EXT-IPS:type")]
    pub kind: String,
}

impl VendorVm for OpenstackServer {
    const TYPE: ProviderType = ProviderType::Openstack;
    const CAPABILITIES: &'static [Capability] = FULL_CAPABILITIES;

    fn name(&self) -> &str {
        &self.name
    }

    fn to_descriptor(&self) -> Result<VmDescriptor, String> {
        let power = match self.status.as_str() {
            "ACTIVE" => PowerState::On,
            "SHUTOFF" => PowerState::Off,
            other => return Err(format!("server status '{other}' is neither ACTIVE nor SHUTOFF")),
        };
        let agent = self.metadata.get("hw_qemu_guest_agent").is_some_and(|v| v == "yes");
        let mut vm = VmDescriptor::new(&self.name, Self::TYPE, power, agent);
        for volume in &self.volumes {
            vm = vm.with_disk(DiskType::Thin, volume.size_gb.saturating_mul(1 << 30), &volume.id);
        }
        // One NIC per (network, MAC); floating addresses are NAT and not
        // configured in the guest.
        for (network, addresses) in &self.addresses {
            let mut by_mac: BTreeMap<&str, Vec<String>> = BTreeMap::new();
            for address in addresses {
                let fixed = by_mac.entry(address.mac.as_str()).or_default();
                if address.kind == "fixed" {
                    fixed.push(address.addr.clone());
                }
            }
            for (mac, fixed) in by_mac {
                vm = vm.with_nic(network, mac, parse_ips(&fixed)?);
            }
        }
        Ok(vm)
    }

    fn renamed(&self, name: &str) -> Self {
        Self { name: name.to_owned(), ..self.clone() }
    }

    fn powered(&self, state: PowerState) -> Self {
        let status = match state {
            PowerState::On => "ACTIVE",
            PowerState::Off => "SHUTOFF",
        };
        Self { status: status.to_owned(), ..self.clone() }
    }
}
