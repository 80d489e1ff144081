//! Provider-neutral VM description.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Source virtualization backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ProviderType {
    Vsphere,
    Ovirt,
    Openstack,
    Ova,
    /// The destination platform itself acting as a source.
    Openshift,
}

impl ProviderType {
    /// Lowercase identifier used in names and tracking files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vsphere => "vsphere",
            Self::Ovirt => "ovirt",
            Self::Openstack => "openstack",
            Self::Ova => "ova",
            Self::Openshift => "openshift",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vsphere" => Ok(Self::Vsphere),
            "ovirt" => Ok(Self::Ovirt),
            "openstack" => Ok(Self::Openstack),
            "ova" => Ok(Self::Ova),
            "openshift" => Ok(Self::Openshift),
            other => Err(format!("unknown provider type '{other}'")),
        }
    }
}

/// Power state of a VM, both as observed and as requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("on"),
            Self::Off => f.write_str("off"),
        }
    }
}

/// Disk provisioning type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    Thin,
    Thick,
    Preallocated,
}

/// Operations a provider variant supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Inventory,
    Clone,
    PowerControl,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inventory => f.write_str("inventory"),
            Self::Clone => f.write_str("clone"),
            Self::PowerControl => f.write_str("power control"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct DiskDescriptor {
    pub disk_type: DiskType,
    pub size_bytes: u64,
    /// Backend-specific location (datastore path, volume id, file name).
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct NicDescriptor {
    /// Source network the NIC is attached to.
    pub network: String,
    pub mac: String,
    /// Static addresses; empty when the guest uses DHCP or reports nothing.
    pub ip_addresses: Vec<IpAddr>,
}

/// Unified view of a source VM, whatever backend it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VmDescriptor {
    pub name: String,
    pub provider: ProviderType,
    pub power_state: PowerState,
    pub disks: Vec<DiskDescriptor>,
    pub nics: Vec<NicDescriptor>,
    pub guest_agent: bool,
}

impl VmDescriptor {
    /// Create a descriptor with no disks or NICs.
    pub fn new(name: impl Into<String>, provider: ProviderType, power_state: PowerState, guest_agent: bool) -> Self {
        Self { name: name.into(), provider, power_state, disks: Vec::new(), nics: Vec::new(), guest_agent }
    }

    /// Attach a disk.
    #[must_use]
    pub fn with_disk(mut self, disk_type: DiskType, size_bytes: u64, path: impl Into<String>) -> Self {
        self.disks.push(DiskDescriptor { disk_type, size_bytes, path: path.into() });
        self
    }

    /// Attach a NIC.
    #[must_use]
    pub fn with_nic(mut self, network: impl Into<String>, mac: impl Into<String>, ip_addresses: Vec<IpAddr>) -> Self {
        self.nics.push(NicDescriptor { network: network.into(), mac: mac.into(), ip_addresses });
        self
    }
}
