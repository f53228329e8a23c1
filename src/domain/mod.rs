//! Machine definitions as handed to the monitor.
//!
//! These are already validated by whoever produced them; the monitor only
//! reads the subset the VMM needs. The serde forms exist so a definition can
//! be handed over as JSON.

use std::{fmt, net::IpAddr, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod instance;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineDef {
    pub name: String,
    /// Overrides the configured VMM binary for this machine only.
    #[serde(default)]
    pub emulator: Option<PathBuf>,
    #[serde(default)]
    pub vcpus: Vec<VcpuDef>,
    /// Initial memory in KiB.
    #[serde(default)]
    pub memory_kib: u64,
    #[serde(default)]
    pub os: OsDef,
    #[serde(default)]
    pub disks: Vec<DiskDef>,
    #[serde(default)]
    pub nets: Vec<NetDef>,
}

impl MachineDef {
    /// Number of vcpus the machine may ever have.
    pub fn max_vcpus(&self) -> u32 {
        saturate(self.vcpus.len())
    }

    /// Number of vcpus online at boot.
    pub fn online_vcpus(&self) -> u32 {
        saturate(self.vcpus.iter().filter(|vcpu| vcpu.online).count())
    }
}

fn saturate(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsDef {
    #[serde(default)]
    pub kernel: Option<PathBuf>,
    #[serde(default)]
    pub cmdline: Option<String>,
    #[serde(default)]
    pub initrd: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VcpuDef {
    pub online: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskDef {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub readonly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetDef {
    pub backend: NetBackend,
    /// Host side interface name.
    #[serde(default)]
    pub ifname: Option<String>,
    pub mac: MacAddr,
    #[serde(default)]
    pub virtio: Option<VirtioOptions>,
    #[serde(default)]
    pub queues: Option<u32>,
    #[serde(default)]
    pub rx_queue_size: Option<u32>,
    #[serde(default)]
    pub tx_queue_size: Option<u32>,
}

/// Where the packets of a network device go on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetBackend {
    Ethernet {
        #[serde(default)]
        guest_ips: Vec<GuestIp>,
    },
    VhostUser {
        source: ChrSource,
    },
    Bridge {
        bridge: String,
    },
    Network {
        network: String,
    },
    Direct {
        dev: String,
    },
    User,
    Server,
    Client,
    Mcast,
    Internal,
    Hostdev,
    Udp,
}

impl NetBackend {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Ethernet { .. } => "ethernet",
            Self::VhostUser { .. } => "vhostuser",
            Self::Bridge { .. } => "bridge",
            Self::Network { .. } => "network",
            Self::Direct { .. } => "direct",
            Self::User => "user",
            Self::Server => "server",
            Self::Client => "client",
            Self::Mcast => "mcast",
            Self::Internal => "internal",
            Self::Hostdev => "hostdev",
            Self::Udp => "udp",
        }
    }
}

/// Transport of a character-device style backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChrSource {
    Unix { path: PathBuf },
    Tcp { host: String, service: String },
    Udp { host: String, service: String },
    File { path: PathBuf },
    Pty,
}

impl ChrSource {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Unix { .. } => "unix",
            Self::Tcp { .. } => "tcp",
            Self::Udp { .. } => "udp",
            Self::File { .. } => "file",
            Self::Pty => "pty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestIp {
    pub address: IpAddr,
    pub prefix: u8,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VirtioOptions {
    #[serde(default)]
    pub iommu: Tristate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tristate {
    #[default]
    Absent,
    On,
    Off,
}

/// A MAC address, printed in the canonical `52:54:00:ab:cd:ef` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid MAC address '{0}'")]
pub struct ParseMacError(String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.into()))?;
            if part.is_empty() || part.len() > 2 {
                return Err(ParseMacError(s.into()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.into()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.into()));
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = ParseMacError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_is_formatted_lowercase_with_padding() {
        let mac = MacAddr([0x52, 0x54, 0x00, 0xAB, 0x0c, 0x01]);
        assert_eq!(mac.to_string(), "52:54:00:ab:0c:01");
    }

    #[test]
    fn mac_parses_mixed_case() {
        let mac: MacAddr = "52:54:00:AB:cd:EF".parse().unwrap();
        assert_eq!(mac, MacAddr([0x52, 0x54, 0x00, 0xab, 0xcd, 0xef]));
    }

    #[test]
    fn mac_rejects_wrong_length() {
        assert!("52:54:00:ab:cd".parse::<MacAddr>().is_err());
        assert!("52:54:00:ab:cd:ef:01".parse::<MacAddr>().is_err());
        assert!("52:54:00:ab:cd:xyz".parse::<MacAddr>().is_err());
    }

    #[test]
    fn vcpu_counts() {
        let def = MachineDef {
            vcpus: vec![
                VcpuDef { online: true },
                VcpuDef { online: false },
                VcpuDef { online: true },
            ],
            ..Default::default()
        };
        assert_eq!(def.max_vcpus(), 3);
        assert_eq!(def.online_vcpus(), 2);
    }

    #[test]
    fn vcpu_counts_saturate() {
        assert_eq!(saturate(7), 7);
        assert_eq!(saturate(u32::MAX as usize), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(saturate(u32::MAX as usize + 1), u32::MAX);
    }

    #[test]
    fn definition_from_json() {
        let def: MachineDef = serde_json::from_value(serde_json::json!({
            "name": "vm0",
            "vcpus": [{"online": true}],
            "memory_kib": 131072,
            "os": {"kernel": "/boot/vmlinux"},
            "nets": [{
                "backend": {"type": "vhost_user", "source": {"type": "unix", "path": "/tmp/vu.sock"}},
                "mac": "52:54:00:00:00:01"
            }]
        }))
        .unwrap();

        assert_eq!(def.name, "vm0");
        assert_eq!(def.nets[0].backend.type_name(), "vhostuser");
        assert_eq!(def.nets[0].mac.to_string(), "52:54:00:00:00:01");
        assert!(def.disks.is_empty());
    }
}
