//! Translation of network devices into the `net` entries of a VM config.

use std::net::Ipv4Addr;

use crate::{
    domain::{ChrSource, NetBackend, NetDef, Tristate},
    error::ConfigError,
    vm::models::NetConfig,
};

/// Turns an IPv4 prefix length into a dotted netmask.
pub fn prefix_to_netmask(prefix: u8) -> Result<Ipv4Addr, ConfigError> {
    match prefix {
        0 => Ok(Ipv4Addr::UNSPECIFIED),
        1..=32 => Ok(Ipv4Addr::from(u32::MAX << (32 - u32::from(prefix)))),
        _ => Err(ConfigError::InvalidPrefix(prefix)),
    }
}

pub fn build_net(net: &NetDef) -> Result<NetConfig, ConfigError> {
    let mut config = NetConfig::new(net.mac);

    match &net.backend {
        NetBackend::Ethernet { guest_ips } => {
            // Only a single guest address can be handed to the VMM.
            if let [ip] = guest_ips.as_slice() {
                config.ip = Some(ip.address);
                config.mask = Some(prefix_to_netmask(ip.prefix)?);
            }
        }
        NetBackend::VhostUser { source } => match source {
            ChrSource::Unix { path } => {
                config.vhost_socket = Some(path.clone());
                config.vhost_user = true;
            }
            other => return Err(ConfigError::VhostUserNotUnix(other.type_name())),
        },
        other @ (NetBackend::Bridge { .. }
        | NetBackend::Network { .. }
        | NetBackend::Direct { .. }
        | NetBackend::User
        | NetBackend::Server
        | NetBackend::Client
        | NetBackend::Mcast
        | NetBackend::Internal
        | NetBackend::Hostdev
        | NetBackend::Udp) => return Err(ConfigError::UnsupportedNetType(other.type_name())),
    }

    config.tap = net.ifname.clone();

    if net.virtio.is_some_and(|virtio| virtio.iommu == Tristate::On) {
        config.iommu = true;
    }

    config.num_queues = net.queues.filter(|&queues| queues != 0);

    match (net.rx_queue_size, net.tx_queue_size) {
        (None, None) => {}
        (Some(rx), Some(tx)) if rx == tx => config.queue_size = Some(rx),
        (rx, tx) => {
            return Err(ConfigError::QueueSizeMismatch {
                rx: rx.unwrap_or(0),
                tx: tx.unwrap_or(0),
            })
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::{net::IpAddr, path::PathBuf};

    use super::*;
    use crate::domain::{GuestIp, MacAddr, VirtioOptions};

    fn ethernet(ips: Vec<GuestIp>) -> NetDef {
        NetDef {
            backend: NetBackend::Ethernet { guest_ips: ips },
            ifname: None,
            mac: MacAddr([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]),
            virtio: None,
            queues: None,
            rx_queue_size: None,
            tx_queue_size: None,
        }
    }

    fn ip(address: &str, prefix: u8) -> GuestIp {
        GuestIp {
            address: address.parse().unwrap(),
            prefix,
        }
    }

    #[test]
    fn netmask_from_prefix() {
        assert_eq!(prefix_to_netmask(24).unwrap(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(prefix_to_netmask(32).unwrap(), Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(prefix_to_netmask(20).unwrap(), Ipv4Addr::new(255, 255, 240, 0));
        assert_eq!(prefix_to_netmask(0).unwrap(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(prefix_to_netmask(33), Err(ConfigError::InvalidPrefix(33)));
    }

    #[test]
    fn ethernet_with_one_ip() {
        let config = build_net(&ethernet(vec![ip("192.168.122.10", 24)])).unwrap();
        assert_eq!(config.ip, Some("192.168.122.10".parse::<IpAddr>().unwrap()));
        assert_eq!(config.mask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(config.mac.to_string(), "52:54:00:12:34:56");
        assert!(!config.vhost_user);
    }

    #[test]
    fn ethernet_with_other_ip_counts_has_no_address() {
        for ips in [vec![], vec![ip("10.0.0.2", 8), ip("10.0.0.3", 8)]] {
            let config = build_net(&ethernet(ips)).unwrap();
            assert_eq!(config.ip, None);
            assert_eq!(config.mask, None);
        }
    }

    #[test]
    fn vhost_user_on_unix_socket() {
        let mut net = ethernet(vec![]);
        net.backend = NetBackend::VhostUser {
            source: ChrSource::Unix {
                path: PathBuf::from("/run/vhost/net0.sock"),
            },
        };
        let config = build_net(&net).unwrap();
        assert_eq!(config.vhost_socket, Some(PathBuf::from("/run/vhost/net0.sock")));
        assert!(config.vhost_user);
        assert_eq!(config.ip, None);
    }

    #[test]
    fn vhost_user_must_be_unix() {
        let mut net = ethernet(vec![]);
        net.backend = NetBackend::VhostUser {
            source: ChrSource::Tcp {
                host: "127.0.0.1".into(),
                service: "5555".into(),
            },
        };
        assert_eq!(build_net(&net), Err(ConfigError::VhostUserNotUnix("tcp")));
    }

    #[test]
    fn unsupported_backends_fail() {
        let mut net = ethernet(vec![]);
        net.backend = NetBackend::Bridge {
            bridge: "virbr0".into(),
        };
        assert_eq!(build_net(&net), Err(ConfigError::UnsupportedNetType("bridge")));

        net.backend = NetBackend::User;
        assert_eq!(build_net(&net), Err(ConfigError::UnsupportedNetType("user")));
    }

    #[test]
    fn optional_fields() {
        let mut net = ethernet(vec![]);
        net.ifname = Some("tap0".into());
        net.virtio = Some(VirtioOptions {
            iommu: Tristate::On,
        });
        net.queues = Some(2);
        net.rx_queue_size = Some(256);
        net.tx_queue_size = Some(256);

        let config = build_net(&net).unwrap();
        assert_eq!(config.tap.as_deref(), Some("tap0"));
        assert!(config.iommu);
        assert_eq!(config.num_queues, Some(2));
        assert_eq!(config.queue_size, Some(256));
    }

    #[test]
    fn iommu_only_when_switched_on() {
        let mut net = ethernet(vec![]);
        net.virtio = Some(VirtioOptions {
            iommu: Tristate::Off,
        });
        assert!(!build_net(&net).unwrap().iommu);

        net.virtio = Some(VirtioOptions::default());
        assert!(!build_net(&net).unwrap().iommu);
    }

    #[test]
    fn queue_size_mismatch() {
        let mut net = ethernet(vec![]);
        net.rx_queue_size = Some(256);
        net.tx_queue_size = Some(512);
        assert_eq!(
            build_net(&net),
            Err(ConfigError::QueueSizeMismatch { rx: 256, tx: 512 })
        );

        net.tx_queue_size = None;
        assert_eq!(
            build_net(&net),
            Err(ConfigError::QueueSizeMismatch { rx: 256, tx: 0 })
        );
    }
}
