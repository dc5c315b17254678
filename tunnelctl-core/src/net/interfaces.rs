//! Host network interface inventory

use super::address::is_global_unicast_ipv6;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Snapshot of one network interface
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkInterface {
    /// Interface index (IPv4/IPv6 share it on Windows)
    pub index: u32,
    /// Adapter id (GUID string on Windows)
    pub id: String,
    pub name: String,
    pub description: String,
    /// Driver hardware id, used to recognise the tunnel adapter
    pub hardware_id: String,
    /// First IPv4 gateway configured on the interface, `None` if absent
    pub default_gateway: Option<Ipv4Addr>,
    pub unicast_addresses: Vec<IpAddr>,
}

impl NetworkInterface {
    pub fn preferred_ipv4_address(&self) -> Option<Ipv4Addr> {
        self.unicast_addresses.iter().find_map(|ip| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_link_local() => Some(*v4),
            _ => None,
        })
    }

    /// First global unicast IPv6 address
    pub fn preferred_ipv6_unicast_address(&self) -> Option<Ipv6Addr> {
        self.unicast_addresses.iter().find_map(|ip| match ip {
            IpAddr::V6(v6) if is_global_unicast_ipv6(v6) => Some(*v6),
            _ => None,
        })
    }

    pub fn has_global_unicast_ipv6(&self) -> bool {
        self.preferred_ipv6_unicast_address().is_some()
    }

    pub fn has_hardware_id(&self, hardware_id: &str) -> bool {
        !hardware_id.is_empty() && self.hardware_id.eq_ignore_ascii_case(hardware_id)
    }
}

/// Read access to the host interface list
pub trait SystemInterfaces: Send + Sync {
    fn interfaces(&self) -> Vec<NetworkInterface>;

    /// Interface the OS would use for internet traffic, ignoring the adapter
    /// with `excluded_hardware_id` (the tunnel)
    fn best_interface_excluding(&self, excluded_hardware_id: &str) -> Option<NetworkInterface>;

    fn interface_by_hardware_id(&self, hardware_id: &str) -> Option<NetworkInterface> {
        self.interfaces()
            .into_iter()
            .find(|i| i.has_hardware_id(hardware_id))
    }

    fn interface_by_index(&self, index: u32) -> Option<NetworkInterface> {
        self.interfaces().into_iter().find(|i| i.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(addresses: &[&str]) -> NetworkInterface {
        NetworkInterface {
            index: 7,
            hardware_id: "wintun".to_string(),
            unicast_addresses: addresses.iter().map(|a| a.parse().unwrap()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_preferred_ipv6_skips_link_local() {
        let i = iface(&["192.168.1.5", "fe80::1", "2001:db8::5"]);
        assert_eq!(
            i.preferred_ipv6_unicast_address(),
            Some("2001:db8::5".parse().unwrap())
        );
        assert!(i.has_global_unicast_ipv6());
    }

    #[test]
    fn test_no_global_ipv6() {
        let i = iface(&["192.168.1.5", "fe80::1"]);
        assert_eq!(i.preferred_ipv6_unicast_address(), None);
        assert!(!i.has_global_unicast_ipv6());
    }

    #[test]
    fn test_preferred_ipv4_skips_apipa() {
        let i = iface(&["169.254.3.3", "10.0.0.4"]);
        assert_eq!(i.preferred_ipv4_address(), Some(Ipv4Addr::new(10, 0, 0, 4)));
    }

    #[test]
    fn test_hardware_id_match_is_case_insensitive() {
        let i = iface(&[]);
        assert!(i.has_hardware_id("WinTun"));
        assert!(!i.has_hardware_id(""));
        assert!(!i.has_hardware_id("tap0901"));
    }
}
