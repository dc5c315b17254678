//! Network primitives: addresses, the host's interface inventory and per-family
//! interface configuration

pub mod address;
pub mod interfaces;
pub mod ip_interface;

#[cfg(windows)]
pub mod windows;

pub use address::NetworkAddress;
pub use interfaces::{NetworkInterface, SystemInterfaces};
pub use ip_interface::{IpInterfaceRow, IpInterfaceTable};

/// Address family of an interface or route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [AddressFamily::Ipv4, AddressFamily::Ipv6];

    /// Winsock `ADDRESS_FAMILY` value (`AF_INET` = 2, `AF_INET6` = 23)
    pub fn winsock_value(&self) -> u16 {
        match self {
            AddressFamily::Ipv4 => 2,
            AddressFamily::Ipv6 => 23,
        }
    }

    pub fn from_ipv6_flag(is_ipv6: bool) -> Self {
        if is_ipv6 {
            AddressFamily::Ipv6
        } else {
            AddressFamily::Ipv4
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}
