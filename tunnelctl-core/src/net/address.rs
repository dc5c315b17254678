//! Network address with prefix, as used for route destinations and gateways

use ipnet::IpNet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IPv4/IPv6 address plus prefix length. A bare address parses as a host
/// route (/32 or /128); host bits of a CIDR are cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkAddress(IpNet);

impl NetworkAddress {
    pub const DEFAULT_IPV4: NetworkAddress =
        NetworkAddress(IpNet::V4(ipnet::Ipv4Net::new_assert(Ipv4Addr::UNSPECIFIED, 0)));
    pub const DEFAULT_IPV6: NetworkAddress =
        NetworkAddress(IpNet::V6(ipnet::Ipv6Net::new_assert(Ipv6Addr::UNSPECIFIED, 0)));

    pub fn parse(text: &str) -> Option<Self> {
        text.parse().ok()
    }

    pub fn host(ip: IpAddr) -> Self {
        NetworkAddress(IpNet::from(ip))
    }

    /// `None` when `prefix_len` exceeds the family maximum
    pub fn with_prefix(ip: IpAddr, prefix_len: u8) -> Option<Self> {
        IpNet::new(ip, prefix_len).ok().map(|net| NetworkAddress(net.trunc()))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self.0, IpNet::V6(_))
    }

    pub fn is_default_route(&self) -> bool {
        self.prefix_len() == 0 && self.ip().is_unspecified()
    }

    pub fn as_ipnet(&self) -> IpNet {
        self.0
    }
}

impl FromStr for NetworkAddress {
    type Err = crate::NetError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(crate::NetError::InvalidAddress("empty address".to_string()));
        }

        if text.contains('/') {
            let net = IpNet::from_str(text)
                .map_err(|e| crate::NetError::InvalidAddress(format!("'{}': {}", text, e)))?;
            return Ok(NetworkAddress(net.trunc()));
        }

        let ip = IpAddr::from_str(text)
            .map_err(|e| crate::NetError::InvalidAddress(format!("'{}': {}", text, e)))?;
        Ok(NetworkAddress::host(ip))
    }
}

impl From<IpAddr> for NetworkAddress {
    fn from(ip: IpAddr) -> Self {
        NetworkAddress::host(ip)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global unicast IPv6 address: not link-local, multicast, loopback or unspecified
pub fn is_global_unicast_ipv6(ip: &Ipv6Addr) -> bool {
    let is_link_local = (ip.segments()[0] & 0xffc0) == 0xfe80;
    !(ip.is_unspecified() || ip.is_loopback() || ip.is_multicast() || is_link_local)
}
