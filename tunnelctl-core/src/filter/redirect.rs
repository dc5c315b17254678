//! Redirect target record consumed by the split tunnel callout driver
//!
//! Layout (little endian, 20 bytes):
//!
//! | offset | size | field                                    |
//! |--------|------|------------------------------------------|
//! | 0      | 2    | address family (AF_INET=2, AF_INET6=23)  |
//! | 2      | 2    | padding                                  |
//! | 4      | 16   | address, IPv4 in the first 4 bytes       |

use crate::net::AddressFamily;
use crate::{NetError, NetResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ADDRESS_FAMILY_SIZE: usize = 2;
const PADDING_SIZE: usize = 2;
const UNION_SIZE: usize = 16;
const ADDRESS_OFFSET: usize = ADDRESS_FAMILY_SIZE + PADDING_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRedirectData {
    address: IpAddr,
}

impl ConnectRedirectData {
    pub const SIZE: usize = ADDRESS_FAMILY_SIZE + PADDING_SIZE + UNION_SIZE;

    pub fn new(address: IpAddr) -> Self {
        Self { address }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buffer = [0u8; Self::SIZE];
        let family = match self.address {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        };
        buffer[..ADDRESS_FAMILY_SIZE].copy_from_slice(&family.winsock_value().to_le_bytes());

        match self.address {
            IpAddr::V4(v4) => buffer[ADDRESS_OFFSET..ADDRESS_OFFSET + 4].copy_from_slice(&v4.octets()),
            IpAddr::V6(v6) => buffer[ADDRESS_OFFSET..].copy_from_slice(&v6.octets()),
        }

        buffer
    }

    pub fn decode(data: &[u8]) -> NetResult<Self> {
        if data.len() != Self::SIZE {
            return Err(NetError::InvalidArgument(format!(
                "redirect data must be {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }

        let family = u16::from_le_bytes([data[0], data[1]]);
        let address = if family == AddressFamily::Ipv4.winsock_value() {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&data[ADDRESS_OFFSET..ADDRESS_OFFSET + 4]);
            IpAddr::V4(Ipv4Addr::from(octets))
        } else if family == AddressFamily::Ipv6.winsock_value() {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[ADDRESS_OFFSET..]);
            IpAddr::V6(Ipv6Addr::from(octets))
        } else {
            return Err(NetError::InvalidArgument(format!(
                "unsupported address family {} in redirect data",
                family
            )));
        };

        Ok(Self { address })
    }
}

impl From<IpAddr> for ConnectRedirectData {
    fn from(address: IpAddr) -> Self {
        Self::new(address)
    }
}
