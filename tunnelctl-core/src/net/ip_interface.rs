//! Per-family IP interface configuration (`MIB_IPINTERFACE_ROW` on Windows)

use super::AddressFamily;
use crate::NetResult;

/// The fields of an IP interface row the control plane reads or changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpInterfaceRow {
    pub family: AddressFamily,
    pub interface_index: u32,
    pub weak_host_send: bool,
    pub weak_host_receive: bool,
    pub forwarding_enabled: bool,
    pub site_prefix_length: u8,
}

impl IpInterfaceRow {
    /// The OS hands out rows whose site prefix exceeds the family maximum but
    /// refuses them on write. Clamp before every update.
    pub fn fix_site_prefix_length(&mut self) {
        let max_prefix = match self.family {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        };
        if self.site_prefix_length > max_prefix {
            self.site_prefix_length = max_prefix;
        }
    }
}

pub trait IpInterfaceTable: Send + Sync {
    fn get(&self, interface_index: u32, family: AddressFamily) -> NetResult<IpInterfaceRow>;
    fn set(&self, row: &IpInterfaceRow) -> NetResult<()>;
}
