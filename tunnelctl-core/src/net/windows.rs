//! IP Helper backed interface inventory and interface configuration

use super::{AddressFamily, IpInterfaceRow, IpInterfaceTable, NetworkInterface, SystemInterfaces};
use crate::{NetError, NetResult};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use windows::Win32::Foundation::{BOOLEAN, ERROR_BUFFER_OVERFLOW, NO_ERROR};
use windows::Win32::NetworkManagement::IpHelper::{
    GetAdaptersAddresses, GetBestInterfaceEx, GetIpInterfaceEntry, InitializeIpInterfaceEntry, SetIpInterfaceEntry,
    GAA_FLAG_INCLUDE_GATEWAYS, GAA_FLAG_INCLUDE_PREFIX, IP_ADAPTER_ADDRESSES_LH, MIB_IPINTERFACE_ROW,
};
use windows::Win32::NetworkManagement::Ndis::IfOperStatusUp;
use windows::Win32::Networking::WinSock::{
    ADDRESS_FAMILY, AF_INET, AF_INET6, AF_UNSPEC, IN6_ADDR, IN6_ADDR_0, IN_ADDR, IN_ADDR_0, SOCKADDR, SOCKADDR_IN,
    SOCKADDR_IN6, SOCKADDR_INET,
};

/// Registry class of network adapters; each subkey maps an adapter GUID to its
/// driver component (hardware) id
const NETWORK_ADAPTER_CLASS_KEY: &str =
    "SYSTEM\\CurrentControlSet\\Control\\Class\\{4d36e972-e325-11ce-bfc1-08002be10318}";

/// Address used to ask the stack for the internet facing interface
const ROUTE_LOOKUP_ADDRESS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

// ═══════════════════════════════════════════════════════════════════════════════
//  Socket address conversions
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn family_value(family: AddressFamily) -> ADDRESS_FAMILY {
    match family {
        AddressFamily::Ipv4 => AF_INET,
        AddressFamily::Ipv6 => AF_INET6,
    }
}

pub(crate) fn family_from_value(value: ADDRESS_FAMILY) -> Option<AddressFamily> {
    match value {
        AF_INET => Some(AddressFamily::Ipv4),
        AF_INET6 => Some(AddressFamily::Ipv6),
        _ => None,
    }
}

pub(crate) fn to_sockaddr_inet(ip: IpAddr) -> SOCKADDR_INET {
    let mut addr = SOCKADDR_INET::default();
    match ip {
        IpAddr::V4(v4) => {
            addr.Ipv4 = SOCKADDR_IN {
                sin_family: AF_INET,
                sin_port: 0,
                sin_addr: IN_ADDR {
                    S_un: IN_ADDR_0 {
                        S_addr: u32::from_ne_bytes(v4.octets()),
                    },
                },
                sin_zero: [0; 8],
            };
        }
        IpAddr::V6(v6) => {
            addr.Ipv6 = SOCKADDR_IN6 {
                sin6_family: AF_INET6,
                sin6_addr: IN6_ADDR {
                    u: IN6_ADDR_0 { Byte: v6.octets() },
                },
                ..Default::default()
            };
        }
    }
    addr
}

/// # Safety
/// `addr` must be a fully initialised `SOCKADDR_INET` as returned by the OS.
pub(crate) unsafe fn from_sockaddr_inet(addr: &SOCKADDR_INET) -> Option<IpAddr> {
    match addr.si_family {
        AF_INET => Some(IpAddr::V4(Ipv4Addr::from(addr.Ipv4.sin_addr.S_un.S_addr.to_ne_bytes()))),
        AF_INET6 => Some(IpAddr::V6(Ipv6Addr::from(addr.Ipv6.sin6_addr.u.Byte))),
        _ => None,
    }
}

/// # Safety
/// `sockaddr` must be null or point at a valid `SOCKADDR_IN`/`SOCKADDR_IN6`.
unsafe fn from_sockaddr(sockaddr: *const SOCKADDR) -> Option<IpAddr> {
    if sockaddr.is_null() {
        return None;
    }
    match (*sockaddr).sa_family {
        AF_INET => {
            let v4 = &*(sockaddr as *const SOCKADDR_IN);
            Some(IpAddr::V4(Ipv4Addr::from(v4.sin_addr.S_un.S_addr.to_ne_bytes())))
        }
        AF_INET6 => {
            let v6 = &*(sockaddr as *const SOCKADDR_IN6);
            Some(IpAddr::V6(Ipv6Addr::from(v6.sin6_addr.u.Byte)))
        }
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Interface inventory
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsInterfaces;

impl WindowsInterfaces {
    pub fn new() -> Self {
        Self
    }

    fn best_ipv4_interface_index() -> Option<u32> {
        let destination = SOCKADDR_IN {
            sin_family: AF_INET,
            sin_port: 0,
            sin_addr: IN_ADDR {
                S_un: IN_ADDR_0 {
                    S_addr: u32::from_ne_bytes(ROUTE_LOOKUP_ADDRESS.octets()),
                },
            },
            sin_zero: [0; 8],
        };

        let mut index: u32 = 0;
        let rc = unsafe { GetBestInterfaceEx(&destination as *const SOCKADDR_IN as *const SOCKADDR, &mut index) };
        if rc != 0 {
            log::debug!("GetBestInterfaceEx failed: {}", rc);
            return None;
        }
        Some(index)
    }

    /// Adapter GUID (lowercase) -> driver component id
    fn hardware_ids() -> HashMap<String, String> {
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        let mut ids = HashMap::new();
        let class_key = match RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey(NETWORK_ADAPTER_CLASS_KEY) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("Failed to open network adapter class key: {}", e);
                return ids;
            }
        };

        for name in class_key.enum_keys().flatten() {
            let Ok(adapter) = class_key.open_subkey(&name) else {
                continue;
            };
            let instance: Result<String, _> = adapter.get_value("NetCfgInstanceId");
            let component: Result<String, _> = adapter.get_value("ComponentId");
            if let (Ok(instance), Ok(component)) = (instance, component) {
                ids.insert(instance.to_lowercase(), component);
            }
        }
        ids
    }

    fn read_adapters(up_only: bool) -> NetResult<Vec<NetworkInterface>> {
        let flags = GAA_FLAG_INCLUDE_PREFIX | GAA_FLAG_INCLUDE_GATEWAYS;
        let hardware_ids = Self::hardware_ids();

        unsafe {
            let mut size: u32 = 0;
            let _ = GetAdaptersAddresses(AF_UNSPEC.0 as u32, flags, None, None, &mut size);
            if size == 0 {
                return Err(NetError::Interface("GetAdaptersAddresses returned size 0".to_string()));
            }

            // The list can grow between the size query and the read
            for _ in 0..3 {
                let mut buffer = vec![0u8; size as usize];
                let first = buffer.as_mut_ptr() as *mut IP_ADAPTER_ADDRESSES_LH;
                let rc = GetAdaptersAddresses(AF_UNSPEC.0 as u32, flags, None, Some(first), &mut size);
                if rc == ERROR_BUFFER_OVERFLOW.0 {
                    continue;
                }
                if rc != NO_ERROR.0 {
                    return Err(NetError::ip_helper("GetAdaptersAddresses", rc));
                }

                let mut interfaces = Vec::new();
                let mut current = first as *const IP_ADAPTER_ADDRESSES_LH;
                while !current.is_null() {
                    let adapter = &*current;
                    current = adapter.Next;

                    if up_only && adapter.OperStatus != IfOperStatusUp {
                        continue;
                    }

                    let id = adapter.AdapterName.to_string().unwrap_or_default();
                    let mut unicast_addresses = Vec::new();
                    let mut unicast = adapter.FirstUnicastAddress;
                    while !unicast.is_null() {
                        if let Some(ip) = from_sockaddr((*unicast).Address.lpSockaddr) {
                            unicast_addresses.push(ip);
                        }
                        unicast = (*unicast).Next;
                    }

                    let mut default_gateway = None;
                    let mut gateway = adapter.FirstGatewayAddress;
                    while !gateway.is_null() {
                        if let Some(IpAddr::V4(v4)) = from_sockaddr((*gateway).Address.lpSockaddr) {
                            default_gateway = Some(v4);
                            break;
                        }
                        gateway = (*gateway).Next;
                    }

                    let index = match adapter.Anonymous1.Anonymous.IfIndex {
                        0 => adapter.Ipv6IfIndex,
                        index => index,
                    };

                    interfaces.push(NetworkInterface {
                        index,
                        hardware_id: hardware_ids.get(&id.to_lowercase()).cloned().unwrap_or_default(),
                        id,
                        name: adapter.FriendlyName.to_string().unwrap_or_default(),
                        description: adapter.Description.to_string().unwrap_or_default(),
                        default_gateway,
                        unicast_addresses,
                    });
                }
                return Ok(interfaces);
            }
        }

        Err(NetError::Interface(
            "GetAdaptersAddresses buffer kept growing".to_string(),
        ))
    }
}

impl SystemInterfaces for WindowsInterfaces {
    fn interfaces(&self) -> Vec<NetworkInterface> {
        match Self::read_adapters(false) {
            Ok(interfaces) => interfaces,
            Err(e) => {
                log::error!("Failed to enumerate network interfaces: {}", e);
                Vec::new()
            }
        }
    }

    fn best_interface_excluding(&self, excluded_hardware_id: &str) -> Option<NetworkInterface> {
        let candidates: Vec<NetworkInterface> = match Self::read_adapters(true) {
            Ok(interfaces) => interfaces
                .into_iter()
                .filter(|i| !i.has_hardware_id(excluded_hardware_id))
                .filter(|i| i.preferred_ipv4_address().is_some())
                .collect(),
            Err(e) => {
                log::error!("Failed to enumerate network interfaces: {}", e);
                return None;
            }
        };

        // Ask the stack first; while the tunnel holds the default route it
        // answers with the tunnel, so fall back to the first interface with a gateway
        if let Some(best) = Self::best_ipv4_interface_index() {
            if let Some(found) = candidates.iter().find(|i| i.index == best) {
                return Some(found.clone());
            }
        }

        candidates
            .iter()
            .find(|i| i.default_gateway.is_some())
            .or_else(|| candidates.first())
            .cloned()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Interface configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsIpInterfaceTable;

impl WindowsIpInterfaceTable {
    pub fn new() -> Self {
        Self
    }

    fn read_native(interface_index: u32, family: AddressFamily) -> NetResult<MIB_IPINTERFACE_ROW> {
        let mut row = MIB_IPINTERFACE_ROW::default();
        unsafe {
            InitializeIpInterfaceEntry(&mut row);
        }
        row.Family = family_value(family);
        row.InterfaceIndex = interface_index;

        let rc = unsafe { GetIpInterfaceEntry(&mut row) };
        if rc != NO_ERROR {
            return Err(NetError::ip_helper("GetIpInterfaceEntry", rc.0));
        }
        Ok(row)
    }
}

impl IpInterfaceTable for WindowsIpInterfaceTable {
    fn get(&self, interface_index: u32, family: AddressFamily) -> NetResult<IpInterfaceRow> {
        let row = Self::read_native(interface_index, family)?;
        Ok(IpInterfaceRow {
            family,
            interface_index,
            weak_host_send: row.WeakHostSend.as_bool(),
            weak_host_receive: row.WeakHostReceive.as_bool(),
            forwarding_enabled: row.ForwardingEnabled.as_bool(),
            site_prefix_length: row.SitePrefixLength.min(u8::MAX as u32) as u8,
        })
    }

    fn set(&self, row: &IpInterfaceRow) -> NetResult<()> {
        let mut native = Self::read_native(row.interface_index, row.family)?;
        native.WeakHostSend = BOOLEAN::from(row.weak_host_send);
        native.WeakHostReceive = BOOLEAN::from(row.weak_host_receive);
        native.ForwardingEnabled = BOOLEAN::from(row.forwarding_enabled);
        native.SitePrefixLength = row.site_prefix_length as u32;

        let rc = unsafe { SetIpInterfaceEntry(&mut native) };
        if rc != NO_ERROR {
            return Err(NetError::ip_helper("SetIpInterfaceEntry", rc.0));
        }
        Ok(())
    }
}
