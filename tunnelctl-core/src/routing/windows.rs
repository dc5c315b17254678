//! IP Helper backed route table

use super::{ForwardRow, RouteConfiguration, RoutingTable};
use crate::net::windows::{family_value, from_sockaddr_inet, to_sockaddr_inet};
use crate::net::{AddressFamily, NetworkAddress};
use crate::{NetError, NetResult};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use windows::Win32::Foundation::{ERROR_NOT_FOUND, ERROR_OBJECT_ALREADY_EXISTS, NO_ERROR, WIN32_ERROR};
use windows::Win32::NetworkManagement::IpHelper::{
    CreateIpForwardEntry2, DeleteIpForwardEntry2, FreeMibTable, GetIpForwardTable2, GetIpInterfaceEntry,
    GetIpInterfaceTable, InitializeIpForwardEntry, InitializeIpInterfaceEntry, MIB_IPFORWARD_ROW2,
    MIB_IPFORWARD_TABLE2, MIB_IPINTERFACE_ROW, MIB_IPINTERFACE_TABLE,
};
use windows::Win32::Networking::WinSock::MIB_IPPROTO_NETMGMT;

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsRoutingTable;

impl WindowsRoutingTable {
    pub fn new() -> Self {
        Self
    }

    fn native_row(route: &RouteConfiguration) -> MIB_IPFORWARD_ROW2 {
        let mut row = MIB_IPFORWARD_ROW2::default();
        unsafe {
            InitializeIpForwardEntry(&mut row);
        }

        let unspecified = if route.is_ipv6 {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };

        row.InterfaceIndex = route.interface_index;
        row.DestinationPrefix.Prefix = to_sockaddr_inet(route.destination.ip());
        row.DestinationPrefix.PrefixLength = route.destination.prefix_len();
        row.NextHop = to_sockaddr_inet(route.gateway.map(|g| g.ip()).unwrap_or(unspecified));
        row.Metric = route.metric;
        row.Protocol = MIB_IPPROTO_NETMGMT;
        row
    }

    /// Snapshot of the OS forwarding table for `family`
    fn native_forward_rows(family: AddressFamily) -> NetResult<Vec<MIB_IPFORWARD_ROW2>> {
        let mut table: *mut MIB_IPFORWARD_TABLE2 = std::ptr::null_mut();
        let rc = unsafe { GetIpForwardTable2(family_value(family), &mut table) };
        if rc != NO_ERROR {
            return Err(NetError::ip_helper("GetIpForwardTable2", rc.0));
        }
        if table.is_null() {
            return Ok(Vec::new());
        }

        let rows = unsafe {
            let count = (*table).NumEntries as usize;
            let rows = std::slice::from_raw_parts((*table).Table.as_ptr(), count).to_vec();
            FreeMibTable(table as *const _);
            rows
        };
        Ok(rows)
    }

    fn delete_native(row: &MIB_IPFORWARD_ROW2) -> WIN32_ERROR {
        unsafe { DeleteIpForwardEntry2(row) }
    }
}

fn forward_row(row: &MIB_IPFORWARD_ROW2) -> Option<ForwardRow> {
    let (destination, next_hop) = unsafe {
        (
            from_sockaddr_inet(&row.DestinationPrefix.Prefix)?,
            from_sockaddr_inet(&row.NextHop)?,
        )
    };
    Some(ForwardRow {
        destination: NetworkAddress::with_prefix(destination, row.DestinationPrefix.PrefixLength)?,
        next_hop,
        interface_index: row.InterfaceIndex,
        metric: row.Metric,
    })
}

impl RoutingTable for WindowsRoutingTable {
    fn create_route(&self, route: &RouteConfiguration) -> NetResult<()> {
        let row = Self::native_row(route);
        let rc = unsafe { CreateIpForwardEntry2(&row) };
        match rc {
            NO_ERROR => {
                log::debug!("Created route {}", route);
                Ok(())
            }
            ERROR_OBJECT_ALREADY_EXISTS => {
                log::debug!("Route {} already exists", route);
                Ok(())
            }
            rc => Err(NetError::Route(format!("CreateIpForwardEntry2 failed for {}: {}", route, rc.0))),
        }
    }

    fn delete_route(&self, route: &RouteConfiguration) -> NetResult<()> {
        let row = Self::native_row(route);
        match Self::delete_native(&row) {
            NO_ERROR => {
                log::debug!("Deleted route {}", route);
                Ok(())
            }
            // already gone, typically removed together with the tunnel adapter
            ERROR_NOT_FOUND => Ok(()),
            rc => Err(NetError::Route(format!("DeleteIpForwardEntry2 failed for {}: {}", route, rc.0))),
        }
    }

    fn delete_routes_to(&self, destination: IpAddr) -> bool {
        let family = AddressFamily::from_ipv6_flag(destination.is_ipv6());
        let host = NetworkAddress::host(destination);

        let rows = match Self::native_forward_rows(family) {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("Failed to read the route table while deleting routes to {}: {}", destination, e);
                return false;
            }
        };

        let mut all_deleted = true;
        for row in rows.iter().filter(|row| forward_row(row).map(|r| r.destination) == Some(host)) {
            match Self::delete_native(row) {
                NO_ERROR | ERROR_NOT_FOUND => {}
                rc => {
                    log::warn!("Failed to delete route to {}: {}", destination, rc.0);
                    all_deleted = false;
                }
            }
        }
        all_deleted
    }

    fn route_exists(&self, route: &RouteConfiguration) -> bool {
        let Ok(rows) = self.forward_table(route.family()) else {
            return false;
        };
        rows.iter().any(|row| {
            row.destination == route.destination
                && row.interface_index == route.interface_index
                && route.gateway.map_or(row.next_hop.is_unspecified(), |g| g.ip() == row.next_hop)
        })
    }

    fn interface_metric(&self, index: u32, family: AddressFamily) -> Option<u32> {
        let mut row = MIB_IPINTERFACE_ROW::default();
        unsafe {
            InitializeIpInterfaceEntry(&mut row);
        }
        row.Family = family_value(family);
        row.InterfaceIndex = index;

        let rc = unsafe { GetIpInterfaceEntry(&mut row) };
        if rc != NO_ERROR {
            log::debug!("GetIpInterfaceEntry failed for interface {} ({}): {}", index, family, rc.0);
            return None;
        }
        Some(row.Metric)
    }

    fn loopback_interface_index(&self) -> Option<u32> {
        let loopback = NetworkAddress::host(IpAddr::V4(Ipv4Addr::LOCALHOST));
        self.forward_table(AddressFamily::Ipv4)
            .ok()?
            .into_iter()
            .find(|row| row.destination == loopback)
            .map(|row| row.interface_index)
    }

    fn forward_table(&self, family: AddressFamily) -> NetResult<Vec<ForwardRow>> {
        Ok(Self::native_forward_rows(family)?.iter().filter_map(forward_row).collect())
    }

    fn interface_metrics(&self, family: AddressFamily) -> NetResult<HashMap<u32, u32>> {
        let mut table: *mut MIB_IPINTERFACE_TABLE = std::ptr::null_mut();
        let rc = unsafe { GetIpInterfaceTable(family_value(family), &mut table) };
        if rc != NO_ERROR {
            return Err(NetError::ip_helper("GetIpInterfaceTable", rc.0));
        }
        if table.is_null() {
            return Ok(HashMap::new());
        }

        let metrics = unsafe {
            let count = (*table).NumEntries as usize;
            let metrics = std::slice::from_raw_parts((*table).Table.as_ptr(), count)
                .iter()
                .map(|row| (row.InterfaceIndex, row.Metric))
                .collect();
            FreeMibTable(table as *const _);
            metrics
        };
        Ok(metrics)
    }
}
