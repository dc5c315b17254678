//! Route table management
//!
//! - gateway.rs: best non-tunnel IPv4/IPv6 default gateway resolution
//! - split_tunnel.rs: routes for permit/block split tunnel modes
//! - server_routes.rs: VPN server endpoint route with crash-safe persistence
//! - windows.rs: IP Helper backed route table (Windows only)

pub mod gateway;
pub mod server_routes;
pub mod split_tunnel;

#[cfg(windows)]
pub mod windows;

pub use gateway::{Ipv4GatewayInfo, Ipv4GatewayResolver, Ipv6GatewayResolver};
pub use server_routes::{PersistedServerRoute, RouteStore, ServerRouteManager};
pub use split_tunnel::{SplitTunnelRouting, TunnelRouteContext, PERMIT_ROUTE_METRIC};

use crate::net::{AddressFamily, NetworkAddress};
use crate::NetResult;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

/// One route to create or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfiguration {
    pub destination: NetworkAddress,
    /// Next hop, `None` for on-link routes
    pub gateway: Option<NetworkAddress>,
    pub interface_index: u32,
    pub metric: u32,
    pub is_ipv6: bool,
}

impl RouteConfiguration {
    pub fn family(&self) -> AddressFamily {
        AddressFamily::from_ipv6_flag(self.is_ipv6)
    }
}

impl fmt::Display for RouteConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.gateway {
            Some(gateway) => write!(
                f,
                "{} via {} if {} metric {}",
                self.destination,
                gateway.ip(),
                self.interface_index,
                self.metric
            ),
            None => write!(
                f,
                "{} on-link if {} metric {}",
                self.destination, self.interface_index, self.metric
            ),
        }
    }
}

/// One row of the OS forwarding table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRow {
    pub destination: NetworkAddress,
    pub next_hop: IpAddr,
    pub interface_index: u32,
    pub metric: u32,
}

/// IPv4/IPv6 route table
///
/// Implementations treat "already exists" on create as success so repeated
/// application of the same route is a no-op.
pub trait RoutingTable: Send + Sync {
    fn create_route(&self, route: &RouteConfiguration) -> NetResult<()>;

    /// Delete the route matching destination, gateway and interface
    fn delete_route(&self, route: &RouteConfiguration) -> NetResult<()>;

    /// Delete every route to `destination` (host address). Returns true when no
    /// such route remains afterwards.
    fn delete_routes_to(&self, destination: IpAddr) -> bool;

    fn route_exists(&self, route: &RouteConfiguration) -> bool;

    /// Interface metric of `index` for `family`, `None` when the interface has none
    fn interface_metric(&self, index: u32, family: AddressFamily) -> Option<u32>;

    fn loopback_interface_index(&self) -> Option<u32>;

    fn forward_table(&self, family: AddressFamily) -> NetResult<Vec<ForwardRow>>;

    /// Interface index -> metric for every interface of `family`
    fn interface_metrics(&self, family: AddressFamily) -> NetResult<HashMap<u32, u32>>;
}
