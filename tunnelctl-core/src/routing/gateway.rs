//! Default gateway resolution
//!
//! Finds the gateway the host would use without the tunnel, so that traffic
//! which must bypass the tunnel can be pinned to it.

use super::{ForwardRow, RoutingTable};
use crate::net::{AddressFamily, NetworkAddress, NetworkInterface, SystemInterfaces};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Best non-tunnel IPv4 gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4GatewayInfo {
    pub interface: NetworkInterface,
    pub gateway_address: NetworkAddress,
    pub interface_metric: u32,
}

pub struct Ipv4GatewayResolver {
    interfaces: Arc<dyn SystemInterfaces>,
    routing_table: Arc<dyn RoutingTable>,
}

impl Ipv4GatewayResolver {
    pub fn new(interfaces: Arc<dyn SystemInterfaces>, routing_table: Arc<dyn RoutingTable>) -> Self {
        Self {
            interfaces,
            routing_table,
        }
    }

    /// Resolve the best IPv4 gateway, ignoring the adapter with `excluded_hardware_id`.
    ///
    /// Returns `None` when there is no such interface, it has no IPv4 metric,
    /// no gateway (0.0.0.0), or the gateway does not parse.
    pub fn try_get_best_ipv4_gateway(&self, excluded_hardware_id: &str) -> Option<Ipv4GatewayInfo> {
        let interface = match self.interfaces.best_interface_excluding(excluded_hardware_id) {
            Some(i) => i,
            None => {
                log::error!("Failed to resolve IPv4 gateway: no usable network interface");
                return None;
            }
        };

        let interface_metric = match self
            .routing_table
            .interface_metric(interface.index, AddressFamily::Ipv4)
        {
            Some(metric) => metric,
            None => {
                log::warn!(
                    "Failed to resolve IPv4 gateway: no metric for interface {}",
                    interface.index
                );
                return None;
            }
        };

        let gateway = interface.default_gateway.unwrap_or(Ipv4Addr::UNSPECIFIED);
        if gateway.is_unspecified() {
            log::error!("Failed to resolve IPv4 gateway because the gateway is missing.");
            return None;
        }

        let gateway_address = match NetworkAddress::parse(&gateway.to_string()) {
            Some(address) => address,
            None => {
                log::error!("Failed to parse IPv4 gateway address '{}'.", gateway);
                return None;
            }
        };

        Some(Ipv4GatewayInfo {
            interface,
            gateway_address,
            interface_metric,
        })
    }
}

pub struct Ipv6GatewayResolver {
    routing_table: Arc<dyn RoutingTable>,
}

impl Ipv6GatewayResolver {
    pub fn new(routing_table: Arc<dyn RoutingTable>) -> Self {
        Self { routing_table }
    }

    /// Next hop of the best `::/0` route on an interface other than the tunnel
    /// that holds a global unicast IPv6 address. `None` when nothing qualifies.
    pub fn default_ipv6_gateway(
        &self,
        tunnel_interface: &NetworkInterface,
        interfaces: &[NetworkInterface],
    ) -> Option<NetworkAddress> {
        let candidates: Vec<u32> = interfaces
            .iter()
            .filter(|i| *i != tunnel_interface && i.index != tunnel_interface.index)
            .filter(|i| i.has_global_unicast_ipv6())
            .filter(|i| i.index != 0)
            .map(|i| i.index)
            .collect();

        if candidates.is_empty() {
            log::warn!("No interface found with global unicast address.");
            return None;
        }

        let rows = match self.routing_table.forward_table(AddressFamily::Ipv6) {
            Ok(rows) => rows,
            Err(e) => {
                log::error!("Failed to retrieve IP forward table: {}", e);
                return None;
            }
        };

        let default_routes: Vec<ForwardRow> = rows
            .into_iter()
            .filter(|row| row.destination.is_default_route() && row.destination.is_ipv6())
            .filter(|row| candidates.contains(&row.interface_index))
            .collect();

        if default_routes.is_empty() {
            log::error!("No IPv6 route found.");
            return None;
        }

        let metrics = match self.routing_table.interface_metrics(AddressFamily::Ipv6) {
            Ok(metrics) => metrics,
            Err(e) => {
                log::error!("Failed to retrieve IPv6 interface metrics: {}", e);
                return None;
            }
        };

        select_best_next_hop(&default_routes, &metrics).map(NetworkAddress::host)
    }
}

/// Lowest route metric + interface metric wins; the first row scanned wins a tie.
/// Rows whose interface has no known metric are skipped.
pub fn select_best_next_hop(rows: &[ForwardRow], interface_metrics: &HashMap<u32, u32>) -> Option<IpAddr> {
    let mut best: Option<(u64, IpAddr)> = None;

    for row in rows {
        let Some(interface_metric) = interface_metrics.get(&row.interface_index) else {
            continue;
        };

        let effective = row.metric as u64 + *interface_metric as u64;
        if best.map_or(true, |(best_metric, _)| effective < best_metric) {
            best = Some((effective, row.next_hop));
        }
    }

    best.map(|(_, next_hop)| next_hop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeInterfaces, FakeRoutingTable};

    fn physical(index: u32, gateway: Option<Ipv4Addr>, addresses: &[&str]) -> NetworkInterface {
        NetworkInterface {
            index,
            id: format!("{{iface-{}}}", index),
            name: format!("Ethernet {}", index),
            hardware_id: format!("pci\\ven_{}", index),
            default_gateway: gateway,
            unicast_addresses: addresses.iter().map(|a| a.parse().unwrap()).collect(),
            ..Default::default()
        }
    }

    fn tunnel() -> NetworkInterface {
        NetworkInterface {
            index: 40,
            hardware_id: "wintun".to_string(),
            unicast_addresses: vec!["10.2.0.2".parse().unwrap(), "2a07:b944::2:2".parse().unwrap()],
            ..Default::default()
        }
    }

    fn v6_default_row(interface_index: u32, next_hop: &str, metric: u32) -> ForwardRow {
        ForwardRow {
            destination: NetworkAddress::DEFAULT_IPV6,
            next_hop: next_hop.parse().unwrap(),
            interface_index,
            metric,
        }
    }

    #[test]
    fn test_ipv4_gateway_resolved() {
        let eth = physical(12, Some(Ipv4Addr::new(192, 168, 1, 1)), &["192.168.1.20"]);
        let interfaces = Arc::new(FakeInterfaces::new(vec![tunnel(), eth.clone()]));
        let routes = Arc::new(FakeRoutingTable::new().with_interface_metric(12, AddressFamily::Ipv4, 25));
        let resolver = Ipv4GatewayResolver::new(interfaces, routes);

        let info = resolver.try_get_best_ipv4_gateway("wintun").unwrap();
        assert_eq!(info.interface.index, 12);
        assert_eq!(info.gateway_address, NetworkAddress::parse("192.168.1.1").unwrap());
        assert_eq!(info.interface_metric, 25);
    }

    #[test]
    fn test_ipv4_gateway_missing_metric() {
        let eth = physical(12, Some(Ipv4Addr::new(192, 168, 1, 1)), &["192.168.1.20"]);
        let interfaces = Arc::new(FakeInterfaces::new(vec![eth]));
        let routes = Arc::new(FakeRoutingTable::new());
        let resolver = Ipv4GatewayResolver::new(interfaces, routes);

        assert!(resolver.try_get_best_ipv4_gateway("wintun").is_none());
    }

    #[test]
    fn test_ipv4_gateway_unspecified() {
        let eth = physical(12, Some(Ipv4Addr::UNSPECIFIED), &["192.168.1.20"]);
        let interfaces = Arc::new(FakeInterfaces::new(vec![eth]));
        let routes = Arc::new(FakeRoutingTable::new().with_interface_metric(12, AddressFamily::Ipv4, 25));
        let resolver = Ipv4GatewayResolver::new(interfaces, routes);

        assert!(resolver.try_get_best_ipv4_gateway("wintun").is_none());
    }

    #[test]
    fn test_ipv4_gateway_no_interface() {
        let interfaces = Arc::new(FakeInterfaces::new(vec![tunnel()]));
        let routes = Arc::new(FakeRoutingTable::new());
        let resolver = Ipv4GatewayResolver::new(interfaces, routes);

        assert!(resolver.try_get_best_ipv4_gateway("wintun").is_none());
    }

    #[test]
    fn test_select_best_next_hop_effective_metric() {
        let rows = vec![
            v6_default_row(3, "fe80::a", 10),
            v6_default_row(4, "fe80::b", 5),
        ];
        let metrics = HashMap::from([(3, 5), (4, 20)]);

        // 10 + 5 = 15 beats 5 + 20 = 25
        assert_eq!(
            select_best_next_hop(&rows, &metrics),
            Some("fe80::a".parse().unwrap())
        );
    }

    #[test]
    fn test_select_best_next_hop_tie_keeps_first() {
        let rows = vec![
            v6_default_row(3, "fe80::a", 10),
            v6_default_row(4, "fe80::b", 5),
        ];
        let metrics = HashMap::from([(3, 5), (4, 10)]);

        assert_eq!(
            select_best_next_hop(&rows, &metrics),
            Some("fe80::a".parse().unwrap())
        );
    }

    #[test]
    fn test_select_best_next_hop_skips_unknown_interface() {
        let rows = vec![v6_default_row(9, "fe80::a", 1)];
        assert_eq!(select_best_next_hop(&rows, &HashMap::new()), None);
    }

    #[test]
    fn test_ipv6_gateway_ignores_tunnel_and_link_local_only_interfaces() {
        let wifi = physical(3, None, &["2001:db8::3"]);
        let lan = physical(4, None, &["fe80::4"]);
        let all = vec![tunnel(), wifi, lan];

        let routes = Arc::new(
            FakeRoutingTable::new()
                .with_forward_row(v6_default_row(40, "fe80::40", 0))
                .with_forward_row(v6_default_row(4, "fe80::b", 0))
                .with_forward_row(v6_default_row(3, "fe80::a", 10))
                .with_interface_metric(3, AddressFamily::Ipv6, 5)
                .with_interface_metric(4, AddressFamily::Ipv6, 1)
                .with_interface_metric(40, AddressFamily::Ipv6, 0),
        );
        let resolver = Ipv6GatewayResolver::new(routes);

        assert_eq!(
            resolver.default_ipv6_gateway(&tunnel(), &all),
            NetworkAddress::parse("fe80::a")
        );
    }

    #[test]
    fn test_ipv6_gateway_none_without_global_address() {
        let lan = physical(4, None, &["fe80::4"]);
        let routes = Arc::new(
            FakeRoutingTable::new()
                .with_forward_row(v6_default_row(4, "fe80::b", 0))
                .with_interface_metric(4, AddressFamily::Ipv6, 1),
        );
        let resolver = Ipv6GatewayResolver::new(routes);

        assert_eq!(resolver.default_ipv6_gateway(&tunnel(), &[tunnel(), lan]), None);
    }

    #[test]
    fn test_ipv6_gateway_none_without_default_route() {
        let wifi = physical(3, None, &["2001:db8::3"]);
        let routes = Arc::new(FakeRoutingTable::new().with_interface_metric(3, AddressFamily::Ipv6, 5));
        let resolver = Ipv6GatewayResolver::new(routes);

        assert_eq!(resolver.default_ipv6_gateway(&tunnel(), &[wifi]), None);
    }
}
