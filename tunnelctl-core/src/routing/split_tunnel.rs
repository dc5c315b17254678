//! Routes for split tunnel modes
//!
//! Permit mode keeps the tunnel reachable for included apps while the host
//! default route stays preferred. Block mode pins each listed IP to the best
//! non-tunnel gateway.

use super::gateway::{Ipv4GatewayResolver, Ipv6GatewayResolver};
use super::{RouteConfiguration, RoutingTable};
use crate::model::{SplitTunnelMode, SplitTunnelSettings};
use crate::net::{NetworkAddress, NetworkInterface, SystemInterfaces};
use std::sync::Arc;

/// Metric of the low priority tunnel routes installed in permit mode
pub const PERMIT_ROUTE_METRIC: u32 = 32000;

/// Everything the route setup needs to know about the live tunnel
#[derive(Debug, Clone)]
pub struct TunnelRouteContext {
    pub tunnel_interface: NetworkInterface,
    /// Hardware id of the tunnel adapter, excluded from gateway resolution
    pub tunnel_hardware_id: String,
    /// Address assigned to us inside the tunnel
    pub local_ip: String,
    /// Gateway of the VPN server inside the tunnel
    pub server_gateway_ipv4: Option<NetworkAddress>,
    pub server_gateway_ipv6: Option<NetworkAddress>,
    pub settings: SplitTunnelSettings,
    pub ipv6_supported: bool,
}

pub struct SplitTunnelRouting {
    routing_table: Arc<dyn RoutingTable>,
    interfaces: Arc<dyn SystemInterfaces>,
    ipv4_gateways: Ipv4GatewayResolver,
    ipv6_gateways: Ipv6GatewayResolver,
}

impl SplitTunnelRouting {
    pub fn new(routing_table: Arc<dyn RoutingTable>, interfaces: Arc<dyn SystemInterfaces>) -> Self {
        Self {
            ipv4_gateways: Ipv4GatewayResolver::new(interfaces.clone(), routing_table.clone()),
            ipv6_gateways: Ipv6GatewayResolver::new(routing_table.clone()),
            routing_table,
            interfaces,
        }
    }

    pub fn set_up_routing_table(&self, context: &TunnelRouteContext) {
        match context.settings.mode {
            SplitTunnelMode::Disabled => {}
            SplitTunnelMode::Permit => self.set_up_permit_mode_routes(context),
            SplitTunnelMode::Block => self.set_up_block_mode_routes(context),
        }
    }

    /// Delete the routes `set_up_routing_table` created for `settings`
    pub fn delete_routes(&self, settings: &SplitTunnelSettings) {
        match settings.mode {
            SplitTunnelMode::Disabled => {}
            SplitTunnelMode::Block => {
                for address in parse_ips(&settings.ips) {
                    if !self.routing_table.delete_routes_to(address.ip()) {
                        log::warn!("Route to {} could not be deleted", address);
                    }
                }
            }
            SplitTunnelMode::Permit => {
                if let Some(route) = self.ipv6_loopback_route() {
                    self.delete(&route);
                }
            }
        }
    }

    fn set_up_permit_mode_routes(&self, context: &TunnelRouteContext) {
        let tunnel_index = context.tunnel_interface.index;
        let local_address = match NetworkAddress::parse(&context.local_ip) {
            Some(address) => address,
            None => {
                log::error!(
                    "Skipping permit mode routes: invalid tunnel address '{}'",
                    context.local_ip
                );
                return;
            }
        };

        // The tunnel default route has metric 0. Reinstall it with a low
        // priority so included apps can still reach the tunnel.
        self.delete(&RouteConfiguration {
            destination: NetworkAddress::DEFAULT_IPV4,
            gateway: Some(local_address),
            interface_index: tunnel_index,
            metric: 0,
            is_ipv6: false,
        });
        self.create(&RouteConfiguration {
            destination: NetworkAddress::DEFAULT_IPV4,
            gateway: Some(local_address),
            interface_index: tunnel_index,
            metric: PERMIT_ROUTE_METRIC,
            is_ipv6: false,
        });

        match context.server_gateway_ipv4 {
            Some(server_gateway) => self.create(&RouteConfiguration {
                destination: server_gateway,
                gateway: Some(local_address),
                interface_index: tunnel_index,
                metric: PERMIT_ROUTE_METRIC,
                is_ipv6: false,
            }),
            None => log::warn!("No server gateway known, skipping server gateway route"),
        }

        if context.ipv6_supported {
            self.delete(&RouteConfiguration {
                destination: NetworkAddress::DEFAULT_IPV6,
                gateway: Some(NetworkAddress::DEFAULT_IPV6),
                interface_index: tunnel_index,
                metric: 0,
                is_ipv6: true,
            });
            self.create(&RouteConfiguration {
                destination: NetworkAddress::DEFAULT_IPV6,
                gateway: Some(NetworkAddress::DEFAULT_IPV6),
                interface_index: tunnel_index,
                metric: PERMIT_ROUTE_METRIC,
                is_ipv6: true,
            });

            let interfaces = self.interfaces.interfaces();
            if self
                .ipv6_gateways
                .default_ipv6_gateway(&context.tunnel_interface, &interfaces)
                .is_none()
            {
                // Without a host IPv6 gateway, non-included IPv6 traffic would
                // fall through to the tunnel. Discard it instead.
                match self.ipv6_loopback_route() {
                    Some(route) => self.create(&route),
                    None => log::error!("No loopback interface, IPv6 discard route not created"),
                }
            }
        }

        for address in parse_ips(&context.settings.ips) {
            let gateway = if address.is_ipv6() {
                context.server_gateway_ipv6
            } else {
                Some(local_address)
            };

            if gateway.is_none() {
                log::warn!("No IPv6 tunnel gateway configured, skipping route to {}", address);
                continue;
            }

            self.create(&RouteConfiguration {
                destination: address,
                gateway,
                interface_index: tunnel_index,
                metric: PERMIT_ROUTE_METRIC,
                is_ipv6: address.is_ipv6(),
            });
        }
    }

    fn set_up_block_mode_routes(&self, context: &TunnelRouteContext) {
        let ipv4_gateway = match self
            .ipv4_gateways
            .try_get_best_ipv4_gateway(&context.tunnel_hardware_id)
        {
            Some(info) => info,
            None => return,
        };

        let interfaces = self.interfaces.interfaces();
        let ipv6_gateway = self
            .ipv6_gateways
            .default_ipv6_gateway(&context.tunnel_interface, &interfaces);
        let loopback_index = self.routing_table.loopback_interface_index();

        for address in parse_ips(&context.settings.ips) {
            let gateway = if address.is_ipv6() {
                ipv6_gateway
            } else {
                Some(ipv4_gateway.gateway_address)
            };

            let interface_index = match gateway {
                Some(_) => Some(ipv4_gateway.interface.index),
                None => {
                    log::warn!(
                        "No {} gateway for {}, routing it to the loopback interface",
                        address_family_name(&address),
                        address
                    );
                    loopback_index
                }
            };

            let Some(interface_index) = interface_index else {
                log::error!(
                    "Ignoring route create with IP {} address due to a missing interface index.",
                    address
                );
                continue;
            };

            self.create(&RouteConfiguration {
                destination: address,
                gateway,
                interface_index,
                metric: ipv4_gateway.interface_metric,
                is_ipv6: address.is_ipv6(),
            });
        }
    }

    fn ipv6_loopback_route(&self) -> Option<RouteConfiguration> {
        let loopback_index = self.routing_table.loopback_interface_index()?;
        Some(RouteConfiguration {
            destination: NetworkAddress::DEFAULT_IPV6,
            gateway: None,
            interface_index: loopback_index,
            metric: 0,
            is_ipv6: true,
        })
    }

    fn create(&self, route: &RouteConfiguration) {
        if let Err(e) = self.routing_table.create_route(route) {
            log::error!("Failed to create route {}: {}", route, e);
        }
    }

    fn delete(&self, route: &RouteConfiguration) {
        if let Err(e) = self.routing_table.delete_route(route) {
            log::debug!("Failed to delete route {}: {}", route, e);
        }
    }
}

fn parse_ips(ips: &[String]) -> Vec<NetworkAddress> {
    ips.iter()
        .filter_map(|ip| {
            let address = NetworkAddress::parse(ip);
            if address.is_none() {
                log::warn!("Ignoring invalid split tunnel address '{}'", ip);
            }
            address
        })
        .collect()
}

fn address_family_name(address: &NetworkAddress) -> &'static str {
    if address.is_ipv6() {
        "IPv6"
    } else {
        "IPv4"
    }
}
