//! VPN server endpoint route with crash recovery
//!
//! The route to the VPN server goes through the physical gateway so tunnel
//! packets never loop back into the tunnel. Once a route has been added, its
//! destination is recorded in a JSON file, even when the add itself failed; if
//! the service dies before disconnecting, the next start deletes whatever is
//! still listed there.

use super::gateway::Ipv4GatewayResolver;
use super::{RouteConfiguration, RoutingTable};
use crate::net::{NetworkAddress, SystemInterfaces};
use crate::NetResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One server route recorded for crash recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PersistedServerRoute {
    #[serde(default)]
    pub destination_ip_address: String,
    #[serde(default)]
    pub is_ipv6: bool,
}

impl PersistedServerRoute {
    pub fn new(destination: IpAddr) -> Self {
        Self {
            destination_ip_address: destination.to_string(),
            is_ipv6: destination.is_ipv6(),
        }
    }
}

// Addresses compare case-insensitively: "FE80::1" and "fe80::1" are one route.
impl PartialEq for PersistedServerRoute {
    fn eq(&self, other: &Self) -> bool {
        self.is_ipv6 == other.is_ipv6
            && self
                .destination_ip_address
                .eq_ignore_ascii_case(&other.destination_ip_address)
    }
}

impl Eq for PersistedServerRoute {}

impl Hash for PersistedServerRoute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.destination_ip_address.to_ascii_lowercase().hash(state);
        self.is_ipv6.hash(state);
    }
}

/// JSON file holding the persisted server routes
pub struct RouteStore {
    path: PathBuf,
}

impl RouteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file reads as an empty list. A corrupt file is logged and also
    /// treated as empty so recovery never blocks startup.
    pub fn read(&self) -> Vec<PersistedServerRoute> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("Failed to read {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        if content.trim().is_empty() {
            return Vec::new();
        }

        match serde_json::from_str::<Vec<PersistedServerRoute>>(&content) {
            Ok(routes) => distinct(routes),
            Err(e) => {
                log::warn!("Ignoring malformed route file {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    pub fn write(&self, routes: Vec<PersistedServerRoute>) -> NetResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&distinct(routes))?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

fn distinct(routes: Vec<PersistedServerRoute>) -> Vec<PersistedServerRoute> {
    let mut unique: Vec<PersistedServerRoute> = Vec::with_capacity(routes.len());
    for route in routes {
        if !unique.contains(&route) {
            unique.push(route);
        }
    }
    unique
}

pub struct ServerRouteManager {
    routing_table: Arc<dyn RoutingTable>,
    gateways: Ipv4GatewayResolver,
    tunnel_hardware_id: String,
    /// Serialises every read-modify-write of the route file
    store: Mutex<RouteStore>,
}

impl ServerRouteManager {
    pub fn new(
        routing_table: Arc<dyn RoutingTable>,
        interfaces: Arc<dyn SystemInterfaces>,
        store: RouteStore,
        tunnel_hardware_id: impl Into<String>,
    ) -> Self {
        Self {
            gateways: Ipv4GatewayResolver::new(interfaces, routing_table.clone()),
            routing_table,
            tunnel_hardware_id: tunnel_hardware_id.into(),
            store: Mutex::new(store),
        }
    }

    /// Route the server endpoint through the best physical gateway
    pub fn create_server_route(&self, endpoint_ip: &str) {
        let Some(address) = NetworkAddress::parse(endpoint_ip) else {
            log::warn!("Invalid server address '{}', no server route created", endpoint_ip);
            return;
        };
        let Some(gateway) = self.gateways.try_get_best_ipv4_gateway(&self.tunnel_hardware_id) else {
            return;
        };

        let route = RouteConfiguration {
            destination: address,
            gateway: Some(gateway.gateway_address),
            interface_index: gateway.interface.index,
            metric: gateway.interface_metric,
            is_ipv6: address.is_ipv6(),
        };

        if self.routing_table.route_exists(&route) {
            self.track(address.ip());
            return;
        }

        // A stale route to the same server through another gateway would win
        self.routing_table.delete_routes_to(address.ip());
        if let Err(e) = self.routing_table.create_route(&route) {
            log::error!("Failed to create server route {}: {}", route, e);
        } else {
            log::info!("Server route created: {}", route);
        }
        self.track(address.ip());
    }

    /// Delete the route to `endpoint_ip` and retry every persisted one
    pub fn delete_server_routes(&self, endpoint_ip: &str) {
        if let Some(address) = NetworkAddress::parse(endpoint_ip) {
            if !self.routing_table.delete_routes_to(address.ip()) {
                log::warn!("Server route to {} not deleted, keeping it for recovery", address.ip());
                self.track(address.ip());
            }
        }

        self.delete_persisted_routes();
    }

    /// Startup recovery: delete every route left over from a previous run
    pub fn cleanup_persisted_routes(&self) {
        self.delete_persisted_routes();
    }

    fn delete_persisted_routes(&self) {
        let store = self.store.lock();
        let routes = store.read();
        if routes.is_empty() {
            return;
        }

        let total = routes.len();
        let remaining: Vec<PersistedServerRoute> = routes
            .into_iter()
            .filter(|route| !self.try_delete_persisted_route(route))
            .collect();

        log::info!(
            "Persisted server routes: {} deleted, {} remaining",
            total - remaining.len(),
            remaining.len()
        );

        if let Err(e) = store.write(remaining) {
            log::error!("Failed to write {}: {}", store.path().display(), e);
        }
    }

    fn try_delete_persisted_route(&self, route: &PersistedServerRoute) -> bool {
        let address = route.destination_ip_address.trim();
        if address.is_empty() {
            return false;
        }
        match address.parse::<IpAddr>() {
            Ok(ip) => self.routing_table.delete_routes_to(ip),
            Err(_) => {
                log::warn!("Persisted server route has invalid address '{}'", address);
                false
            }
        }
    }

    fn track(&self, destination: IpAddr) {
        let store = self.store.lock();
        let mut routes = store.read();
        let route = PersistedServerRoute::new(destination);
        if routes.contains(&route) {
            return;
        }

        routes.push(route);
        if let Err(e) = store.write(routes) {
            log::error!("Failed to persist server route {}: {}", destination, e);
        }
    }
}
