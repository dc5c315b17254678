//! Wiring of the control plane onto the platform backends

use anyhow::{Context, Result};
use crossbeam_channel::{select, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tunnelctl_core::filter::{
    AppFilter, DisplayData, DynamicSublayer, FilterEngine, FilterSplitTunnelClient, PermittedRemoteAddress,
    SplitTunnelFilters, FIREWALL_SUBLAYER_WEIGHT,
};
use tunnelctl_core::monitor::{InterfaceForwardingMonitor, NetworkEvent, NotificationRegistrar, RouteChangeMonitor};
use tunnelctl_core::net::{IpInterfaceTable, NetworkAddress, SystemInterfaces};
use tunnelctl_core::routing::{RouteStore, RoutingTable, ServerRouteManager, SplitTunnelRouting};
use tunnelctl_core::service::{ServiceController, ServiceManager, TunnelServiceLauncher};
use tunnelctl_core::{
    ControlPlaneConfig, FileSettingsSource, NetworkControlPlane, ServiceConfig, SplitTunnel, SplitTunnelConfig,
};

/// OS backends used by the control plane
#[derive(Clone)]
pub struct Platform {
    pub interfaces: Arc<dyn SystemInterfaces>,
    pub routing_table: Arc<dyn RoutingTable>,
    pub ip_interfaces: Arc<dyn IpInterfaceTable>,
    pub filter_engine: Arc<dyn FilterEngine>,
    pub registrar: Arc<dyn NotificationRegistrar>,
    pub service_manager: Arc<dyn ServiceManager>,
}

impl Platform {
    #[cfg(windows)]
    pub fn native() -> Result<Self> {
        use tunnelctl_core::filter::wfp::WfpEngine;
        use tunnelctl_core::monitor::windows::WindowsNotificationRegistrar;
        use tunnelctl_core::net::windows::{WindowsInterfaces, WindowsIpInterfaceTable};
        use tunnelctl_core::routing::windows::WindowsRoutingTable;
        use tunnelctl_core::service::windows::ScmServiceManager;

        Ok(Self {
            interfaces: Arc::new(WindowsInterfaces::new()),
            routing_table: Arc::new(WindowsRoutingTable::new()),
            ip_interfaces: Arc::new(WindowsIpInterfaceTable::new()),
            filter_engine: Arc::new(WfpEngine::new()),
            registrar: Arc::new(WindowsNotificationRegistrar::new()),
            service_manager: Arc::new(ScmServiceManager::new()),
        })
    }

    #[cfg(not(windows))]
    pub fn native() -> Result<Self> {
        anyhow::bail!("the network control plane is only supported on Windows")
    }
}

pub fn control_plane_config(config: &ServiceConfig) -> ControlPlaneConfig {
    ControlPlaneConfig {
        tunnel_hardware_id: config.tunnel_hardware_id.clone(),
        server_gateway_ipv4: config
            .wireguard
            .server_gateway_ipv4()
            .map(|ip| NetworkAddress::host(ip.into())),
        server_gateway_ipv6: config
            .wireguard
            .server_gateway_ipv6()
            .map(|ip| NetworkAddress::host(ip.into())),
        apply_interface_policy: config.apply_interface_policy,
    }
}

pub fn split_tunnel_config(config: &ServiceConfig) -> SplitTunnelConfig {
    SplitTunnelConfig {
        tunnel_hardware_id: config.tunnel_hardware_id.clone(),
        default_client_ipv6: config.wireguard.client_ipv6(),
    }
}

pub fn server_route_manager(platform: &Platform, config: &ServiceConfig) -> ServerRouteManager {
    ServerRouteManager::new(
        platform.routing_table.clone(),
        platform.interfaces.clone(),
        RouteStore::new(&config.server_routes_file),
        config.tunnel_hardware_id.clone(),
    )
}

pub fn build_control_plane(platform: &Platform, config: &ServiceConfig) -> Result<NetworkControlPlane> {
    let firewall = Arc::new(
        DynamicSublayer::open(
            platform.filter_engine.as_ref(),
            &DisplayData::new("TunnelCtl firewall", "TunnelCtl split tunnel app and address rules"),
            FIREWALL_SUBLAYER_WEIGHT,
        )
        .context("Failed to open the firewall sublayer")?,
    );

    let client = FilterSplitTunnelClient::new(SplitTunnelFilters::with_sublayer_weight(
        platform.filter_engine.clone(),
        config.split_tunnel_sublayer_weight,
    ));
    let settings = Arc::new(FileSettingsSource::new(&config.split_tunnel_settings_file));

    let split_tunnel = SplitTunnel::new(
        Box::new(client),
        Arc::new(AppFilter::new(firewall.clone())),
        Arc::new(PermittedRemoteAddress::new(firewall)),
        platform.interfaces.clone(),
        split_tunnel_config(config),
    );

    Ok(NetworkControlPlane::new(
        split_tunnel,
        SplitTunnelRouting::new(platform.routing_table.clone(), platform.interfaces.clone()),
        Arc::new(server_route_manager(platform, config)),
        platform.interfaces.clone(),
        platform.ip_interfaces.clone(),
        settings,
        control_plane_config(config),
    ))
}

pub fn tunnel_launcher(platform: &Platform, config: &ServiceConfig) -> TunnelServiceLauncher {
    TunnelServiceLauncher::new(
        ServiceController::new(platform.service_manager.clone(), config.wireguard.service_name.clone()),
        config.wireguard.executable_path.clone(),
        config.wireguard.config_file.clone(),
    )
}

/// Route and forwarding monitors plus the thread logging their events
pub struct NetworkMonitors {
    routes: RouteChangeMonitor,
    forwarding: InterfaceForwardingMonitor,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NetworkMonitors {
    pub fn start(platform: &Platform) -> Result<Self> {
        let routes = RouteChangeMonitor::new(platform.registrar.clone());
        let forwarding = InterfaceForwardingMonitor::new(platform.registrar.clone(), platform.ip_interfaces.clone());
        let route_events = routes.subscribe();
        let forwarding_events = forwarding.subscribe();

        routes.start();
        forwarding.start();

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread = std::thread::Builder::new()
            .name("network-events".to_string())
            .spawn(move || log_network_events(route_events, forwarding_events, thread_running))
            .context("Failed to spawn the network event thread")?;

        Ok(Self {
            routes,
            forwarding,
            running,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.routes.stop();
        self.forwarding.stop();
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for NetworkMonitors {
    fn drop(&mut self) {
        self.stop();
    }
}

fn log_network_events(routes: Receiver<NetworkEvent>, forwarding: Receiver<NetworkEvent>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        select! {
            recv(routes) -> event => match event {
                Ok(NetworkEvent::RouteChanged(kind)) => log::debug!("Route table changed: {:?}", kind),
                Ok(other) => log::debug!("Unexpected route event: {:?}", other),
                Err(_) => break,
            },
            recv(forwarding) -> event => match event {
                Ok(NetworkEvent::ForwardingEnabled { interface_index }) => {
                    log::warn!("IP forwarding enabled on interface {}", interface_index)
                }
                Ok(other) => log::debug!("Unexpected interface event: {:?}", other),
                Err(_) => break,
            },
            default(Duration::from_millis(500)) => {}
        }
    }
}
