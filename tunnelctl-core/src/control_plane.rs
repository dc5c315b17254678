//! Lifecycle orchestration
//!
//! [`NetworkControlPlane`] sequences every component for one VPN state change.
//! [`LifecycleDispatcher`] owns it on a dedicated thread and feeds it through a
//! channel, so state changes from any thread are applied one at a time.

use crate::controller::SplitTunnel;
use crate::model::{SplitTunnelMode, SplitTunnelSettings, SplitTunnelSettingsSource, VpnState, VpnStatus};
use crate::net::{IpInterfaceTable, NetworkAddress, NetworkInterface, SystemInterfaces};
use crate::policy::InterfacePolicyLease;
use crate::routing::{ServerRouteManager, SplitTunnelRouting, TunnelRouteContext};
use crate::NetResult;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct ControlPlaneConfig {
    pub tunnel_hardware_id: String,
    /// Gateway of the VPN server inside the tunnel
    pub server_gateway_ipv4: Option<NetworkAddress>,
    pub server_gateway_ipv6: Option<NetworkAddress>,
    /// Disable weak host send/receive on the tunnel interface while connected
    pub apply_interface_policy: bool,
}

pub struct NetworkControlPlane {
    split_tunnel: SplitTunnel,
    routing: SplitTunnelRouting,
    server_routes: Arc<ServerRouteManager>,
    interfaces: Arc<dyn SystemInterfaces>,
    ip_interfaces: Arc<dyn IpInterfaceTable>,
    settings: Arc<dyn SplitTunnelSettingsSource>,
    config: ControlPlaneConfig,
    lease: Option<InterfacePolicyLease>,
    /// Settings the current split tunnel routes were created for
    routed_settings: Option<SplitTunnelSettings>,
}

impl NetworkControlPlane {
    pub fn new(
        split_tunnel: SplitTunnel,
        routing: SplitTunnelRouting,
        server_routes: Arc<ServerRouteManager>,
        interfaces: Arc<dyn SystemInterfaces>,
        ip_interfaces: Arc<dyn IpInterfaceTable>,
        settings: Arc<dyn SplitTunnelSettingsSource>,
        config: ControlPlaneConfig,
    ) -> Self {
        Self {
            split_tunnel,
            routing,
            server_routes,
            interfaces,
            ip_interfaces,
            settings,
            config,
            lease: None,
            routed_settings: None,
        }
    }

    pub fn split_tunnel(&self) -> &SplitTunnel {
        &self.split_tunnel
    }

    pub fn has_interface_lease(&self) -> bool {
        self.lease.is_some()
    }

    /// Crash recovery, run once before the first lifecycle event
    pub fn cleanup_persisted_routes(&self) {
        self.server_routes.cleanup_persisted_routes();
    }

    pub fn handle(&mut self, state: &VpnState) {
        log::info!("Control plane: VPN state {:?} ({:?})", state.status, state.error);

        match state.status {
            VpnStatus::Connecting => {
                let settings = self.settings.split_tunnel_settings();
                self.on_connecting(state, &settings);
            }
            VpnStatus::AssigningIp => self.split_tunnel.assigning_ip(state),
            VpnStatus::Connected => {
                // One snapshot for routes and filters alike
                let settings = self.settings.split_tunnel_settings();
                self.on_connected(state, &settings);
            }
            VpnStatus::Disconnected => self.on_disconnected(state),
            VpnStatus::Disconnecting => {}
        }
    }

    fn on_connecting(&mut self, state: &VpnState, settings: &SplitTunnelSettings) {
        // Routes left behind by a connection that never disconnected cleanly
        self.delete_split_tunnel_routes();
        self.split_tunnel.on_vpn_connecting(state, settings);
    }

    fn on_connected(&mut self, state: &VpnState, settings: &SplitTunnelSettings) {
        self.server_routes.create_server_route(&state.remote_ip);

        match self.tunnel_interface() {
            Some(tunnel) => {
                self.acquire_interface_lease(&tunnel);
                self.set_up_routes(&tunnel, state, settings);
            }
            None => log::error!(
                "Tunnel adapter '{}' not found, skipping interface policy and split tunnel routes",
                self.config.tunnel_hardware_id
            ),
        }

        self.split_tunnel.on_vpn_connected(state, settings);
    }

    fn on_disconnected(&mut self, state: &VpnState) {
        self.server_routes.delete_server_routes(&state.remote_ip);
        self.delete_split_tunnel_routes();

        if let Some(mut lease) = self.lease.take() {
            lease.dispose();
        }

        self.split_tunnel.on_vpn_disconnected(state);
    }

    /// Undo what has no crash recovery before the service exits: the
    /// interface policy and the split tunnel routes. Server routes stay
    /// persisted for the next start.
    pub fn release(&mut self) {
        self.delete_split_tunnel_routes();
        if let Some(mut lease) = self.lease.take() {
            lease.dispose();
        }
    }

    fn tunnel_interface(&self) -> Option<NetworkInterface> {
        self.interfaces
            .interface_by_hardware_id(&self.config.tunnel_hardware_id)
    }

    fn acquire_interface_lease(&mut self, tunnel: &NetworkInterface) {
        if !self.config.apply_interface_policy {
            return;
        }
        if let Some(lease) = &self.lease {
            if lease.interface_index() == tunnel.index {
                return;
            }
        }

        if let Some(mut previous) = self.lease.take() {
            previous.dispose();
        }
        self.lease = Some(InterfacePolicyLease::acquire(self.ip_interfaces.clone(), tunnel.index));
    }

    fn set_up_routes(&mut self, tunnel: &NetworkInterface, state: &VpnState, settings: &SplitTunnelSettings) {
        self.delete_split_tunnel_routes();

        if settings.mode == SplitTunnelMode::Disabled {
            return;
        }

        let context = TunnelRouteContext {
            tunnel_interface: tunnel.clone(),
            tunnel_hardware_id: self.config.tunnel_hardware_id.clone(),
            local_ip: state.local_ip.clone(),
            server_gateway_ipv4: self.config.server_gateway_ipv4,
            server_gateway_ipv6: self.config.server_gateway_ipv6,
            settings: settings.clone(),
            ipv6_supported: state.protocol.is_wireguard(),
        };
        self.routing.set_up_routing_table(&context);
        self.routed_settings = Some(settings.clone());
    }

    fn delete_split_tunnel_routes(&mut self) {
        if let Some(settings) = self.routed_settings.take() {
            self.routing.delete_routes(&settings);
        }
    }
}

enum LifecycleCommand {
    State(VpnState),
    Shutdown,
}

/// Runs the control plane on its own thread
pub struct LifecycleDispatcher {
    sender: Sender<LifecycleCommand>,
    thread: Option<JoinHandle<NetworkControlPlane>>,
}

impl LifecycleDispatcher {
    pub fn start(control_plane: NetworkControlPlane) -> NetResult<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();

        let thread = std::thread::Builder::new()
            .name("control-plane".to_string())
            .spawn(move || run_dispatch_loop(control_plane, receiver))?;

        log::info!("Lifecycle dispatcher started");
        Ok(Self {
            sender,
            thread: Some(thread),
        })
    }

    /// Queue a state change. Returns false once the dispatcher has stopped.
    pub fn dispatch(&self, state: VpnState) -> bool {
        self.sender.send(LifecycleCommand::State(state)).is_ok()
    }

    /// Apply every queued state change, stop the thread and hand back the
    /// control plane
    pub fn shutdown(mut self) -> Option<NetworkControlPlane> {
        self.stop()
    }

    fn stop(&mut self) -> Option<NetworkControlPlane> {
        let thread = self.thread.take()?;
        let _ = self.sender.send(LifecycleCommand::Shutdown);
        match thread.join() {
            Ok(control_plane) => {
                log::info!("Lifecycle dispatcher stopped");
                Some(control_plane)
            }
            Err(_) => {
                log::error!("Lifecycle dispatcher thread panicked");
                None
            }
        }
    }
}

impl Drop for LifecycleDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_dispatch_loop(mut control_plane: NetworkControlPlane, receiver: Receiver<LifecycleCommand>) -> NetworkControlPlane {
    for command in receiver.iter() {
        match command {
            LifecycleCommand::State(state) => {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| control_plane.handle(&state)));
                if result.is_err() {
                    log::error!("Control plane panicked while handling {:?}", state.status);
                }
            }
            LifecycleCommand::Shutdown => break,
        }
    }
    control_plane
}
