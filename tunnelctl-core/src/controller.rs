//! Split tunnel state machine
//!
//! Drives the redirect filters, app filters and permitted addresses through
//! the VPN lifecycle. Each transition gets the settings snapshot taken for it
//! by the caller, so routes and filters never disagree on the mode.
//!
//! - `Permit` (include): connecting soft-blocks the listed apps so they cannot
//!   leak before the tunnel is up; once connected their connects are
//!   redirected to the tunnel address.
//! - `Block` (exclude): once connected the listed apps are redirected to the
//!   host's best physical address and the listed IPs get hard permits.
//!
//! A disconnect caused by an error leaves every filter in place.

use crate::filter::{AppFilterRules, FilterAction, Layer, RemoteAddressRules, SplitTunnelClient};
use crate::model::{SplitTunnelMode, SplitTunnelSettings, VpnState};
use crate::net::SystemInterfaces;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Static inputs of the controller
#[derive(Debug, Clone, Default)]
pub struct SplitTunnelConfig {
    /// Tunnel adapter, never picked as the "best" physical interface
    pub tunnel_hardware_id: String,
    /// IPv6 address WireGuard assigns to every client inside the tunnel
    pub default_client_ipv6: Option<Ipv6Addr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitTunnelState {
    Idle,
    Connecting,
    Connected(SplitTunnelMode),
}

pub struct SplitTunnel {
    client: Box<dyn SplitTunnelClient>,
    app_filter: Arc<dyn AppFilterRules>,
    permitted_addresses: Arc<dyn RemoteAddressRules>,
    interfaces: Arc<dyn SystemInterfaces>,
    config: SplitTunnelConfig,
    /// Exclude mode filters are installed
    enabled: bool,
    /// Include mode filters are installed
    reverse_enabled: bool,
    state: SplitTunnelState,
}

impl SplitTunnel {
    pub fn new(
        client: Box<dyn SplitTunnelClient>,
        app_filter: Arc<dyn AppFilterRules>,
        permitted_addresses: Arc<dyn RemoteAddressRules>,
        interfaces: Arc<dyn SystemInterfaces>,
        config: SplitTunnelConfig,
    ) -> Self {
        Self {
            client,
            app_filter,
            permitted_addresses,
            interfaces,
            config,
            enabled: false,
            reverse_enabled: false,
            state: SplitTunnelState::Idle,
        }
    }

    pub fn state(&self) -> SplitTunnelState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_reverse_enabled(&self) -> bool {
        self.reverse_enabled
    }

    pub fn on_vpn_connecting(&mut self, _state: &VpnState, settings: &SplitTunnelSettings) {
        self.disable_reversed();
        self.disable();

        self.app_filter.remove_all();
        self.permitted_addresses.remove_all();

        if settings.mode == SplitTunnelMode::Permit {
            self.add_app_filters(
                &settings.app_paths,
                &[
                    (Layer::AppAuthConnectV4, FilterAction::SoftBlock),
                    (Layer::AppAuthConnectV6, FilterAction::SoftBlock),
                ],
            );
        }

        self.state = SplitTunnelState::Connecting;
    }

    pub fn on_vpn_connected(&mut self, state: &VpnState, settings: &SplitTunnelSettings) {
        match settings.mode {
            SplitTunnelMode::Disabled => {}
            SplitTunnelMode::Block => {
                self.disable_reversed();
                self.enable(settings);
            }
            SplitTunnelMode::Permit => {
                self.app_filter.remove_all();
                self.disable();
                self.enable_reversed(settings, state);
            }
        }

        self.state = SplitTunnelState::Connected(settings.mode);
    }

    pub fn on_vpn_disconnected(&mut self, state: &VpnState) {
        if !state.is_clean_disconnect() {
            log::warn!(
                "SplitTunnel: Disconnected with error {:?}, keeping split tunnel filters",
                state.error
            );
            return;
        }

        self.disable();
        self.disable_reversed();
        self.app_filter.remove_all();
        self.state = SplitTunnelState::Idle;
    }

    pub fn assigning_ip(&mut self, _state: &VpnState) {}

    fn enable(&mut self, settings: &SplitTunnelSettings) {
        let best_interface = self
            .interfaces
            .best_interface_excluding(&self.config.tunnel_hardware_id);
        let local_ipv4 = best_interface
            .as_ref()
            .and_then(|interface| interface.preferred_ipv4_address());
        let local_ipv6 = best_interface
            .as_ref()
            .filter(|interface| !interface.id.is_empty())
            .and_then(|interface| interface.preferred_ipv6_unicast_address());

        match local_ipv4 {
            Some(ipv4) => self.client.enable_exclude_mode(&settings.app_paths, ipv4, local_ipv6),
            None => log::error!("SplitTunnel: No physical IPv4 address found, apps cannot be excluded"),
        }

        if !settings.app_paths.is_empty() {
            let ipv6_action = match local_ipv6 {
                Some(_) => FilterAction::HardPermit,
                None => FilterAction::HardBlock,
            };
            self.add_app_filters(
                &settings.app_paths,
                &[
                    (Layer::AppAuthConnectV4, FilterAction::HardPermit),
                    (Layer::AppAuthConnectV6, ipv6_action),
                ],
            );
        }

        if !settings.ips.is_empty() {
            if let Err(e) = self.permitted_addresses.add(&settings.ips, FilterAction::HardPermit) {
                log::error!("SplitTunnel: Failed to permit excluded addresses: {}", e);
            }
        }

        self.enabled = true;
    }

    fn disable(&mut self) {
        if self.enabled {
            self.client.disable();
            self.app_filter.remove_all();
            self.permitted_addresses.remove_all();
            self.enabled = false;
        }
    }

    fn enable_reversed(&mut self, settings: &SplitTunnelSettings, state: &VpnState) {
        let mut tunnel_ipv6 = None;
        if state.protocol.is_wireguard() {
            tunnel_ipv6 = self.config.default_client_ipv6;
        } else if state.protocol.is_openvpn() {
            // OpenVPN servers hand out no global IPv6, so tunnelled apps get none
            self.add_app_filters(
                &settings.app_paths,
                &[(Layer::AppAuthConnectV6, FilterAction::HardBlock)],
            );
        }

        let tunnel_ipv4 = match state.local_ip.parse::<Ipv4Addr>() {
            Ok(ip) => ip,
            Err(_) => {
                log::error!(
                    "SplitTunnel: Invalid tunnel address '{}', include mode not enabled",
                    state.local_ip
                );
                return;
            }
        };

        self.client
            .enable_include_mode(&settings.app_paths, tunnel_ipv4, tunnel_ipv6);
        self.reverse_enabled = true;
    }

    fn disable_reversed(&mut self) {
        if self.reverse_enabled {
            self.client.disable();
            self.reverse_enabled = false;
        }
    }

    fn add_app_filters(&self, paths: &[String], filters: &[(Layer, FilterAction)]) {
        if let Err(e) = self.app_filter.add(paths, filters) {
            log::error!("SplitTunnel: Failed to add app filters: {}", e);
        }
    }
}
