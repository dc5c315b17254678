//! Split tunnel controller driven through a full connection lifecycle

use parking_lot::Mutex;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tunnelctl_core::filter::{AppFilterRules, FilterAction, Layer, RemoteAddressRules, SplitTunnelClient};
use tunnelctl_core::net::{NetworkInterface, SystemInterfaces};
use tunnelctl_core::{
    NetResult, SplitTunnel, SplitTunnelConfig, SplitTunnelMode, SplitTunnelSettings, SplitTunnelState, VpnErrorKind,
    VpnProtocol, VpnState, VpnStatus,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Exclude(Vec<String>, Ipv4Addr, Option<Ipv6Addr>),
    Include(Vec<String>, Ipv4Addr, Option<Ipv6Addr>),
    Disable,
    AddApps(Vec<String>, Vec<(Layer, FilterAction)>),
    RemoveAllApps,
    AddAddresses(Vec<String>, FilterAction),
    RemoveAllAddresses,
}

#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.0.lock())
    }
}

struct Client(Journal);

impl SplitTunnelClient for Client {
    fn enable_exclude_mode(&mut self, app_paths: &[String], local_ipv4: Ipv4Addr, local_ipv6: Option<Ipv6Addr>) {
        self.0.push(Call::Exclude(app_paths.to_vec(), local_ipv4, local_ipv6));
    }

    fn enable_include_mode(&mut self, app_paths: &[String], tunnel_ipv4: Ipv4Addr, tunnel_ipv6: Option<Ipv6Addr>) {
        self.0.push(Call::Include(app_paths.to_vec(), tunnel_ipv4, tunnel_ipv6));
    }

    fn disable(&mut self) {
        self.0.push(Call::Disable);
    }
}

struct Apps(Journal);

impl AppFilterRules for Apps {
    fn add(&self, paths: &[String], filters: &[(Layer, FilterAction)]) -> NetResult<()> {
        self.0.push(Call::AddApps(paths.to_vec(), filters.to_vec()));
        Ok(())
    }

    fn remove(&self, _path: &str) {}

    fn remove_all(&self) {
        self.0.push(Call::RemoveAllApps);
    }
}

struct Addresses(Journal);

impl RemoteAddressRules for Addresses {
    fn add(&self, ips: &[String], action: FilterAction) -> NetResult<()> {
        self.0.push(Call::AddAddresses(ips.to_vec(), action));
        Ok(())
    }

    fn remove(&self, _ip: &str) {}

    fn remove_all(&self) {
        self.0.push(Call::RemoveAllAddresses);
    }
}

struct Host;

impl SystemInterfaces for Host {
    fn interfaces(&self) -> Vec<NetworkInterface> {
        vec![ethernet()]
    }

    fn best_interface_excluding(&self, _excluded_hardware_id: &str) -> Option<NetworkInterface> {
        Some(ethernet())
    }
}

fn ethernet() -> NetworkInterface {
    NetworkInterface {
        index: 7,
        id: "{ETH}".to_string(),
        hardware_id: "pci\\ven_10ec".to_string(),
        default_gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
        unicast_addresses: vec!["192.168.1.10".parse().unwrap()],
        ..Default::default()
    }
}

fn split_tunnel(journal: &Journal) -> SplitTunnel {
    SplitTunnel::new(
        Box::new(Client(journal.clone())),
        Arc::new(Apps(journal.clone())),
        Arc::new(Addresses(journal.clone())),
        Arc::new(Host),
        SplitTunnelConfig {
            tunnel_hardware_id: "wintun".to_string(),
            default_client_ipv6: Some("fd00::2".parse().unwrap()),
        },
    )
}

fn state(status: VpnStatus, protocol: VpnProtocol) -> VpnState {
    VpnState::new(status, VpnErrorKind::None, "10.2.0.2", "185.159.1.1", 51820, protocol)
}

fn app_a() -> Vec<String> {
    vec!["C:\\Apps\\appA.exe".to_string()]
}

#[test]
fn test_permit_mode_lifecycle() {
    let journal = Journal::default();
    let settings = SplitTunnelSettings::new(SplitTunnelMode::Permit, app_a(), vec![]);
    let mut tunnel = split_tunnel(&journal);

    tunnel.on_vpn_connecting(&state(VpnStatus::Connecting, VpnProtocol::WireGuardUdp), &settings);
    assert_eq!(
        journal.take(),
        vec![
            Call::RemoveAllApps,
            Call::RemoveAllAddresses,
            Call::AddApps(
                app_a(),
                vec![
                    (Layer::AppAuthConnectV4, FilterAction::SoftBlock),
                    (Layer::AppAuthConnectV6, FilterAction::SoftBlock),
                ]
            ),
        ]
    );
    assert_eq!(tunnel.state(), SplitTunnelState::Connecting);

    tunnel.on_vpn_connected(&state(VpnStatus::Connected, VpnProtocol::WireGuardUdp), &settings);
    assert_eq!(
        journal.take(),
        vec![
            Call::RemoveAllApps,
            Call::Include(app_a(), Ipv4Addr::new(10, 2, 0, 2), Some("fd00::2".parse().unwrap())),
        ]
    );
    assert!(tunnel.is_reverse_enabled());

    tunnel.on_vpn_disconnected(&state(VpnStatus::Disconnected, VpnProtocol::WireGuardUdp));
    assert_eq!(journal.take(), vec![Call::Disable, Call::RemoveAllApps]);
    assert_eq!(tunnel.state(), SplitTunnelState::Idle);
    assert!(!tunnel.is_reverse_enabled());
}

#[test]
fn test_permit_mode_over_openvpn_blocks_ipv6() {
    let journal = Journal::default();
    let settings = SplitTunnelSettings::new(SplitTunnelMode::Permit, app_a(), vec![]);
    let mut tunnel = split_tunnel(&journal);

    tunnel.on_vpn_connected(&state(VpnStatus::Connected, VpnProtocol::OpenVpnUdp), &settings);

    assert_eq!(
        journal.take(),
        vec![
            Call::RemoveAllApps,
            Call::AddApps(app_a(), vec![(Layer::AppAuthConnectV6, FilterAction::HardBlock)]),
            Call::Include(app_a(), Ipv4Addr::new(10, 2, 0, 2), None),
        ]
    );
}

#[test]
fn test_block_mode_lifecycle() {
    let journal = Journal::default();
    let ips = vec!["8.8.8.8".to_string(), "10.0.0.0/8".to_string()];
    let settings = SplitTunnelSettings::new(SplitTunnelMode::Block, app_a(), ips.clone());
    let mut tunnel = split_tunnel(&journal);

    tunnel.on_vpn_connecting(&state(VpnStatus::Connecting, VpnProtocol::WireGuardUdp), &settings);
    assert_eq!(journal.take(), vec![Call::RemoveAllApps, Call::RemoveAllAddresses]);

    tunnel.on_vpn_connected(&state(VpnStatus::Connected, VpnProtocol::WireGuardUdp), &settings);
    assert_eq!(
        journal.take(),
        vec![
            Call::Exclude(app_a(), Ipv4Addr::new(192, 168, 1, 10), None),
            Call::AddApps(
                app_a(),
                vec![
                    (Layer::AppAuthConnectV4, FilterAction::HardPermit),
                    (Layer::AppAuthConnectV6, FilterAction::HardBlock),
                ]
            ),
            Call::AddAddresses(ips, FilterAction::HardPermit),
        ]
    );
    assert!(tunnel.is_enabled());
    assert_eq!(tunnel.state(), SplitTunnelState::Connected(SplitTunnelMode::Block));

    tunnel.on_vpn_disconnected(&state(VpnStatus::Disconnected, VpnProtocol::WireGuardUdp));
    assert_eq!(
        journal.take(),
        vec![
            Call::Disable,
            Call::RemoveAllApps,
            Call::RemoveAllAddresses,
            Call::RemoveAllApps,
        ]
    );
    assert!(!tunnel.is_enabled());
}

#[test]
fn test_error_disconnect_keeps_filters() {
    let journal = Journal::default();
    let settings = SplitTunnelSettings::new(SplitTunnelMode::Block, app_a(), vec![]);
    let mut tunnel = split_tunnel(&journal);
    tunnel.on_vpn_connected(&state(VpnStatus::Connected, VpnProtocol::WireGuardUdp), &settings);
    journal.take();

    let mut failed = state(VpnStatus::Disconnected, VpnProtocol::WireGuardUdp);
    failed.error = VpnErrorKind::TimeoutError;
    tunnel.on_vpn_disconnected(&failed);

    assert!(journal.take().is_empty());
    assert!(tunnel.is_enabled());
}
