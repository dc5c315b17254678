//! Shared data model
//!
//! Split tunnel settings snapshots and the VPN state handed to the control
//! plane by the connection manager.

use serde::{Deserialize, Serialize};

/// Split tunnel mode
///
/// - `Permit`: only the listed apps/IPs use the tunnel (include, "reversed").
/// - `Block`: the listed apps/IPs bypass the tunnel (exclude).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitTunnelMode {
    #[default]
    Disabled,
    Permit,
    Block,
}

/// Split tunnel configuration snapshot, re-read on every lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SplitTunnelSettings {
    #[serde(default)]
    pub mode: SplitTunnelMode,
    /// Executable paths, in the order the user added them
    #[serde(default)]
    pub app_paths: Vec<String>,
    /// Addresses or CIDR ranges
    #[serde(default)]
    pub ips: Vec<String>,
}

impl SplitTunnelSettings {
    pub fn new(mode: SplitTunnelMode, app_paths: Vec<String>, ips: Vec<String>) -> Self {
        Self {
            mode,
            app_paths: dedup_ordered(app_paths),
            ips: dedup_ordered(ips),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

fn dedup_ordered(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Source of split tunnel settings (the external settings store)
pub trait SplitTunnelSettingsSource: Send + Sync {
    fn split_tunnel_settings(&self) -> SplitTunnelSettings;
}

/// Fixed settings, mostly useful for tests and one-shot tools
impl SplitTunnelSettingsSource for SplitTunnelSettings {
    fn split_tunnel_settings(&self) -> SplitTunnelSettings {
        self.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VpnStatus {
    #[default]
    Disconnected,
    Connecting,
    AssigningIp,
    Connected,
    Disconnecting,
}

/// Reason attached to a state change. `None` on a disconnect means the user asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VpnErrorKind {
    #[default]
    None,
    Unknown,
    NetworkUnavailable,
    AuthorizationFailed,
    TlsCertificateError,
    TimeoutError,
    AdapterError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VpnProtocol {
    #[default]
    Smart,
    WireGuardUdp,
    WireGuardTcp,
    WireGuardTls,
    OpenVpnUdp,
    OpenVpnTcp,
}

impl VpnProtocol {
    pub fn is_wireguard(&self) -> bool {
        matches!(
            self,
            VpnProtocol::WireGuardUdp | VpnProtocol::WireGuardTcp | VpnProtocol::WireGuardTls
        )
    }

    pub fn is_openvpn(&self) -> bool {
        matches!(self, VpnProtocol::OpenVpnUdp | VpnProtocol::OpenVpnTcp)
    }
}

/// State reported by the tunnel data plane
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VpnState {
    pub status: VpnStatus,
    #[serde(default)]
    pub error: VpnErrorKind,
    /// Address assigned to us inside the tunnel
    #[serde(default)]
    pub local_ip: String,
    /// VPN server endpoint address
    #[serde(default)]
    pub remote_ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub protocol: VpnProtocol,
}

impl VpnState {
    pub fn new(
        status: VpnStatus,
        error: VpnErrorKind,
        local_ip: &str,
        remote_ip: &str,
        port: u16,
        protocol: VpnProtocol,
    ) -> Self {
        Self {
            status,
            error,
            local_ip: local_ip.to_string(),
            remote_ip: remote_ip.to_string(),
            port,
            protocol,
        }
    }

    /// Disconnect requested by the user, as opposed to a tunnel failure
    pub fn is_clean_disconnect(&self) -> bool {
        self.error == VpnErrorKind::None
    }
}
