//! Service configuration
//!
//! Loaded from `<config_dir>/TunnelCtl/service.json`. Every field has a
//! default, so a missing or partial file is fine; a malformed one is logged
//! and replaced by the defaults.

use crate::filter::session::SPLIT_TUNNEL_SUBLAYER_WEIGHT;
use crate::model::{SplitTunnelSettings, SplitTunnelSettingsSource};
use crate::NetResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

const APP_NAME: &str = "TunnelCtl";
const CONFIG_FILE: &str = "service.json";
const SERVER_ROUTES_FILE: &str = "ServerRoutes.json";
const SPLIT_TUNNEL_FILE: &str = "SplitTunnel.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireGuardConfig {
    /// Client address inside every WireGuard tunnel
    pub default_client_ipv6: String,
    pub default_server_gateway_ipv4: String,
    pub default_server_gateway_ipv6: String,
    pub service_name: String,
    /// Tunnel service executable, started with the config file and transport
    pub executable_path: PathBuf,
    pub config_file: PathBuf,
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            default_client_ipv6: "fd00::2".to_string(),
            default_server_gateway_ipv4: "10.2.0.1".to_string(),
            default_server_gateway_ipv6: "fd00::1".to_string(),
            service_name: "TunnelCtlWireGuard".to_string(),
            executable_path: PathBuf::from("tunnelctl-wireguard.exe"),
            config_file: data_dir().join("WireGuard").join("tunnel.conf"),
        }
    }
}

impl WireGuardConfig {
    pub fn client_ipv6(&self) -> Option<Ipv6Addr> {
        parse_or_warn(&self.default_client_ipv6, "default_client_ipv6")
    }

    pub fn server_gateway_ipv4(&self) -> Option<Ipv4Addr> {
        parse_or_warn(&self.default_server_gateway_ipv4, "default_server_gateway_ipv4")
    }

    pub fn server_gateway_ipv6(&self) -> Option<Ipv6Addr> {
        parse_or_warn(&self.default_server_gateway_ipv6, "default_server_gateway_ipv6")
    }
}

fn parse_or_warn<T: std::str::FromStr>(value: &str, field: &str) -> Option<T> {
    if value.is_empty() {
        return None;
    }
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("Ignoring invalid {} '{}'", field, value);
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Hardware id of the tunnel adapter, excluded from gateway resolution
    pub tunnel_hardware_id: String,
    pub server_routes_file: PathBuf,
    /// Split tunnel settings written by the client app
    pub split_tunnel_settings_file: PathBuf,
    pub wireguard: WireGuardConfig,
    pub split_tunnel_sublayer_weight: u16,
    pub log_level: String,
    /// Disable weak host send/receive on the tunnel interface while connected
    pub apply_interface_policy: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tunnel_hardware_id: "wintun".to_string(),
            server_routes_file: data_dir().join(SERVER_ROUTES_FILE),
            split_tunnel_settings_file: config_dir().join(SPLIT_TUNNEL_FILE),
            wireguard: WireGuardConfig::default(),
            split_tunnel_sublayer_weight: SPLIT_TUNNEL_SUBLAYER_WEIGHT,
            log_level: "info".to_string(),
            apply_interface_policy: true,
        }
    }
}

impl ServiceConfig {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        config_dir().join(CONFIG_FILE)
    }

    /// Read `path`, falling back to defaults when missing or unreadable
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            log::debug!("Config file {} does not exist, using defaults", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::error!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::error!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> NetResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::info!("Config saved to {}", path.display());
        Ok(())
    }
}

/// `<config_dir>/TunnelCtl`, or the working directory when the OS has none
pub fn config_dir() -> PathBuf {
    dirs::config_dir().map(|p| p.join(APP_NAME)).unwrap_or_default()
}

/// `<data_local_dir>/TunnelCtl`, or the working directory when the OS has none
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir().map(|p| p.join(APP_NAME)).unwrap_or_default()
}

/// Split tunnel settings read from a JSON file on every call
pub struct FileSettingsSource {
    path: PathBuf,
}

impl FileSettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SplitTunnelSettingsSource for FileSettingsSource {
    fn split_tunnel_settings(&self) -> SplitTunnelSettings {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SplitTunnelSettings::disabled(),
            Err(e) => {
                log::error!("Failed to read split tunnel settings {}: {}", self.path.display(), e);
                return SplitTunnelSettings::disabled();
            }
        };

        match serde_json::from_str::<SplitTunnelSettings>(&content) {
            Ok(settings) => SplitTunnelSettings::new(settings.mode, settings.app_paths, settings.ips),
            Err(e) => {
                log::error!("Failed to parse split tunnel settings {}: {}", self.path.display(), e);
                SplitTunnelSettings::disabled()
            }
        }
    }
}
