//! Bootstrap of the tunnel data plane service
//!
//! The tunnel runs as its own OS service. Before each start the service is
//! created if missing, re-enabled if someone disabled it, and its command line
//! is brought in line with the current executable, config file and transport.

use super::{ServiceController, ServiceCreationOptions};
use crate::model::VpnProtocol;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

const SERVICE_DEPENDENCIES: [&str; 2] = ["Nsi", "TcpIp"];

pub struct TunnelServiceLauncher {
    controller: ServiceController,
    executable_path: PathBuf,
    config_file_path: PathBuf,
}

impl TunnelServiceLauncher {
    pub fn new(controller: ServiceController, executable_path: PathBuf, config_file_path: PathBuf) -> Self {
        Self {
            controller,
            executable_path,
            config_file_path,
        }
    }

    pub fn name(&self) -> &str {
        self.controller.name()
    }

    pub fn exists(&self) -> bool {
        self.controller.is_created()
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    pub fn is_stopped(&self) -> bool {
        self.controller.is_stopped()
    }

    pub fn command_line(&self, protocol: VpnProtocol) -> String {
        let transport = match protocol {
            VpnProtocol::WireGuardTcp => "tcp",
            VpnProtocol::WireGuardTls => "tls",
            _ => "udp",
        };
        format!(
            "\"{}\" \"{}\" \"{}\"",
            self.executable_path.display(),
            self.config_file_path.display(),
            transport
        )
    }

    pub async fn start(&self, cancel: &CancellationToken, protocol: VpnProtocol) -> bool {
        if !self.controller.is_created() {
            log::info!("Tunnel service '{}' is missing. Creating.", self.name());
            self.controller.create(&ServiceCreationOptions::new(
                self.command_line(protocol),
                true,
                &SERVICE_DEPENDENCIES,
            ));
        }

        if !self.controller.is_enabled() {
            self.controller.enable();
        }

        self.update_service_path(protocol);

        self.controller.start(cancel).await
    }

    pub async fn stop(&self, cancel: &CancellationToken) -> bool {
        self.controller.stop(cancel).await
    }

    fn update_service_path(&self, protocol: VpnProtocol) {
        let Some(current) = self.controller.binary_path().filter(|p| !p.is_empty()) else {
            log::error!("Failed to read the {} service path", self.name());
            return;
        };

        let expected = self.command_line(protocol);
        if current != expected {
            log::info!("Updating {} service path from {} to {}", self.name(), current, expected);
            self.controller.update_path_and_args(&expected);
        }
    }
}
