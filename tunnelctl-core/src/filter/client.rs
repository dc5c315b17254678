//! Split tunnel client used by the controller
//!
//! Failures are logged here and never reach the controller: a broken redirect
//! leaves split tunneling partially ineffective but the tunnel itself up.

use super::session::SplitTunnelFilters;
use std::net::{Ipv4Addr, Ipv6Addr};

pub trait SplitTunnelClient: Send {
    fn enable_exclude_mode(&mut self, app_paths: &[String], local_ipv4: Ipv4Addr, local_ipv6: Option<Ipv6Addr>);
    fn enable_include_mode(&mut self, app_paths: &[String], tunnel_ipv4: Ipv4Addr, tunnel_ipv6: Option<Ipv6Addr>);
    fn disable(&mut self);
}

/// `SplitTunnelClient` backed by the redirect filter session
pub struct FilterSplitTunnelClient {
    filters: SplitTunnelFilters,
}

impl FilterSplitTunnelClient {
    pub fn new(filters: SplitTunnelFilters) -> Self {
        Self { filters }
    }
}

impl SplitTunnelClient for FilterSplitTunnelClient {
    fn enable_exclude_mode(&mut self, app_paths: &[String], local_ipv4: Ipv4Addr, local_ipv6: Option<Ipv6Addr>) {
        if app_paths.is_empty() {
            return;
        }

        match self.filters.enable_exclude_mode(app_paths, local_ipv4, local_ipv6) {
            Ok(()) => log::info!("SplitTunnel: Enabling exclude mode succeeded"),
            Err(e) => log::error!(
                "SplitTunnel: Enabling exclude mode failed. Error code: {}",
                error_code(&e)
            ),
        }
    }

    fn enable_include_mode(&mut self, app_paths: &[String], tunnel_ipv4: Ipv4Addr, tunnel_ipv6: Option<Ipv6Addr>) {
        if app_paths.is_empty() {
            return;
        }

        match self.filters.enable_include_mode(app_paths, tunnel_ipv4, tunnel_ipv6) {
            Ok(()) => log::info!("SplitTunnel: Enabling include mode succeeded"),
            Err(e) => log::error!(
                "SplitTunnel: Enabling include mode failed. Error code: {}",
                error_code(&e)
            ),
        }
    }

    fn disable(&mut self) {
        self.filters.disable();
        log::info!("SplitTunnel: Disabling succeeded");
    }
}

fn error_code(error: &crate::NetError) -> String {
    match error.code() {
        Some(code) => format!("0x{:08X}", code),
        None => error.to_string(),
    }
}
