//! TunnelCtl Core Library
//!
//! Network control plane of the privileged VPN service: split tunneling,
//! route table management, gateway resolution, interface policy and the
//! tunnel service lifecycle. OS backends live behind traits; the Windows
//! implementations are compiled on Windows only.

pub mod config;
pub mod control_plane;
pub mod controller;
pub mod error;
pub mod filter;
pub mod model;
pub mod monitor;
pub mod net;
pub mod policy;
pub mod routing;
pub mod service;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use config::{FileSettingsSource, ServiceConfig};
pub use control_plane::{ControlPlaneConfig, LifecycleDispatcher, NetworkControlPlane};
pub use controller::{SplitTunnel, SplitTunnelConfig, SplitTunnelState};
pub use error::*;
pub use model::{SplitTunnelMode, SplitTunnelSettings, VpnErrorKind, VpnProtocol, VpnState, VpnStatus};
