//! Privileged OS service lifecycle
//!
//! - controller.rs: start/stop with state polling, timeout, cancellation and retry
//! - launcher.rs: tunnel service bootstrap (create, enable, fix command line, start)
//! - retry.rs: fixed delay retry helper
//! - windows.rs: Service Control Manager backend

pub mod controller;
pub mod launcher;
pub mod retry;

#[cfg(windows)]
pub mod windows;

pub use controller::ServiceController;
pub use launcher::TunnelServiceLauncher;

use crate::ServiceControlError;
use std::fmt;

/// Service states as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
}

impl ServiceState {
    /// Map a `SERVICE_STATUS.dwCurrentState` value
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ServiceState::Stopped),
            2 => Some(ServiceState::StartPending),
            3 => Some(ServiceState::StopPending),
            4 => Some(ServiceState::Running),
            5 => Some(ServiceState::ContinuePending),
            6 => Some(ServiceState::PausePending),
            7 => Some(ServiceState::Paused),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::StartPending => "start pending",
            ServiceState::StopPending => "stop pending",
            ServiceState::Running => "running",
            ServiceState::ContinuePending => "continue pending",
            ServiceState::PausePending => "pause pending",
            ServiceState::Paused => "paused",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStartType {
    Boot,
    System,
    Automatic,
    Demand,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCreationOptions {
    /// Quoted executable path followed by its arguments
    pub path_and_arguments: String,
    /// Give the service an unrestricted SID so it can own WFP objects
    pub is_unrestricted: bool,
    pub dependencies: Vec<String>,
}

impl ServiceCreationOptions {
    pub fn new(path_and_arguments: impl Into<String>, is_unrestricted: bool, dependencies: &[&str]) -> Self {
        Self {
            path_and_arguments: path_and_arguments.into(),
            is_unrestricted,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Raw service control operations. Every call is a single short OS request;
/// waiting and retrying live in [`ServiceController`].
pub trait ServiceManager: Send + Sync {
    fn create(&self, name: &str, options: &ServiceCreationOptions) -> Result<(), ServiceControlError>;
    fn query_state(&self, name: &str) -> Result<ServiceState, ServiceControlError>;
    fn start_type(&self, name: &str) -> Result<ServiceStartType, ServiceControlError>;
    fn set_demand_start(&self, name: &str) -> Result<(), ServiceControlError>;
    fn binary_path(&self, name: &str) -> Result<String, ServiceControlError>;
    fn set_binary_path(&self, name: &str, path_and_arguments: &str) -> Result<(), ServiceControlError>;
    /// Issue the start command without waiting
    fn start(&self, name: &str) -> Result<(), ServiceControlError>;
    /// Issue the stop control without waiting
    fn stop(&self, name: &str) -> Result<(), ServiceControlError>;
}
