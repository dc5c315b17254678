//! Start/stop a named OS service and wait for it to settle

use super::retry::retry_on_false;
use super::{ServiceCreationOptions, ServiceManager, ServiceStartType, ServiceState};
use crate::ServiceControlError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const STATE_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const RETRY_COUNT: u32 = 2;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct ServiceController {
    manager: Arc<dyn ServiceManager>,
    name: String,
}

impl ServiceController {
    pub fn new(manager: Arc<dyn ServiceManager>, name: impl Into<String>) -> Self {
        Self {
            manager,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_created(&self) -> bool {
        match self.manager.query_state(&self.name) {
            Ok(_) => true,
            Err(ServiceControlError::DoesNotExist) => false,
            Err(e) => {
                log::error!("Unable to determine whether service '{}' exists: {}", self.name, e);
                false
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self.manager.start_type(&self.name) {
            Ok(start_type) => start_type != ServiceStartType::Disabled,
            Err(e) => {
                log::error!("Unable to determine whether service '{}' is enabled: {}", self.name, e);
                false
            }
        }
    }

    /// Switch the service to demand start
    pub fn enable(&self) {
        log::info!("Enabling the service '{}'", self.name);
        if let Err(e) = self.manager.set_demand_start(&self.name) {
            log::error!("Failed to enable service '{}': {}", self.name, e);
        }
    }

    pub fn create(&self, options: &ServiceCreationOptions) {
        log::info!("Creating the service '{}'", self.name);
        if let Err(e) = self.manager.create(&self.name, options) {
            log::error!("Failed to create service '{}': {}", self.name, e);
        }
    }

    pub fn binary_path(&self) -> Option<String> {
        match self.manager.binary_path(&self.name) {
            Ok(path) => Some(path),
            Err(e) => {
                log::error!("Failed to read binary path of service '{}': {}", self.name, e);
                None
            }
        }
    }

    pub fn update_path_and_args(&self, path_and_arguments: &str) {
        if let Err(e) = self.manager.set_binary_path(&self.name, path_and_arguments) {
            log::error!("Failed to update path of service '{}': {}", self.name, e);
        }
    }

    /// Current state, `None` when the service is missing or cannot be queried
    pub fn status(&self) -> Option<ServiceState> {
        match self.manager.query_state(&self.name) {
            Ok(state) => Some(state),
            Err(e) => {
                log::error!("Unable to query service '{}' status: {}", self.name, e);
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == Some(ServiceState::Running)
    }

    /// A service whose state is unknown counts as stopped
    pub fn is_stopped(&self) -> bool {
        matches!(self.status(), None | Some(ServiceState::Stopped))
    }

    pub async fn start(&self, cancel: &CancellationToken) -> bool {
        log::info!("Starting the service '{}'", self.name);

        match self.manager.start(&self.name) {
            Ok(()) | Err(ServiceControlError::AlreadyRunning) => {}
            Err(e) => {
                log::error!("Failed to start service '{}': {}", self.name, e);
                return false;
            }
        }

        if !self.wait_for_state(ServiceState::Running, cancel).await {
            log::warn!(
                "The service '{}' did not reach the running state within {} seconds",
                self.name,
                STATE_WAIT_TIMEOUT.as_secs()
            );
            return false;
        }
        true
    }

    pub async fn stop(&self, cancel: &CancellationToken) -> bool {
        log::info!("Stopping the service '{}'", self.name);

        match self.manager.stop(&self.name) {
            Ok(()) => {}
            Err(ServiceControlError::NotActive) => return true,
            Err(e) => {
                log::error!("Failed to stop service '{}': {}", self.name, e);
                return false;
            }
        }

        if !self.wait_for_state(ServiceState::Stopped, cancel).await {
            log::warn!(
                "The service '{}' did not reach the stopped state within {} seconds",
                self.name,
                STATE_WAIT_TIMEOUT.as_secs()
            );
            return false;
        }
        true
    }

    pub async fn start_with_retry(&self) -> bool {
        let cancel = CancellationToken::new();
        retry_on_false(RETRY_COUNT, RETRY_DELAY, || self.start(&cancel)).await
    }

    pub async fn stop_with_retry(&self) -> bool {
        let cancel = CancellationToken::new();
        retry_on_false(RETRY_COUNT, RETRY_DELAY, || self.stop(&cancel)).await
    }

    async fn wait_for_state(&self, desired: ServiceState, cancel: &CancellationToken) -> bool {
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                log::info!("Waiting for service '{}' to become {} was cancelled", self.name, desired);
                return false;
            }

            match self.manager.query_state(&self.name) {
                Ok(state) if state == desired => return true,
                // start failed and the service fell back
                Ok(ServiceState::Stopped) if desired == ServiceState::Running => return false,
                Ok(_) => {}
                Err(e) => {
                    log::error!("Failed to query status of service '{}': {}", self.name, e);
                    return false;
                }
            }

            if started.elapsed() >= STATE_WAIT_TIMEOUT {
                return false;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Waiting for service '{}' to become {} was cancelled", self.name, desired);
                    return false;
                }
                _ = tokio::time::sleep(STATUS_POLL_INTERVAL) => {}
            }
        }
    }
}
