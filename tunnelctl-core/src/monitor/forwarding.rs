//! Interface forwarding monitor
//!
//! Another adapter switching IP forwarding on can route tunnel traffic back out
//! of the host. The monitor watches interface parameter changes and reports any
//! interface whose refreshed row has forwarding enabled.

use super::{
    guard_callback, EventSubscribers, InterfaceChange, NetworkEvent, NotificationHandle, NotificationRegistrar,
    NotificationType,
};
use crate::net::IpInterfaceTable;
use crate::ERROR_NOT_FOUND;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct InterfaceForwardingMonitor {
    registrar: Arc<dyn NotificationRegistrar>,
    table: Arc<dyn IpInterfaceTable>,
    subscribers: Arc<EventSubscribers>,
    handle: Mutex<Option<NotificationHandle>>,
}

impl InterfaceForwardingMonitor {
    pub fn new(registrar: Arc<dyn NotificationRegistrar>, table: Arc<dyn IpInterfaceTable>) -> Self {
        Self {
            registrar,
            table,
            subscribers: Arc::new(EventSubscribers::default()),
            handle: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> Receiver<NetworkEvent> {
        self.subscribers.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let subscribers = self.subscribers.clone();
        let table = self.table.clone();
        let callback = Box::new(move |kind: NotificationType, change: Option<InterfaceChange>| {
            guard_callback("Interface forwarding", || {
                on_interface_changed(table.as_ref(), &subscribers, kind, change)
            });
        });

        match self.registrar.register_interface_change(callback) {
            Ok(registered) => {
                *handle = Some(registered);
                log::debug!("Interface forwarding monitor started");
            }
            Err(e) => log::warn!("Failed to start interface forwarding monitor: {}", e),
        }
    }

    pub fn stop(&self) {
        let mut handle = self.handle.lock();
        if let Some(registered) = handle.take() {
            if let Err(e) = self.registrar.cancel(registered) {
                log::warn!("Failed to cancel interface change notifications: {}", e);
            }
            log::debug!("Interface forwarding monitor stopped");
        }
    }
}

impl Drop for InterfaceForwardingMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn on_interface_changed(
    table: &dyn IpInterfaceTable,
    subscribers: &EventSubscribers,
    kind: NotificationType,
    change: Option<InterfaceChange>,
) {
    if kind != NotificationType::Parameter {
        return;
    }
    let Some(change) = change else {
        return;
    };

    // The notification row is a partial snapshot; read the full row back
    let row = match table.get(change.interface_index, change.family) {
        Ok(row) => row,
        // interface went away while the notification was in flight
        Err(e) if e.code() == Some(ERROR_NOT_FOUND) => return,
        Err(e) => {
            log::warn!(
                "Failed to refresh interface {} ({}) after change notification: {}",
                change.interface_index,
                change.family,
                e
            );
            return;
        }
    };

    if row.forwarding_enabled {
        log::info!(
            "Forwarding enabled on interface {} ({})",
            change.interface_index,
            change.family
        );
        subscribers.publish(NetworkEvent::ForwardingEnabled {
            interface_index: change.interface_index,
        });
    }
}
