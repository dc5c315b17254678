//! Route table change monitor

use super::{guard_callback, EventSubscribers, NetworkEvent, NotificationHandle, NotificationRegistrar, NotificationType};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct RouteChangeMonitor {
    registrar: Arc<dyn NotificationRegistrar>,
    subscribers: Arc<EventSubscribers>,
    handle: Mutex<Option<NotificationHandle>>,
}

impl RouteChangeMonitor {
    pub fn new(registrar: Arc<dyn NotificationRegistrar>) -> Self {
        Self {
            registrar,
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
        let callback = Box::new(move |kind: NotificationType| {
            guard_callback("Route change", || on_route_changed(&subscribers, kind));
        });

        match self.registrar.register_route_change(callback) {
            Ok(registered) => {
                *handle = Some(registered);
                log::debug!("Route change monitor started");
            }
            Err(e) => log::warn!("Failed to start route change monitor: {}", e),
        }
    }

    pub fn stop(&self) {
        let mut handle = self.handle.lock();
        if let Some(registered) = handle.take() {
            if let Err(e) = self.registrar.cancel(registered) {
                log::warn!("Failed to cancel route change notifications: {}", e);
            }
            log::debug!("Route change monitor stopped");
        }
    }
}

impl Drop for RouteChangeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn on_route_changed(subscribers: &EventSubscribers, kind: NotificationType) {
    // Registration replays the current table; only real changes matter
    if kind == NotificationType::Initial {
        return;
    }
    subscribers.publish(NetworkEvent::RouteChanged(kind));
}
