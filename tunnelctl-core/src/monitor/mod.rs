//! OS network change monitors
//!
//! The OS invokes registered callbacks on its own worker threads. Monitors turn
//! those callbacks into typed [`NetworkEvent`]s and fan them out to every
//! subscriber over a crossbeam channel, so consumers never run inside the
//! notification context.

pub mod forwarding;
pub mod route;

#[cfg(windows)]
pub mod windows;

pub use forwarding::InterfaceForwardingMonitor;
pub use route::RouteChangeMonitor;

use crate::net::AddressFamily;
use crate::NetResult;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// Kind of change reported by a notification (`MIB_NOTIFICATION_TYPE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    Parameter,
    Add,
    Delete,
    Initial,
}

/// Interface row identity carried by an interface change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceChange {
    pub interface_index: u32,
    pub family: AddressFamily,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    RouteChanged(NotificationType),
    ForwardingEnabled { interface_index: u32 },
}

pub type RouteChangeCallback = Box<dyn Fn(NotificationType) + Send + Sync>;
pub type InterfaceChangeCallback = Box<dyn Fn(NotificationType, Option<InterfaceChange>) + Send + Sync>;

/// Opaque registration returned by a [`NotificationRegistrar`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationHandle(pub usize);

/// Registration with the OS change notification service
pub trait NotificationRegistrar: Send + Sync {
    fn register_route_change(&self, callback: RouteChangeCallback) -> NetResult<NotificationHandle>;
    fn register_interface_change(&self, callback: InterfaceChangeCallback) -> NetResult<NotificationHandle>;
    fn cancel(&self, handle: NotificationHandle) -> NetResult<()>;
}

/// Subscriber list shared between a monitor and its OS callback
#[derive(Default)]
pub struct EventSubscribers {
    senders: Mutex<Vec<Sender<NetworkEvent>>>,
}

impl EventSubscribers {
    pub fn subscribe(&self) -> Receiver<NetworkEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping the ones that went away
    pub fn publish(&self, event: NetworkEvent) {
        self.senders.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run an OS callback body, logging instead of unwinding into the OS
fn guard_callback(monitor: &str, body: impl FnOnce()) {
    if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        log::error!("{} notification handler panicked: {}", monitor, message);
    }
}
