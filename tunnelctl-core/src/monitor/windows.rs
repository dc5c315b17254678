//! IP Helper change notifications

use super::{
    InterfaceChange, InterfaceChangeCallback, NotificationHandle, NotificationRegistrar, NotificationType,
    RouteChangeCallback,
};
use crate::net::windows::family_from_value;
use crate::{NetError, NetResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::c_void;

use windows::Win32::Foundation::{BOOLEAN, HANDLE, NO_ERROR};
use windows::Win32::NetworkManagement::IpHelper::{
    CancelMibChangeNotify2, NotifyIpInterfaceChange, NotifyRouteChange2, MIB_IPFORWARD_ROW2, MIB_IPINTERFACE_ROW,
    MIB_NOTIFICATION_TYPE,
};
use windows::Win32::Networking::WinSock::AF_UNSPEC;

fn notification_type(value: MIB_NOTIFICATION_TYPE) -> NotificationType {
    match value.0 {
        1 => NotificationType::Add,
        2 => NotificationType::Delete,
        3 => NotificationType::Initial,
        _ => NotificationType::Parameter,
    }
}

unsafe extern "system" fn on_route_change(
    context: *const c_void,
    _row: *const MIB_IPFORWARD_ROW2,
    kind: MIB_NOTIFICATION_TYPE,
) {
    if context.is_null() {
        return;
    }
    let callback = &*(context as *const RouteChangeCallback);
    callback(notification_type(kind));
}

unsafe extern "system" fn on_interface_change(
    context: *const c_void,
    row: *const MIB_IPINTERFACE_ROW,
    kind: MIB_NOTIFICATION_TYPE,
) {
    if context.is_null() {
        return;
    }
    let callback = &*(context as *const InterfaceChangeCallback);
    let change = row.as_ref().and_then(|row| {
        family_from_value(row.Family).map(|family| InterfaceChange {
            interface_index: row.InterfaceIndex,
            family,
        })
    });
    callback(notification_type(kind), change);
}

/// Callback box owned by a live registration, stored as an address
enum Registration {
    Route(usize),
    Interface(usize),
}

impl Registration {
    /// # Safety
    /// The notification must already be cancelled so no callback can still
    /// be running against the box.
    unsafe fn free(self) {
        match self {
            Registration::Route(ptr) => drop(Box::from_raw(ptr as *mut RouteChangeCallback)),
            Registration::Interface(ptr) => drop(Box::from_raw(ptr as *mut InterfaceChangeCallback)),
        }
    }
}

/// Registers callbacks with `NotifyRouteChange2` / `NotifyIpInterfaceChange`.
/// Each callback box lives until its handle is cancelled.
#[derive(Default)]
pub struct WindowsNotificationRegistrar {
    registrations: Mutex<HashMap<usize, Registration>>,
}

impl WindowsNotificationRegistrar {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationRegistrar for WindowsNotificationRegistrar {
    fn register_route_change(&self, callback: RouteChangeCallback) -> NetResult<NotificationHandle> {
        let context = Box::into_raw(Box::new(callback));
        let mut handle = HANDLE::default();

        let result = unsafe {
            NotifyRouteChange2(
                AF_UNSPEC,
                Some(on_route_change),
                Some(context as *const c_void),
                BOOLEAN(0),
                &mut handle,
            )
        };
        if result != NO_ERROR {
            unsafe { drop(Box::from_raw(context)) };
            return Err(NetError::ip_helper("NotifyRouteChange2", result.0));
        }

        let key = handle.0 as usize;
        self.registrations
            .lock()
            .insert(key, Registration::Route(context as usize));
        Ok(NotificationHandle(key))
    }

    fn register_interface_change(&self, callback: InterfaceChangeCallback) -> NetResult<NotificationHandle> {
        let context = Box::into_raw(Box::new(callback));
        let mut handle = HANDLE::default();

        let result = unsafe {
            NotifyIpInterfaceChange(
                AF_UNSPEC,
                Some(on_interface_change),
                Some(context as *const c_void),
                BOOLEAN(0),
                &mut handle,
            )
        };
        if result != NO_ERROR {
            unsafe { drop(Box::from_raw(context)) };
            return Err(NetError::ip_helper("NotifyIpInterfaceChange", result.0));
        }

        let key = handle.0 as usize;
        self.registrations
            .lock()
            .insert(key, Registration::Interface(context as usize));
        Ok(NotificationHandle(key))
    }

    fn cancel(&self, handle: NotificationHandle) -> NetResult<()> {
        let Some(registration) = self.registrations.lock().remove(&handle.0) else {
            return Ok(());
        };

        // Blocks until in-flight callbacks have returned
        let result = unsafe { CancelMibChangeNotify2(HANDLE(handle.0 as *mut c_void)) };
        if result != NO_ERROR {
            // The OS may still call into the box; leaking it is the only safe option
            std::mem::forget(registration);
            return Err(NetError::ip_helper("CancelMibChangeNotify2", result.0));
        }

        unsafe { registration.free() };
        Ok(())
    }
}

impl Drop for WindowsNotificationRegistrar {
    fn drop(&mut self) {
        let handles: Vec<usize> = self.registrations.lock().keys().copied().collect();
        for handle in handles {
            if let Err(e) = self.cancel(NotificationHandle(handle)) {
                log::warn!("Failed to cancel change notification: {}", e);
            }
        }
    }
}
