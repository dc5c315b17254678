//! Interface policy lease
//!
//! Weak host send/receive let an interface send or accept packets for
//! addresses it does not own. While the tunnel is up that lets traffic slip
//! past it, so both flags are turned off for the lifetime of the lease and put
//! back exactly as found when the lease is released.

use crate::net::{AddressFamily, IpInterfaceTable};
use std::sync::Arc;

/// What a lease changed on one address family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedInterfaceState {
    pub family: AddressFamily,
    pub original_weak_host_send: bool,
    pub was_weak_host_send_modified: bool,
    pub original_weak_host_receive: bool,
    pub was_weak_host_receive_modified: bool,
}

pub struct InterfacePolicyLease {
    table: Arc<dyn IpInterfaceTable>,
    interface_index: u32,
    applied: Vec<AppliedInterfaceState>,
    disposed: bool,
}

impl InterfacePolicyLease {
    pub fn new(table: Arc<dyn IpInterfaceTable>, interface_index: u32) -> Self {
        Self {
            table,
            interface_index,
            applied: Vec::new(),
            disposed: false,
        }
    }

    /// Create a lease and apply it right away
    pub fn acquire(table: Arc<dyn IpInterfaceTable>, interface_index: u32) -> Self {
        let mut lease = Self::new(table, interface_index);
        lease.apply();
        lease
    }

    pub fn interface_index(&self) -> u32 {
        self.interface_index
    }

    pub fn applied_states(&self) -> &[AppliedInterfaceState] {
        &self.applied
    }

    pub fn apply(&mut self) {
        for family in AddressFamily::ALL {
            self.try_apply_for_family(family);
        }
    }

    /// Restore every modified family. Only the first call does anything.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }

        for state in std::mem::take(&mut self.applied) {
            self.restore(&state);
        }

        self.disposed = true;
    }

    fn try_apply_for_family(&mut self, family: AddressFamily) {
        let mut row = match self.table.get(self.interface_index, family) {
            Ok(row) => row,
            Err(e) => {
                log::warn!(
                    "Failed to query interface {} ({}) while applying policy: {}",
                    self.interface_index,
                    family,
                    e
                );
                return;
            }
        };

        let original_weak_host_send = row.weak_host_send;
        let original_weak_host_receive = row.weak_host_receive;
        let was_weak_host_send_modified = row.weak_host_send;
        let was_weak_host_receive_modified = row.weak_host_receive;

        if !was_weak_host_send_modified && !was_weak_host_receive_modified {
            return;
        }

        row.weak_host_send = false;
        row.weak_host_receive = false;
        row.fix_site_prefix_length();

        match self.table.set(&row) {
            Ok(()) => {
                self.applied.push(AppliedInterfaceState {
                    family,
                    original_weak_host_send,
                    was_weak_host_send_modified,
                    original_weak_host_receive,
                    was_weak_host_receive_modified,
                });
                log::info!(
                    "Applied interface policy for index {} ({}). Was WeakHostSend disabled: {}. Was WeakHostReceive disabled: {}",
                    self.interface_index,
                    family,
                    was_weak_host_send_modified,
                    was_weak_host_receive_modified
                );
            }
            Err(e) => log::warn!(
                "Failed to apply interface policy for index {} ({}): {}",
                self.interface_index,
                family,
                e
            ),
        }
    }

    fn restore(&self, state: &AppliedInterfaceState) {
        if !state.was_weak_host_send_modified && !state.was_weak_host_receive_modified {
            return;
        }

        let mut row = match self.table.get(self.interface_index, state.family) {
            Ok(row) => row,
            Err(e) => {
                log::warn!(
                    "Failed to query interface {} ({}) while restoring policy: {}",
                    self.interface_index,
                    state.family,
                    e
                );
                return;
            }
        };

        row.weak_host_send = state.original_weak_host_send;
        row.weak_host_receive = state.original_weak_host_receive;
        row.fix_site_prefix_length();

        if let Err(e) = self.table.set(&row) {
            log::warn!(
                "Failed to restore interface policy for index {} ({}): {}",
                self.interface_index,
                state.family,
                e
            );
        } else {
            log::info!("Restored interface policy for index {} ({})", self.interface_index, state.family);
        }
    }
}

impl Drop for InterfacePolicyLease {
    fn drop(&mut self) {
        self.dispose();
    }
}
