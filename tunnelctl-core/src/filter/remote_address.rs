//! Per remote address rules
//!
//! Exclude mode lets listed addresses leave outside the tunnel, so they need
//! an explicit permit that outranks the tunnel's leak protection.

use super::{DisplayData, DynamicSublayer, FilterAction, Layer, ObjectKey};
use crate::net::{AddressFamily, NetworkAddress};
use crate::NetResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const REMOTE_ADDRESS_FILTER_WEIGHT: u8 = 14;

pub trait RemoteAddressRules: Send + Sync {
    fn add(&self, ips: &[String], action: FilterAction) -> NetResult<()>;
    fn remove(&self, ip: &str);
    fn remove_all(&self);
}

pub struct PermittedRemoteAddress {
    sublayer: Arc<DynamicSublayer>,
    list: Mutex<HashMap<String, ObjectKey>>,
}

impl PermittedRemoteAddress {
    pub fn new(sublayer: Arc<DynamicSublayer>) -> Self {
        Self {
            sublayer,
            list: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracked(&self) -> usize {
        self.list.lock().len()
    }
}

impl RemoteAddressRules for PermittedRemoteAddress {
    fn add(&self, ips: &[String], action: FilterAction) -> NetResult<()> {
        let mut list = self.list.lock();

        for ip in ips {
            if list.contains_key(ip) {
                continue;
            }

            let Some(address) = NetworkAddress::parse(ip) else {
                log::warn!("Skipping remote address filter for invalid address '{}'", ip);
                continue;
            };

            let layer = Layer::auth_connect(AddressFamily::from_ipv6_flag(address.is_ipv6()));
            match self.sublayer.create_remote_address_filter(
                DisplayData::new("TunnelCtl permit remote address", ""),
                action,
                layer,
                REMOTE_ADDRESS_FILTER_WEIGHT,
                address,
            ) {
                Ok(key) => {
                    list.insert(ip.clone(), key);
                }
                Err(e) if e.is_invalid_argument() => {
                    log::warn!("Skipping remote address filter for '{}' on {}: {}", ip, layer, e);
                }
                Err(e) => {
                    log::error!("Failed to add remote address filter for '{}' on {}: {}", ip, layer, e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    fn remove(&self, ip: &str) {
        let removed = self.list.lock().remove(ip);
        if let Some(key) = removed {
            if let Err(e) = self.sublayer.destroy_filter(key) {
                log::warn!("Failed to remove remote address filter for '{}': {}", ip, e);
            }
        }
    }

    fn remove_all(&self) {
        let all: Vec<(String, ObjectKey)> = self.list.lock().drain().collect();
        for (ip, key) in all {
            if let Err(e) = self.sublayer.destroy_filter(key) {
                log::warn!("Failed to remove remote address filter for '{}': {}", ip, e);
            }
        }
    }
}
