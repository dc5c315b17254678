//! Windows Filtering Platform backend
//!
//! Every session is opened with `FWPM_SESSION_FLAG_DYNAMIC`, so all providers,
//! sublayers, callouts, contexts and filters it adds are removed by the engine
//! when the session closes, including when the service process dies.

use super::{
    AppCalloutFilterDefinition, AppFilterDefinition, DisplayData, FilterAction, FilterEngine, FilterSession, Layer,
    ObjectKey, RemoteAddressFilterDefinition,
};
use crate::{NetError, NetResult, FWP_E_ALREADY_EXISTS};
use std::ffi::c_void;
use std::net::IpAddr;
use std::ptr;

use windows::core::{GUID, PCWSTR, PWSTR};
use windows::Win32::Foundation::HANDLE;
use windows::Win32::NetworkManagement::WindowsFilteringPlatform::*;
use windows::Win32::System::Rpc::RPC_C_AUTHN_WINNT;

const DNS_PORT: u16 = 53;

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

fn guid(key: ObjectKey) -> GUID {
    GUID::from_u128(key.0)
}

fn new_key() -> NetResult<ObjectKey> {
    GUID::new()
        .map(|g| ObjectKey(g.to_u128()))
        .map_err(|e| NetError::filter("CoCreateGuid", e.code().0 as u32))
}

fn check(operation: &str, result: u32) -> NetResult<()> {
    if result != 0 {
        return Err(NetError::filter(operation, result));
    }
    Ok(())
}

fn layer_key(layer: Layer) -> GUID {
    match layer {
        Layer::AppAuthConnectV4 => FWPM_LAYER_ALE_AUTH_CONNECT_V4,
        Layer::AppAuthConnectV6 => FWPM_LAYER_ALE_AUTH_CONNECT_V6,
        Layer::AppConnectRedirectV4 => FWPM_LAYER_ALE_CONNECT_REDIRECT_V4,
        Layer::AppConnectRedirectV6 => FWPM_LAYER_ALE_CONNECT_REDIRECT_V6,
        Layer::BindRedirectV4 => FWPM_LAYER_ALE_BIND_REDIRECT_V4,
        Layer::BindRedirectV6 => FWPM_LAYER_ALE_BIND_REDIRECT_V6,
    }
}

fn action_type(action: FilterAction) -> FWP_ACTION_TYPE {
    if action.is_permit() {
        FWP_ACTION_PERMIT
    } else {
        FWP_ACTION_BLOCK
    }
}

/// Hard actions clear the action right so lower sublayers cannot override them
fn action_flags(action: FilterAction) -> FWPM_FILTER_FLAGS {
    if action.is_hard() {
        FWPM_FILTER_FLAG_CLEAR_ACTION_RIGHT
    } else {
        FWPM_FILTER_FLAG_NONE
    }
}

fn uint8_weight(weight: u8) -> FWP_VALUE0 {
    FWP_VALUE0 {
        r#type: FWP_UINT8,
        Anonymous: FWP_VALUE0_0 { uint8: weight },
    }
}

/// UTF-16 copies of display strings, alive for the duration of one call
struct WideDisplay {
    name: Vec<u16>,
    description: Vec<u16>,
}

impl WideDisplay {
    fn new(display: &DisplayData) -> Self {
        Self {
            name: wide(&display.name),
            description: wide(&display.description),
        }
    }

    fn raw(&self) -> FWPM_DISPLAY_DATA0 {
        FWPM_DISPLAY_DATA0 {
            name: PWSTR(self.name.as_ptr() as *mut u16),
            description: PWSTR(self.description.as_ptr() as *mut u16),
        }
    }
}

/// App id blob from `FwpmGetAppIdFromFileName0`, freed on drop
struct AppId(*mut FWP_BYTE_BLOB);

impl AppId {
    fn from_path(path: &str) -> NetResult<Self> {
        if path.is_empty() {
            return Err(NetError::InvalidArgument("empty application path".to_string()));
        }

        let path_wide = wide(path);
        let mut blob: *mut FWP_BYTE_BLOB = ptr::null_mut();
        let result = unsafe { FwpmGetAppIdFromFileName0(PCWSTR::from_raw(path_wide.as_ptr()), &mut blob) };
        check("FwpmGetAppIdFromFileName0", result)?;
        if blob.is_null() {
            return Err(NetError::InvalidArgument(format!("no app id for '{}'", path)));
        }
        Ok(AppId(blob))
    }

    fn condition(&self) -> FWPM_FILTER_CONDITION0 {
        FWPM_FILTER_CONDITION0 {
            fieldKey: FWPM_CONDITION_ALE_APP_ID,
            matchType: FWP_MATCH_EQUAL,
            conditionValue: FWP_CONDITION_VALUE0 {
                r#type: FWP_BYTE_BLOB_TYPE,
                Anonymous: FWP_CONDITION_VALUE0_0 { byteBlob: self.0 },
            },
        }
    }
}

impl Drop for AppId {
    fn drop(&mut self) {
        unsafe {
            FwpmFreeMemory0(&mut (self.0 as *mut c_void));
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WfpEngine;

impl WfpEngine {
    pub fn new() -> Self {
        Self
    }
}

impl FilterEngine for WfpEngine {
    fn open_dynamic_session(&self) -> NetResult<Box<dyn FilterSession>> {
        let session = FWPM_SESSION0 {
            flags: FWPM_SESSION_FLAG_DYNAMIC,
            ..Default::default()
        };

        let mut handle = HANDLE::default();
        let result =
            unsafe { FwpmEngineOpen0(PCWSTR::null(), RPC_C_AUTHN_WINNT, None, Some(&session), &mut handle) };
        check("FwpmEngineOpen0", result)?;

        log::debug!("WFP dynamic session opened");
        Ok(Box::new(WfpSession {
            handle,
            provider: None,
        }))
    }
}

pub struct WfpSession {
    handle: HANDLE,
    provider: Option<GUID>,
}

// WFP engine handles can be used from any thread; callers serialise access
unsafe impl Send for WfpSession {}

impl WfpSession {
    fn add_filter(&mut self, filter: &mut FWPM_FILTER0, operation: &str) -> NetResult<ObjectKey> {
        let key = new_key()?;
        filter.filterKey = guid(key);
        filter.providerKey = self
            .provider
            .as_mut()
            .map_or(ptr::null_mut(), |provider| provider as *mut GUID);

        let result = unsafe { FwpmFilterAdd0(self.handle, filter, None, None) };
        check(operation, result)?;
        Ok(key)
    }
}

impl FilterSession for WfpSession {
    fn start_transaction(&mut self) -> NetResult<()> {
        check("FwpmTransactionBegin0", unsafe { FwpmTransactionBegin0(self.handle, 0) })
    }

    fn commit_transaction(&mut self) -> NetResult<()> {
        check("FwpmTransactionCommit0", unsafe { FwpmTransactionCommit0(self.handle) })
    }

    fn abort_transaction(&mut self) -> NetResult<()> {
        check("FwpmTransactionAbort0", unsafe { FwpmTransactionAbort0(self.handle) })
    }

    fn add_provider(&mut self, display: &DisplayData) -> NetResult<ObjectKey> {
        let key = new_key()?;
        let text = WideDisplay::new(display);
        let provider = FWPM_PROVIDER0 {
            providerKey: guid(key),
            displayData: text.raw(),
            ..Default::default()
        };

        let result = unsafe { FwpmProviderAdd0(self.handle, &provider, None) };
        if result != 0 && result != FWP_E_ALREADY_EXISTS {
            return Err(NetError::filter("FwpmProviderAdd0", result));
        }

        self.provider = Some(guid(key));
        log::debug!("WFP provider added: {}", display.name);
        Ok(key)
    }

    fn add_sublayer(&mut self, provider: ObjectKey, display: &DisplayData, weight: u16) -> NetResult<ObjectKey> {
        let key = new_key()?;
        let text = WideDisplay::new(display);
        let mut provider_key = guid(provider);
        let sublayer = FWPM_SUBLAYER0 {
            subLayerKey: guid(key),
            displayData: text.raw(),
            providerKey: &mut provider_key,
            weight,
            ..Default::default()
        };

        let result = unsafe { FwpmSubLayerAdd0(self.handle, &sublayer, None) };
        if result != 0 && result != FWP_E_ALREADY_EXISTS {
            return Err(NetError::filter("FwpmSubLayerAdd0", result));
        }

        log::debug!("WFP sublayer added: {} (weight {})", display.name, weight);
        Ok(key)
    }

    fn add_callout(
        &mut self,
        key: ObjectKey,
        provider: ObjectKey,
        layer: Layer,
        display: &DisplayData,
    ) -> NetResult<ObjectKey> {
        let text = WideDisplay::new(display);
        let mut provider_key = guid(provider);
        let callout = FWPM_CALLOUT0 {
            calloutKey: guid(key),
            displayData: text.raw(),
            providerKey: &mut provider_key,
            applicableLayer: layer_key(layer),
            ..Default::default()
        };

        let result = unsafe { FwpmCalloutAdd0(self.handle, &callout, None, None) };
        check("FwpmCalloutAdd0", result)?;
        Ok(key)
    }

    fn add_provider_context(
        &mut self,
        provider: ObjectKey,
        display: &DisplayData,
        data: &[u8],
    ) -> NetResult<ObjectKey> {
        let key = new_key()?;
        let text = WideDisplay::new(display);
        let mut provider_key = guid(provider);
        let mut bytes = data.to_vec();
        let mut blob = FWP_BYTE_BLOB {
            size: bytes.len() as u32,
            data: bytes.as_mut_ptr(),
        };

        let context = FWPM_PROVIDER_CONTEXT0 {
            providerContextKey: guid(key),
            displayData: text.raw(),
            providerKey: &mut provider_key,
            r#type: FWPM_GENERAL_CONTEXT,
            Anonymous: FWPM_PROVIDER_CONTEXT0_0 { dataBuffer: &mut blob },
            ..Default::default()
        };

        let result = unsafe { FwpmProviderContextAdd0(self.handle, &context, None, None) };
        check("FwpmProviderContextAdd0", result)?;
        Ok(key)
    }

    fn add_app_filter(&mut self, definition: &AppFilterDefinition) -> NetResult<ObjectKey> {
        let app_id = AppId::from_path(&definition.app_path)?;
        let text = WideDisplay::new(&definition.display);

        let mut conditions = vec![app_id.condition()];
        if definition.exclude_dns_port {
            conditions.push(FWPM_FILTER_CONDITION0 {
                fieldKey: FWPM_CONDITION_IP_REMOTE_PORT,
                matchType: FWP_MATCH_NOT_EQUAL,
                conditionValue: FWP_CONDITION_VALUE0 {
                    r#type: FWP_UINT16,
                    Anonymous: FWP_CONDITION_VALUE0_0 { uint16: DNS_PORT },
                },
            });
        }

        let mut filter = FWPM_FILTER0 {
            displayData: text.raw(),
            flags: action_flags(definition.action),
            layerKey: layer_key(definition.layer),
            subLayerKey: guid(definition.sublayer),
            weight: uint8_weight(definition.weight),
            numFilterConditions: conditions.len() as u32,
            filterCondition: conditions.as_mut_ptr(),
            action: FWPM_ACTION0 {
                r#type: action_type(definition.action),
                Anonymous: FWPM_ACTION0_0::default(),
            },
            ..Default::default()
        };

        self.add_filter(&mut filter, "FwpmFilterAdd0 (app)")
    }

    fn add_app_callout_filter(&mut self, definition: &AppCalloutFilterDefinition) -> NetResult<ObjectKey> {
        let app_id = AppId::from_path(&definition.app_path)?;
        let text = WideDisplay::new(&definition.display);
        let mut conditions = [app_id.condition()];

        let mut flags = FWPM_FILTER_FLAG_HAS_PROVIDER_CONTEXT;
        if definition.persistent {
            flags |= FWPM_FILTER_FLAG_PERSISTENT;
        }

        let mut filter = FWPM_FILTER0 {
            displayData: text.raw(),
            flags,
            layerKey: layer_key(definition.layer),
            subLayerKey: guid(definition.sublayer),
            weight: uint8_weight(definition.weight),
            numFilterConditions: conditions.len() as u32,
            filterCondition: conditions.as_mut_ptr(),
            action: FWPM_ACTION0 {
                r#type: FWP_ACTION_CALLOUT_UNKNOWN,
                Anonymous: FWPM_ACTION0_0 {
                    calloutKey: guid(definition.callout),
                },
            },
            Anonymous: FWPM_FILTER0_0 {
                providerContextKey: guid(definition.provider_context),
            },
            ..Default::default()
        };

        self.add_filter(&mut filter, "FwpmFilterAdd0 (callout)")
    }

    fn add_remote_address_filter(&mut self, definition: &RemoteAddressFilterDefinition) -> NetResult<ObjectKey> {
        let text = WideDisplay::new(&definition.display);
        let prefix = definition.address.prefix_len();

        let mut v4 = FWP_V4_ADDR_AND_MASK::default();
        let mut v6 = FWP_V6_ADDR_AND_MASK::default();
        let value = match definition.address.ip() {
            IpAddr::V4(ip) => {
                v4.addr = u32::from(ip);
                v4.mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix as u32) };
                FWP_CONDITION_VALUE0 {
                    r#type: FWP_V4_ADDR_MASK,
                    Anonymous: FWP_CONDITION_VALUE0_0 { v4AddrMask: &mut v4 },
                }
            }
            IpAddr::V6(ip) => {
                v6.addr = ip.octets();
                v6.prefixLength = prefix;
                FWP_CONDITION_VALUE0 {
                    r#type: FWP_V6_ADDR_MASK,
                    Anonymous: FWP_CONDITION_VALUE0_0 { v6AddrMask: &mut v6 },
                }
            }
        };

        let mut conditions = [FWPM_FILTER_CONDITION0 {
            fieldKey: FWPM_CONDITION_IP_REMOTE_ADDRESS,
            matchType: FWP_MATCH_EQUAL,
            conditionValue: value,
        }];

        let mut filter = FWPM_FILTER0 {
            displayData: text.raw(),
            flags: action_flags(definition.action),
            layerKey: layer_key(definition.layer),
            subLayerKey: guid(definition.sublayer),
            weight: uint8_weight(definition.weight),
            numFilterConditions: conditions.len() as u32,
            filterCondition: conditions.as_mut_ptr(),
            action: FWPM_ACTION0 {
                r#type: action_type(definition.action),
                Anonymous: FWPM_ACTION0_0::default(),
            },
            ..Default::default()
        };

        self.add_filter(&mut filter, "FwpmFilterAdd0 (remote address)")
    }

    fn delete_filter(&mut self, filter: ObjectKey) -> NetResult<()> {
        let key = guid(filter);
        check("FwpmFilterDeleteByKey0", unsafe { FwpmFilterDeleteByKey0(self.handle, &key) })
    }

    fn close(&mut self) {
        if !self.handle.is_invalid() {
            unsafe {
                let _ = FwpmEngineClose0(self.handle);
            }
            self.handle = HANDLE::default();
            log::debug!("WFP dynamic session closed");
        }
    }
}

impl Drop for WfpSession {
    fn drop(&mut self) {
        self.close();
    }
}
