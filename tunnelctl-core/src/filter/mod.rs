//! Packet filter control
//!
//! Thin object model over the kernel filtering engine (WFP on Windows):
//!
//! - redirect.rs: binary redirect target handed to the callout driver
//! - session.rs: transactional split tunnel redirect filters
//! - client.rs: logging wrapper used by the split tunnel controller
//! - app_filter.rs: per application block/permit filters
//! - remote_address.rs: per address permit filters
//! - wfp.rs: Windows Filtering Platform backend

pub mod app_filter;
pub mod client;
pub mod redirect;
pub mod remote_address;
pub mod session;

#[cfg(windows)]
pub mod wfp;

pub use app_filter::{AppFilter, AppFilterRules};
pub use client::{FilterSplitTunnelClient, SplitTunnelClient};
pub use redirect::ConnectRedirectData;
pub use remote_address::{PermittedRemoteAddress, RemoteAddressRules};
pub use session::SplitTunnelFilters;

use crate::net::{AddressFamily, NetworkAddress};
use crate::NetResult;
use parking_lot::Mutex;
use std::fmt;

/// Filtering layers the control plane attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    AppAuthConnectV4,
    AppAuthConnectV6,
    AppConnectRedirectV4,
    AppConnectRedirectV6,
    BindRedirectV4,
    BindRedirectV6,
}

impl Layer {
    pub fn family(&self) -> AddressFamily {
        match self {
            Layer::AppAuthConnectV4 | Layer::AppConnectRedirectV4 | Layer::BindRedirectV4 => {
                AddressFamily::Ipv4
            }
            Layer::AppAuthConnectV6 | Layer::AppConnectRedirectV6 | Layer::BindRedirectV6 => {
                AddressFamily::Ipv6
            }
        }
    }

    /// Connect-auth layer of `family`
    pub fn auth_connect(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => Layer::AppAuthConnectV4,
            AddressFamily::Ipv6 => Layer::AppAuthConnectV6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Layer::AppAuthConnectV4 => "ALE auth connect IPv4",
            Layer::AppAuthConnectV6 => "ALE auth connect IPv6",
            Layer::AppConnectRedirectV4 => "ALE connect redirect IPv4",
            Layer::AppConnectRedirectV6 => "ALE connect redirect IPv6",
            Layer::BindRedirectV4 => "ALE bind redirect IPv4",
            Layer::BindRedirectV6 => "ALE bind redirect IPv6",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Filter verdict. Hard actions cannot be overridden by lower weight sublayers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterAction {
    SoftBlock,
    SoftPermit,
    HardBlock,
    HardPermit,
}

impl FilterAction {
    pub fn is_permit(&self) -> bool {
        matches!(self, FilterAction::SoftPermit | FilterAction::HardPermit)
    }

    pub fn is_hard(&self) -> bool {
        matches!(self, FilterAction::HardBlock | FilterAction::HardPermit)
    }
}

/// Key of an engine object (provider, sublayer, callout, context or filter).
/// Same bit layout as a Windows GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(pub u128);

impl ObjectKey {
    pub const fn from_u128(value: u128) -> Self {
        ObjectKey(value)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xffff_ffff_ffff
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplayData {
    pub name: String,
    pub description: String,
}

impl DisplayData {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Filter matching one application image path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppFilterDefinition {
    pub display: DisplayData,
    pub sublayer: ObjectKey,
    pub layer: Layer,
    pub action: FilterAction,
    pub weight: u8,
    pub app_path: String,
    /// Leave DNS (port 53) out of the match so name resolution keeps
    /// following the tunnel's DNS rules
    pub exclude_dns_port: bool,
}

/// Filter handing an application's flows to a redirect callout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCalloutFilterDefinition {
    pub display: DisplayData,
    pub sublayer: ObjectKey,
    pub layer: Layer,
    pub weight: u8,
    pub callout: ObjectKey,
    pub provider_context: ObjectKey,
    pub app_path: String,
    pub persistent: bool,
}

/// Filter matching a remote address or range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddressFilterDefinition {
    pub display: DisplayData,
    pub sublayer: ObjectKey,
    pub layer: Layer,
    pub action: FilterAction,
    pub weight: u8,
    pub address: NetworkAddress,
}

/// One open engine session. Objects created in a dynamic session disappear
/// when the session is closed.
pub trait FilterSession: Send {
    fn start_transaction(&mut self) -> NetResult<()>;
    fn commit_transaction(&mut self) -> NetResult<()>;
    fn abort_transaction(&mut self) -> NetResult<()>;

    fn add_provider(&mut self, display: &DisplayData) -> NetResult<ObjectKey>;
    fn add_sublayer(&mut self, provider: ObjectKey, display: &DisplayData, weight: u16) -> NetResult<ObjectKey>;
    fn add_callout(
        &mut self,
        key: ObjectKey,
        provider: ObjectKey,
        layer: Layer,
        display: &DisplayData,
    ) -> NetResult<ObjectKey>;
    fn add_provider_context(
        &mut self,
        provider: ObjectKey,
        display: &DisplayData,
        data: &[u8],
    ) -> NetResult<ObjectKey>;

    fn add_app_filter(&mut self, filter: &AppFilterDefinition) -> NetResult<ObjectKey>;
    fn add_app_callout_filter(&mut self, filter: &AppCalloutFilterDefinition) -> NetResult<ObjectKey>;
    fn add_remote_address_filter(&mut self, filter: &RemoteAddressFilterDefinition) -> NetResult<ObjectKey>;
    fn delete_filter(&mut self, filter: ObjectKey) -> NetResult<()>;

    /// Close the session, releasing everything it created. Idempotent.
    fn close(&mut self);
}

/// Opens engine sessions
pub trait FilterEngine: Send + Sync {
    fn open_dynamic_session(&self) -> NetResult<Box<dyn FilterSession>>;
}

/// Sublayer weight of the long lived firewall sublayer holding app and
/// address rules. Highest so its hard actions take priority.
pub const FIREWALL_SUBLAYER_WEIGHT: u16 = 0xFFFF;

/// Long lived dynamic session with one provider and sublayer, shared by the
/// app and remote address rule sets
pub struct DynamicSublayer {
    session: Mutex<Box<dyn FilterSession>>,
    sublayer: ObjectKey,
}

impl DynamicSublayer {
    pub fn open(engine: &dyn FilterEngine, display: &DisplayData, weight: u16) -> NetResult<Self> {
        let mut session = engine.open_dynamic_session()?;
        let provider = session.add_provider(display)?;
        let sublayer = session.add_sublayer(provider, display, weight)?;
        Ok(Self {
            session: Mutex::new(session),
            sublayer,
        })
    }

    pub fn create_app_filter(
        &self,
        display: DisplayData,
        action: FilterAction,
        layer: Layer,
        weight: u8,
        app_path: &str,
        exclude_dns_port: bool,
    ) -> NetResult<ObjectKey> {
        self.session.lock().add_app_filter(&AppFilterDefinition {
            display,
            sublayer: self.sublayer,
            layer,
            action,
            weight,
            app_path: app_path.to_string(),
            exclude_dns_port,
        })
    }

    pub fn create_remote_address_filter(
        &self,
        display: DisplayData,
        action: FilterAction,
        layer: Layer,
        weight: u8,
        address: NetworkAddress,
    ) -> NetResult<ObjectKey> {
        self.session.lock().add_remote_address_filter(&RemoteAddressFilterDefinition {
            display,
            sublayer: self.sublayer,
            layer,
            action,
            weight,
            address,
        })
    }

    pub fn destroy_filter(&self, filter: ObjectKey) -> NetResult<()> {
        self.session.lock().delete_filter(filter)
    }
}

impl Drop for DynamicSublayer {
    fn drop(&mut self) {
        self.session.lock().close();
    }
}
