//! In-memory stand-ins for the OS boundaries, recording every call

use crate::filter::{
    AppCalloutFilterDefinition, AppFilterDefinition, AppFilterRules, DisplayData, FilterAction, FilterEngine,
    FilterSession, Layer, ObjectKey, RemoteAddressFilterDefinition, RemoteAddressRules, SplitTunnelClient,
};
use crate::model::{SplitTunnelSettings, SplitTunnelSettingsSource};
use crate::monitor::{
    InterfaceChange, InterfaceChangeCallback, NotificationHandle, NotificationRegistrar, NotificationType,
    RouteChangeCallback,
};
use crate::net::{AddressFamily, IpInterfaceRow, IpInterfaceTable, NetworkAddress, NetworkInterface, SystemInterfaces};
use crate::routing::{ForwardRow, RouteConfiguration, RoutingTable};
use crate::service::{ServiceCreationOptions, ServiceManager, ServiceStartType, ServiceState};
use crate::{NetError, NetResult, ServiceControlError, ERROR_FILE_NOT_FOUND, ERROR_NOT_FOUND};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════════
//  Interfaces and routes
// ═══════════════════════════════════════════════════════════════════════════════

pub struct FakeInterfaces {
    interfaces: Vec<NetworkInterface>,
}

impl FakeInterfaces {
    pub fn new(interfaces: Vec<NetworkInterface>) -> Self {
        Self { interfaces }
    }
}

impl SystemInterfaces for FakeInterfaces {
    fn interfaces(&self) -> Vec<NetworkInterface> {
        self.interfaces.clone()
    }

    fn best_interface_excluding(&self, excluded_hardware_id: &str) -> Option<NetworkInterface> {
        self.interfaces
            .iter()
            .find(|i| !i.has_hardware_id(excluded_hardware_id))
            .cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteCall {
    Create(RouteConfiguration),
    Delete(RouteConfiguration),
    DeleteTo(IpAddr),
}

#[derive(Default)]
pub struct FakeRoutingTable {
    calls: Mutex<Vec<RouteCall>>,
    routes: Mutex<Vec<RouteConfiguration>>,
    metrics: HashMap<(u32, AddressFamily), u32>,
    loopback: Option<u32>,
    forward_rows: Vec<ForwardRow>,
    failing_deletes: bool,
    failing_creates: bool,
}

impl FakeRoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface_metric(mut self, index: u32, family: AddressFamily, metric: u32) -> Self {
        self.metrics.insert((index, family), metric);
        self
    }

    pub fn with_loopback(mut self, index: u32) -> Self {
        self.loopback = Some(index);
        self
    }

    pub fn with_forward_row(mut self, row: ForwardRow) -> Self {
        self.forward_rows.push(row);
        self
    }

    /// `delete_routes_to` reports failure for every destination
    pub fn failing_deletes(mut self) -> Self {
        self.failing_deletes = true;
        self
    }

    /// `create_route` fails after recording the call
    pub fn failing_creates(mut self) -> Self {
        self.failing_creates = true;
        self
    }

    pub fn calls(&self) -> Vec<RouteCall> {
        self.calls.lock().clone()
    }

    pub fn routes(&self) -> Vec<RouteConfiguration> {
        self.routes.lock().clone()
    }
}

impl RoutingTable for FakeRoutingTable {
    fn create_route(&self, route: &RouteConfiguration) -> NetResult<()> {
        self.calls.lock().push(RouteCall::Create(route.clone()));
        if self.failing_creates {
            return Err(NetError::Route(format!("CreateIpForwardEntry2 failed for {}", route)));
        }
        let mut routes = self.routes.lock();
        if !routes.contains(route) {
            routes.push(route.clone());
        }
        Ok(())
    }

    fn delete_route(&self, route: &RouteConfiguration) -> NetResult<()> {
        self.calls.lock().push(RouteCall::Delete(route.clone()));
        self.routes.lock().retain(|r| {
            !(r.destination == route.destination
                && r.gateway == route.gateway
                && r.interface_index == route.interface_index)
        });
        Ok(())
    }

    fn delete_routes_to(&self, destination: IpAddr) -> bool {
        self.calls.lock().push(RouteCall::DeleteTo(destination));
        if self.failing_deletes {
            return false;
        }
        self.routes.lock().retain(|r| r.destination.ip() != destination);
        true
    }

    fn route_exists(&self, route: &RouteConfiguration) -> bool {
        self.routes.lock().contains(route)
    }

    fn interface_metric(&self, index: u32, family: AddressFamily) -> Option<u32> {
        self.metrics.get(&(index, family)).copied()
    }

    fn loopback_interface_index(&self) -> Option<u32> {
        self.loopback
    }

    fn forward_table(&self, family: AddressFamily) -> NetResult<Vec<ForwardRow>> {
        Ok(self
            .forward_rows
            .iter()
            .filter(|row| AddressFamily::from_ipv6_flag(row.destination.is_ipv6()) == family)
            .cloned()
            .collect())
    }

    fn interface_metrics(&self, family: AddressFamily) -> NetResult<HashMap<u32, u32>> {
        Ok(self
            .metrics
            .iter()
            .filter(|((_, f), _)| *f == family)
            .map(|((index, _), metric)| (*index, *metric))
            .collect())
    }
}

pub struct FakeIpInterfaceTable {
    rows: Mutex<HashMap<(u32, AddressFamily), IpInterfaceRow>>,
    writes: Mutex<Vec<IpInterfaceRow>>,
    failing_writes: bool,
}

impl FakeIpInterfaceTable {
    pub fn new(rows: Vec<IpInterfaceRow>) -> Self {
        Self {
            rows: Mutex::new(rows.into_iter().map(|r| ((r.interface_index, r.family), r)).collect()),
            writes: Mutex::new(Vec::new()),
            failing_writes: false,
        }
    }

    /// Every `set` fails with `ERROR_INVALID_PARAMETER`
    pub fn failing_writes(mut self) -> Self {
        self.failing_writes = true;
        self
    }

    pub fn row(&self, index: u32, family: AddressFamily) -> Option<IpInterfaceRow> {
        self.rows.lock().get(&(index, family)).copied()
    }

    /// Replace a row as if the OS changed it behind our back
    pub fn update(&self, row: IpInterfaceRow) {
        self.rows.lock().insert((row.interface_index, row.family), row);
    }

    pub fn writes(&self) -> Vec<IpInterfaceRow> {
        self.writes.lock().clone()
    }
}

impl IpInterfaceTable for FakeIpInterfaceTable {
    fn get(&self, interface_index: u32, family: AddressFamily) -> NetResult<IpInterfaceRow> {
        self.row(interface_index, family)
            .ok_or_else(|| NetError::ip_helper("GetIpInterfaceEntry", ERROR_NOT_FOUND))
    }

    fn set(&self, row: &IpInterfaceRow) -> NetResult<()> {
        if self.failing_writes {
            return Err(NetError::ip_helper("SetIpInterfaceEntry", crate::ERROR_INVALID_PARAMETER));
        }
        self.writes.lock().push(*row);
        self.update(*row);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Filter engine
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterCall {
    OpenSession,
    CloseSession,
    StartTransaction,
    CommitTransaction,
    AbortTransaction,
    AddProvider,
    AddSublayer {
        weight: u16,
    },
    AddCallout {
        key: ObjectKey,
        layer: Layer,
    },
    AddProviderContext {
        data: Vec<u8>,
    },
    AddAppFilter {
        path: String,
        layer: Layer,
        action: FilterAction,
        exclude_dns_port: bool,
    },
    AddAppCalloutFilter {
        path: String,
        layer: Layer,
        callout: ObjectKey,
    },
    AddRemoteAddressFilter {
        address: NetworkAddress,
        layer: Layer,
        action: FilterAction,
    },
    DeleteFilter(ObjectKey),
}

#[derive(Default)]
struct FilterEngineState {
    calls: Mutex<Vec<FilterCall>>,
    next_key: Mutex<u128>,
    failing_callout: Mutex<Option<Layer>>,
    invalid_paths: Mutex<HashSet<String>>,
}

impl FilterEngineState {
    fn record(&self, call: FilterCall) {
        self.calls.lock().push(call);
    }

    fn next_key(&self) -> ObjectKey {
        let mut next = self.next_key.lock();
        *next += 1;
        ObjectKey(*next)
    }

    fn check_path(&self, path: &str) -> NetResult<()> {
        if self.invalid_paths.lock().contains(path) {
            return Err(NetError::filter("FwpmGetAppIdFromFileName0", ERROR_FILE_NOT_FOUND));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFilterEngine {
    state: Arc<FilterEngineState>,
}

impl FakeFilterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a callout on `layer` fails
    pub fn failing_callout(self, layer: Layer) -> Self {
        *self.state.failing_callout.lock() = Some(layer);
        self
    }

    /// App filters for `path` fail as if the file did not exist
    pub fn with_invalid_path(self, path: &str) -> Self {
        self.state.invalid_paths.lock().insert(path.to_string());
        self
    }

    pub fn calls(&self) -> Vec<FilterCall> {
        self.state.calls.lock().clone()
    }
}

impl FilterEngine for FakeFilterEngine {
    fn open_dynamic_session(&self) -> NetResult<Box<dyn FilterSession>> {
        self.state.record(FilterCall::OpenSession);
        Ok(Box::new(FakeFilterSession {
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct FakeFilterSession {
    state: Arc<FilterEngineState>,
    closed: bool,
}

impl FilterSession for FakeFilterSession {
    fn start_transaction(&mut self) -> NetResult<()> {
        self.state.record(FilterCall::StartTransaction);
        Ok(())
    }

    fn commit_transaction(&mut self) -> NetResult<()> {
        self.state.record(FilterCall::CommitTransaction);
        Ok(())
    }

    fn abort_transaction(&mut self) -> NetResult<()> {
        self.state.record(FilterCall::AbortTransaction);
        Ok(())
    }

    fn add_provider(&mut self, _display: &DisplayData) -> NetResult<ObjectKey> {
        self.state.record(FilterCall::AddProvider);
        Ok(self.state.next_key())
    }

    fn add_sublayer(&mut self, _provider: ObjectKey, _display: &DisplayData, weight: u16) -> NetResult<ObjectKey> {
        self.state.record(FilterCall::AddSublayer { weight });
        Ok(self.state.next_key())
    }

    fn add_callout(
        &mut self,
        key: ObjectKey,
        _provider: ObjectKey,
        layer: Layer,
        _display: &DisplayData,
    ) -> NetResult<ObjectKey> {
        self.state.record(FilterCall::AddCallout { key, layer });
        if *self.state.failing_callout.lock() == Some(layer) {
            return Err(NetError::filter("FwpmCalloutAdd0", 0x8032_0001));
        }
        Ok(key)
    }

    fn add_provider_context(
        &mut self,
        _provider: ObjectKey,
        _display: &DisplayData,
        data: &[u8],
    ) -> NetResult<ObjectKey> {
        self.state.record(FilterCall::AddProviderContext { data: data.to_vec() });
        Ok(self.state.next_key())
    }

    fn add_app_filter(&mut self, filter: &AppFilterDefinition) -> NetResult<ObjectKey> {
        self.state.check_path(&filter.app_path)?;
        self.state.record(FilterCall::AddAppFilter {
            path: filter.app_path.clone(),
            layer: filter.layer,
            action: filter.action,
            exclude_dns_port: filter.exclude_dns_port,
        });
        Ok(self.state.next_key())
    }

    fn add_app_callout_filter(&mut self, filter: &AppCalloutFilterDefinition) -> NetResult<ObjectKey> {
        self.state.check_path(&filter.app_path)?;
        self.state.record(FilterCall::AddAppCalloutFilter {
            path: filter.app_path.clone(),
            layer: filter.layer,
            callout: filter.callout,
        });
        Ok(self.state.next_key())
    }

    fn add_remote_address_filter(&mut self, filter: &RemoteAddressFilterDefinition) -> NetResult<ObjectKey> {
        self.state.record(FilterCall::AddRemoteAddressFilter {
            address: filter.address,
            layer: filter.layer,
            action: filter.action,
        });
        Ok(self.state.next_key())
    }

    fn delete_filter(&mut self, filter: ObjectKey) -> NetResult<()> {
        self.state.record(FilterCall::DeleteFilter(filter));
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.record(FilterCall::CloseSession);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Change notifications
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct FakeRegistrar {
    next_handle: Mutex<usize>,
    route_callbacks: Mutex<HashMap<usize, Arc<RouteChangeCallback>>>,
    interface_callbacks: Mutex<HashMap<usize, Arc<InterfaceChangeCallback>>>,
    cancelled: Mutex<usize>,
    failing: bool,
}

impl FakeRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registration fails
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    fn next(&self) -> NetResult<usize> {
        if self.failing {
            return Err(NetError::ip_helper("NotifyRouteChange2", crate::ERROR_INVALID_PARAMETER));
        }
        let mut next = self.next_handle.lock();
        *next += 1;
        Ok(*next)
    }

    pub fn fire_route_change(&self, kind: NotificationType) {
        let callbacks: Vec<_> = self.route_callbacks.lock().values().cloned().collect();
        for callback in callbacks {
            (callback.as_ref())(kind);
        }
    }

    pub fn fire_interface_change(&self, kind: NotificationType, change: Option<InterfaceChange>) {
        let callbacks: Vec<_> = self.interface_callbacks.lock().values().cloned().collect();
        for callback in callbacks {
            (callback.as_ref())(kind, change);
        }
    }

    pub fn active_route_callbacks(&self) -> usize {
        self.route_callbacks.lock().len()
    }

    pub fn active_interface_callbacks(&self) -> usize {
        self.interface_callbacks.lock().len()
    }

    pub fn cancelled(&self) -> usize {
        *self.cancelled.lock()
    }
}

impl NotificationRegistrar for FakeRegistrar {
    fn register_route_change(&self, callback: RouteChangeCallback) -> NetResult<NotificationHandle> {
        let id = self.next()?;
        self.route_callbacks.lock().insert(id, Arc::new(callback));
        Ok(NotificationHandle(id))
    }

    fn register_interface_change(&self, callback: InterfaceChangeCallback) -> NetResult<NotificationHandle> {
        let id = self.next()?;
        self.interface_callbacks.lock().insert(id, Arc::new(callback));
        Ok(NotificationHandle(id))
    }

    fn cancel(&self, handle: NotificationHandle) -> NetResult<()> {
        self.route_callbacks.lock().remove(&handle.0);
        self.interface_callbacks.lock().remove(&handle.0);
        *self.cancelled.lock() += 1;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Service control
// ═══════════════════════════════════════════════════════════════════════════════

pub struct FakeServiceManager {
    /// States returned by successive queries; the last one sticks
    states: Mutex<VecDeque<ServiceState>>,
    start_results: Mutex<VecDeque<Result<(), ServiceControlError>>>,
    stop_results: Mutex<VecDeque<Result<(), ServiceControlError>>>,
    start_type: Mutex<ServiceStartType>,
    binary_path: Mutex<Option<String>>,
    created: Mutex<Vec<ServiceCreationOptions>>,
    missing: Mutex<bool>,
    start_calls: Mutex<usize>,
    stop_calls: Mutex<usize>,
    query_calls: Mutex<usize>,
}

impl FakeServiceManager {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(VecDeque::new()),
            start_results: Mutex::new(VecDeque::new()),
            stop_results: Mutex::new(VecDeque::new()),
            start_type: Mutex::new(ServiceStartType::Demand),
            binary_path: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            missing: Mutex::new(false),
            start_calls: Mutex::new(0),
            stop_calls: Mutex::new(0),
            query_calls: Mutex::new(0),
        }
    }

    pub fn with_states(self, states: &[ServiceState]) -> Self {
        *self.states.lock() = states.iter().copied().collect();
        self
    }

    pub fn with_start_results(self, results: Vec<Result<(), ServiceControlError>>) -> Self {
        *self.start_results.lock() = results.into();
        self
    }

    pub fn with_stop_results(self, results: Vec<Result<(), ServiceControlError>>) -> Self {
        *self.stop_results.lock() = results.into();
        self
    }

    pub fn with_start_type(self, start_type: ServiceStartType) -> Self {
        *self.start_type.lock() = start_type;
        self
    }

    pub fn with_binary_path(self, path: &str) -> Self {
        *self.binary_path.lock() = Some(path.to_string());
        self
    }

    /// The service does not exist until `create` is called
    pub fn missing(self) -> Self {
        *self.missing.lock() = true;
        self
    }

    pub fn created(&self) -> Vec<ServiceCreationOptions> {
        self.created.lock().clone()
    }

    pub fn current_binary_path(&self) -> Option<String> {
        self.binary_path.lock().clone()
    }

    pub fn start_calls(&self) -> usize {
        *self.start_calls.lock()
    }

    pub fn stop_calls(&self) -> usize {
        *self.stop_calls.lock()
    }

    pub fn query_calls(&self) -> usize {
        *self.query_calls.lock()
    }

    fn ensure_exists(&self) -> Result<(), ServiceControlError> {
        if *self.missing.lock() {
            return Err(ServiceControlError::DoesNotExist);
        }
        Ok(())
    }
}

impl Default for FakeServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for FakeServiceManager {
    fn create(&self, _name: &str, options: &ServiceCreationOptions) -> Result<(), ServiceControlError> {
        self.created.lock().push(options.clone());
        *self.binary_path.lock() = Some(options.path_and_arguments.clone());
        *self.missing.lock() = false;
        Ok(())
    }

    fn query_state(&self, _name: &str) -> Result<ServiceState, ServiceControlError> {
        *self.query_calls.lock() += 1;
        self.ensure_exists()?;
        let mut states = self.states.lock();
        let state = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().copied()
        };
        Ok(state.unwrap_or(ServiceState::Stopped))
    }

    fn start_type(&self, _name: &str) -> Result<ServiceStartType, ServiceControlError> {
        self.ensure_exists()?;
        Ok(*self.start_type.lock())
    }

    fn set_demand_start(&self, _name: &str) -> Result<(), ServiceControlError> {
        self.ensure_exists()?;
        *self.start_type.lock() = ServiceStartType::Demand;
        Ok(())
    }

    fn binary_path(&self, _name: &str) -> Result<String, ServiceControlError> {
        self.ensure_exists()?;
        Ok(self.binary_path.lock().clone().unwrap_or_default())
    }

    fn set_binary_path(&self, _name: &str, path_and_arguments: &str) -> Result<(), ServiceControlError> {
        self.ensure_exists()?;
        *self.binary_path.lock() = Some(path_and_arguments.to_string());
        Ok(())
    }

    fn start(&self, _name: &str) -> Result<(), ServiceControlError> {
        *self.start_calls.lock() += 1;
        self.start_results.lock().pop_front().unwrap_or(Ok(()))
    }

    fn stop(&self, _name: &str) -> Result<(), ServiceControlError> {
        *self.stop_calls.lock() += 1;
        self.stop_results.lock().pop_front().unwrap_or(Ok(()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Split tunnel collaborators
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitTunnelCall {
    EnableExcludeMode {
        apps: Vec<String>,
        ipv4: Ipv4Addr,
        ipv6: Option<Ipv6Addr>,
    },
    EnableIncludeMode {
        apps: Vec<String>,
        ipv4: Ipv4Addr,
        ipv6: Option<Ipv6Addr>,
    },
    Disable,
    AddAppFilters {
        paths: Vec<String>,
        filters: Vec<(Layer, FilterAction)>,
    },
    RemoveAppFilter(String),
    RemoveAllAppFilters,
    AddRemoteAddresses {
        ips: Vec<String>,
        action: FilterAction,
    },
    RemoveRemoteAddress(String),
    RemoveAllRemoteAddresses,
}

/// Call log shared by the split tunnel fakes so ordering across them is kept
#[derive(Clone, Default)]
pub struct CallJournal(Arc<Mutex<Vec<SplitTunnelCall>>>);

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: SplitTunnelCall) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<SplitTunnelCall> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

pub struct RecordingSplitTunnelClient(pub CallJournal);

impl SplitTunnelClient for RecordingSplitTunnelClient {
    fn enable_exclude_mode(&mut self, app_paths: &[String], local_ipv4: Ipv4Addr, local_ipv6: Option<Ipv6Addr>) {
        self.0.record(SplitTunnelCall::EnableExcludeMode {
            apps: app_paths.to_vec(),
            ipv4: local_ipv4,
            ipv6: local_ipv6,
        });
    }

    fn enable_include_mode(&mut self, app_paths: &[String], tunnel_ipv4: Ipv4Addr, tunnel_ipv6: Option<Ipv6Addr>) {
        self.0.record(SplitTunnelCall::EnableIncludeMode {
            apps: app_paths.to_vec(),
            ipv4: tunnel_ipv4,
            ipv6: tunnel_ipv6,
        });
    }

    fn disable(&mut self) {
        self.0.record(SplitTunnelCall::Disable);
    }
}

pub struct RecordingAppFilter(pub CallJournal);

impl AppFilterRules for RecordingAppFilter {
    fn add(&self, paths: &[String], filters: &[(Layer, FilterAction)]) -> NetResult<()> {
        self.0.record(SplitTunnelCall::AddAppFilters {
            paths: paths.to_vec(),
            filters: filters.to_vec(),
        });
        Ok(())
    }

    fn remove(&self, path: &str) {
        self.0.record(SplitTunnelCall::RemoveAppFilter(path.to_string()));
    }

    fn remove_all(&self) {
        self.0.record(SplitTunnelCall::RemoveAllAppFilters);
    }
}

pub struct RecordingRemoteAddresses(pub CallJournal);

impl RemoteAddressRules for RecordingRemoteAddresses {
    fn add(&self, ips: &[String], action: FilterAction) -> NetResult<()> {
        self.0.record(SplitTunnelCall::AddRemoteAddresses {
            ips: ips.to_vec(),
            action,
        });
        Ok(())
    }

    fn remove(&self, ip: &str) {
        self.0.record(SplitTunnelCall::RemoveRemoteAddress(ip.to_string()));
    }

    fn remove_all(&self) {
        self.0.record(SplitTunnelCall::RemoveAllRemoteAddresses);
    }
}

/// Settings store whose snapshot can be swapped between transitions
#[derive(Default)]
pub struct FakeSettings {
    current: Mutex<SplitTunnelSettings>,
    /// Replaces `current` right after the next read
    next: Mutex<Option<SplitTunnelSettings>>,
    reads: AtomicUsize,
}

impl FakeSettings {
    pub fn new(settings: SplitTunnelSettings) -> Self {
        Self {
            current: Mutex::new(settings),
            ..Default::default()
        }
    }

    pub fn set(&self, settings: SplitTunnelSettings) {
        *self.current.lock() = settings;
    }

    /// Simulate the store changing while a transition is in progress
    pub fn change_after_next_read(&self, settings: SplitTunnelSettings) {
        *self.next.lock() = Some(settings);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl SplitTunnelSettingsSource for FakeSettings {
    fn split_tunnel_settings(&self) -> SplitTunnelSettings {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock();
        let snapshot = current.clone();
        if let Some(next) = self.next.lock().take() {
            *current = next;
        }
        snapshot
    }
}
