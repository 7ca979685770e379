//! SSDP client controller.
//!
//! Owns the endpoint sockets, decodes incoming datagrams, maintains the
//! [`RootEntry`] table and raises discovery events.
//!
//! All table mutations happen under the single discovery lock of
//! [`CpData`]; every mutation returns a [`PendingEvents`] batch which is
//! dispatched to the observers *after* the lock has been released, so a
//! subscriber calling back into the controller can never deadlock.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::endpoint::{
    EndpointConfig, bind_multicast_socket, bind_unicast_socket, into_tokio, upnp_enabled_addresses,
};
use super::entry::{DeviceEntry, RootEntry};
use super::message::{
    NotifyInfo, SsdpRequest, SsdpResponse, UpdateInfo, build_msearch, parse_max_age,
};
use super::{
    DEFAULT_SEARCH_PORT, EXPIRATION_TIMER_INTERVAL, SEARCH_PORT_RANGE, UDP_RECEIVE_BUFFER_SIZE,
    multicast_address_for,
};
use crate::config::DiscoveryConfig;
use crate::errors::DiscoveryError;
use crate::types::{parse_server_header, parse_type_version_urn, parse_usn};

/// Why an otherwise decodable message was not applied to the table.
///
/// The kind decides the log level: malformed and incompatible messages are
/// worth a debug line, stale or duplicate ones are routine network noise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reject {
    /// A header required for this message type is missing or malformed.
    Malformed(&'static str),
    /// Boot id regression: the sender already advertised a newer boot.
    Stale,
    /// UPnP major version is not 1.
    IncompatibleVersion,
    /// Re-announcement of a service already known for that device.
    DuplicateService,
    /// byebye/UPDATE for a device we never saw alive.
    UnknownDevice,
}

/// Events flagged by one table mutation, to be raised after the lock is
/// released. The dispatch order is fixed: reboot or configuration change
/// first, then root-added, device-added, service-added, removals last.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PendingEvents {
    pub device_rebooted: Option<(RootEntry, bool)>,
    pub configuration_changed: Option<RootEntry>,
    pub root_device_added: Option<RootEntry>,
    pub device_added: Option<(RootEntry, DeviceEntry)>,
    pub service_added: Option<(RootEntry, DeviceEntry, String)>,
    pub root_devices_removed: Vec<RootEntry>,
}

impl PendingEvents {
    pub fn is_empty(&self) -> bool {
        self.device_rebooted.is_none()
            && self.configuration_changed.is_none()
            && self.root_device_added.is_none()
            && self.device_added.is_none()
            && self.service_added.is_none()
            && self.root_devices_removed.is_empty()
    }
}

struct CpInner {
    active: bool,
    endpoints: Vec<Arc<EndpointConfig>>,
    root_entries: HashMap<String, RootEntry>,
}

/// Shared discovery state of the control point: the endpoint set and the
/// table of root devices currently advertised on the network.
///
/// The apply_* methods are the protocol state machine; the controller's
/// receive loops feed them with decoded datagrams and dispatch the returned
/// [`PendingEvents`]. They operate purely on the table, which keeps them
/// usable for packet replay in tests.
pub struct CpData {
    inner: Mutex<CpInner>,
}

impl Default for CpData {
    fn default() -> Self {
        Self::new()
    }
}

impl CpData {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CpInner {
                active: false,
                endpoints: Vec::new(),
                root_entries: HashMap::new(),
            }),
        }
    }

    /// Snapshot of all current root entries.
    pub fn root_entries(&self) -> Vec<RootEntry> {
        self.inner.lock().root_entries.values().cloned().collect()
    }

    /// Snapshot of one root entry.
    pub fn root_entry(&self, root_device_uuid: &str) -> Option<RootEntry> {
        self.inner.lock().root_entries.get(root_device_uuid).cloned()
    }

    /// Applies one NOTIFY-shaped message (multicast NOTIFY or unicast
    /// search response) received on `local_address` from `remote`.
    pub fn apply_notify(
        &self,
        local_address: IpAddr,
        remote: SocketAddr,
        info: &NotifyInfo<'_>,
        received_at: DateTime<Utc>,
    ) -> Result<PendingEvents, Reject> {
        let boot_id = match info.boot_id {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .map_err(|_| Reject::Malformed("BOOTID.UPNP.ORG"))?,
            ),
            None => None,
        };
        let config_id = match info.config_id {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .map_err(|_| Reject::Malformed("CONFIGID.UPNP.ORG"))?,
            ),
            None => None,
        };
        let (uuid, message_type) = parse_usn(info.usn).map_err(|_| Reject::Malformed("USN"))?;

        match info.nts {
            "ssdp:alive" => self.apply_alive(
                local_address,
                remote,
                info,
                received_at,
                uuid,
                message_type,
                boot_id,
                config_id,
            ),
            "ssdp:byebye" => self.apply_byebye(uuid, boot_id),
            _ => Err(Reject::Malformed("NTS")),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_alive(
        &self,
        local_address: IpAddr,
        remote: SocketAddr,
        info: &NotifyInfo<'_>,
        received_at: DateTime<Utc>,
        uuid: &str,
        message_type: &str,
        boot_id: Option<u32>,
        config_id: Option<u32>,
    ) -> Result<PendingEvents, Reject> {
        let server = info.server.ok_or(Reject::Malformed("SERVER"))?;
        let max_age = info
            .cache_control
            .and_then(parse_max_age)
            .ok_or(Reject::Malformed("CACHE-CONTROL"))?;
        let location = info.location.ok_or(Reject::Malformed("LOCATION"))?;

        let (os_version, upnp_version, product_version) =
            parse_server_header(server).map_err(|_| Reject::Malformed("SERVER"))?;
        if upnp_version.major != 1 {
            return Err(Reject::IncompatibleVersion);
        }

        // Search responses stamp their DATE header; fall back to the
        // receipt time when it is absent or unparseable.
        let received = info
            .date
            .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(received_at);
        let expiration_time = received + Duration::seconds(i64::from(max_age));

        let mut search_port = DEFAULT_SEARCH_PORT;
        if upnp_version.minor >= 1 {
            if boot_id.is_none() || config_id.is_none() {
                return Err(Reject::Malformed("BOOTID.UPNP.ORG/CONFIGID.UPNP.ORG"));
            }
            if let Some(raw) = info.search_port {
                search_port = raw
                    .parse::<u16>()
                    .ok()
                    .filter(|port| SEARCH_PORT_RANGE.contains(port))
                    .ok_or(Reject::Malformed("SEARCHPORT.UPNP.ORG"))?;
            }
        }
        let boot_id_value = boot_id.unwrap_or(0);
        let config_id_value = config_id.unwrap_or(0);

        let mut inner = self.inner.lock();
        let was_added = !inner.root_entries.contains_key(uuid);
        let entry = inner
            .root_entries
            .entry(uuid.to_string())
            .or_insert_with(|| {
                RootEntry::new(uuid, upnp_version, os_version, product_version, expiration_time)
            });
        entry.expiration_time = expiration_time;
        entry.add_or_update_link(local_address, location, info.http_version, search_port);

        if boot_id.is_some() && entry.boot_id > boot_id_value {
            return Err(Reject::Stale);
        }

        let mut events = PendingEvents::default();
        let current_config_id = entry.config_id(&remote);
        let fire_configuration_changed =
            current_config_id != 0 && current_config_id != config_id_value;
        entry.set_config_id(remote, config_id_value);
        let fire_rebooted = !was_added && boot_id.is_some() && entry.boot_id < boot_id_value;
        entry.boot_id = boot_id_value;

        let mut fire_root_added = false;
        let mut fire_device_added = false;
        let mut fire_service_added = false;
        let mut service_urn = None;
        if message_type == "upnp:rootdevice" {
            entry.get_or_create_device_entry(uuid);
            fire_root_added = was_added;
        } else if message_type.starts_with("urn:") {
            if message_type.contains(":device:") {
                let (device_type, device_type_version) = parse_type_version_urn(message_type)
                    .map_err(|_| Reject::Malformed("USN device type"))?;
                let device = entry.get_or_create_device_entry(uuid);
                fire_device_added = device.device_type.is_none();
                device.device_type = Some(device_type.to_string());
                device.device_type_version = Some(device_type_version);
            } else if message_type.contains(":service:") {
                let device = entry.get_or_create_device_entry(uuid);
                if device.services.iter().any(|s| s == message_type) {
                    return Err(Reject::DuplicateService);
                }
                device.services.push(message_type.to_string());
                fire_service_added = true;
                service_urn = Some(message_type.to_string());
            }
            // Other urn: suffixes carry nothing to record but still count
            // as a valid refresh of the entry.
        } else {
            return Err(Reject::Malformed("USN message type"));
        }

        // Snapshots reflect the fully updated entry
        let entry_snapshot = entry.clone();
        let device_snapshot = entry.devices.get(uuid).cloned();
        if fire_rebooted {
            events.device_rebooted = Some((entry_snapshot.clone(), fire_configuration_changed));
        } else if fire_configuration_changed {
            events.configuration_changed = Some(entry_snapshot.clone());
        }
        if fire_root_added {
            events.root_device_added = Some(entry_snapshot.clone());
        }
        if fire_device_added {
            if let Some(device) = device_snapshot.clone() {
                events.device_added = Some((entry_snapshot.clone(), device));
            }
        }
        if fire_service_added {
            if let (Some(device), Some(urn)) = (device_snapshot, service_urn) {
                events.service_added = Some((entry_snapshot, device, urn));
            }
        }
        Ok(events)
    }

    /// A byebye for *any* device or service of a root entry expires the
    /// whole entry.
    fn apply_byebye(&self, uuid: &str, boot_id: Option<u32>) -> Result<PendingEvents, Reject> {
        let mut inner = self.inner.lock();
        let root_uuid = inner
            .root_entries
            .values()
            .find(|entry| entry.contains_device(uuid))
            .map(|entry| entry.root_device_uuid.clone())
            .ok_or(Reject::UnknownDevice)?;
        if let Some(boot_id) = boot_id {
            let entry = &inner.root_entries[&root_uuid];
            if entry.boot_id > boot_id {
                return Err(Reject::Stale);
            }
        }
        let mut events = PendingEvents::default();
        if let Some(entry) = inner.root_entries.remove(&root_uuid) {
            events.root_devices_removed.push(entry);
        }
        Ok(events)
    }

    /// Applies an `UPDATE * HTTP/1.1` reboot announcement. Unlike byebye,
    /// UPDATE identifies the *root* device directly.
    pub fn apply_update(&self, info: &UpdateInfo<'_>) -> Result<PendingEvents, Reject> {
        let boot_id = info
            .boot_id
            .parse::<u32>()
            .map_err(|_| Reject::Malformed("BOOTID.UPNP.ORG"))?;
        let next_boot_id = info
            .next_boot_id
            .parse::<u32>()
            .map_err(|_| Reject::Malformed("NEXTBOOTID.UPNP.ORG"))?;
        let (uuid, _) = parse_usn(info.usn).map_err(|_| Reject::Malformed("USN"))?;

        let mut inner = self.inner.lock();
        let entry = inner
            .root_entries
            .get_mut(uuid)
            .ok_or(Reject::UnknownDevice)?;
        if entry.boot_id > boot_id {
            return Err(Reject::Stale);
        }
        let fire_rebooted = entry.boot_id < boot_id;
        entry.boot_id = next_boot_id;

        let mut events = PendingEvents::default();
        if fire_rebooted {
            events.device_rebooted = Some((entry.clone(), false));
        }
        Ok(events)
    }

    /// Removes every root entry whose advertisement has expired.
    pub fn collect_expired(&self, now: DateTime<Utc>) -> PendingEvents {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .root_entries
            .iter()
            .filter(|(_, entry)| entry.expiration_time < now)
            .map(|(uuid, _)| uuid.clone())
            .collect();
        let mut events = PendingEvents::default();
        for uuid in expired {
            if let Some(entry) = inner.root_entries.remove(&uuid) {
                events.root_devices_removed.push(entry);
            }
        }
        events
    }

    fn is_active(&self) -> bool {
        self.inner.lock().active
    }
}

type RootEntryHandler = Box<dyn Fn(&RootEntry) + Send + Sync>;
type DeviceHandler = Box<dyn Fn(&RootEntry, &DeviceEntry) + Send + Sync>;
type ServiceHandler = Box<dyn Fn(&RootEntry, &DeviceEntry, &str) + Send + Sync>;
type RebootHandler = Box<dyn Fn(&RootEntry, bool) + Send + Sync>;

#[derive(Default)]
struct ObserverLists {
    root_device_added: Vec<RootEntryHandler>,
    device_added: Vec<DeviceHandler>,
    service_added: Vec<ServiceHandler>,
    root_device_removed: Vec<RootEntryHandler>,
    device_rebooted: Vec<RebootHandler>,
    device_configuration_changed: Vec<RootEntryHandler>,
}

/// Observer lists of the controller, one per event name.
///
/// Callbacks run on the controller's receive/timer tasks and must not
/// block; hand the work to a channel or a spawned task.
#[derive(Default)]
pub(crate) struct SsdpEventRegistry {
    lists: RwLock<ObserverLists>,
}

impl SsdpEventRegistry {
    /// Raises one batch of flagged events in the fixed order.
    fn dispatch(&self, events: PendingEvents) {
        if events.is_empty() {
            return;
        }
        let observers = self.lists.read();
        if let Some((entry, configuration_changed)) = &events.device_rebooted {
            for handler in &observers.device_rebooted {
                handler(entry, *configuration_changed);
            }
        } else if let Some(entry) = &events.configuration_changed {
            for handler in &observers.device_configuration_changed {
                handler(entry);
            }
        }
        if let Some(entry) = &events.root_device_added {
            for handler in &observers.root_device_added {
                handler(entry);
            }
        }
        if let Some((entry, device)) = &events.device_added {
            for handler in &observers.device_added {
                handler(entry, device);
            }
        }
        if let Some((entry, device, service_urn)) = &events.service_added {
            for handler in &observers.service_added {
                handler(entry, device, service_urn);
            }
        }
        for entry in &events.root_devices_removed {
            for handler in &observers.root_device_removed {
                handler(entry);
            }
        }
    }
}

/// Active SSDP listener and search client of a UPnP control point.
///
/// [`start`](Self::start) binds one multicast-receive socket and one
/// unicast socket per UPnP-eligible local address, arms the expiration
/// timer and issues an initial `ssdp:all` search. Binding failures are
/// per-endpoint: the controller starts with whatever endpoints could be
/// bound.
pub struct SsdpClientController {
    cp: Arc<CpData>,
    registry: Arc<SsdpEventRegistry>,
    config: DiscoveryConfig,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SsdpClientController {
    pub fn new(cp: Arc<CpData>, config: DiscoveryConfig) -> Self {
        Self {
            cp,
            registry: Arc::new(SsdpEventRegistry::default()),
            config,
            cancel: Mutex::new(None),
        }
    }

    /// Shared discovery state, for callers that need entry snapshots.
    pub fn cp_data(&self) -> Arc<CpData> {
        Arc::clone(&self.cp)
    }

    /// Snapshot of the root entries currently advertised on the network.
    pub fn root_entries(&self) -> Vec<RootEntry> {
        self.cp.root_entries()
    }

    // Observer registration, one method per event name.

    pub fn on_root_device_added(&self, handler: impl Fn(&RootEntry) + Send + Sync + 'static) {
        self.registry.lists.write().root_device_added.push(Box::new(handler));
    }

    pub fn on_device_added(
        &self,
        handler: impl Fn(&RootEntry, &DeviceEntry) + Send + Sync + 'static,
    ) {
        self.registry.lists.write().device_added.push(Box::new(handler));
    }

    pub fn on_service_added(
        &self,
        handler: impl Fn(&RootEntry, &DeviceEntry, &str) + Send + Sync + 'static,
    ) {
        self.registry.lists.write().service_added.push(Box::new(handler));
    }

    pub fn on_root_device_removed(&self, handler: impl Fn(&RootEntry) + Send + Sync + 'static) {
        self.registry.lists.write().root_device_removed.push(Box::new(handler));
    }

    pub fn on_device_rebooted(&self, handler: impl Fn(&RootEntry, bool) + Send + Sync + 'static) {
        self.registry.lists.write().device_rebooted.push(Box::new(handler));
    }

    pub fn on_device_configuration_changed(
        &self,
        handler: impl Fn(&RootEntry) + Send + Sync + 'static,
    ) {
        self.registry
            .lists
            .write()
            .device_configuration_changed
            .push(Box::new(handler));
    }

    /// Starts the controller: binds the endpoint sockets, spawns the
    /// receive loops and the expiration timer, then issues an initial
    /// `ssdp:all` multicast search.
    pub async fn start(&self) -> Result<(), DiscoveryError> {
        {
            let mut inner = self.cp.inner.lock();
            if inner.active {
                return Err(DiscoveryError::AlreadyActive);
            }
            inner.active = true;
        }
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let addresses = match upnp_enabled_addresses(&self.config) {
            Ok(addresses) => addresses,
            Err(e) => {
                self.cp.inner.lock().active = false;
                *self.cancel.lock() = None;
                return Err(e.into());
            }
        };
        let mut endpoints = Vec::new();
        for address in addresses {
            let multicast_socket = match bind_multicast_socket(&address).and_then(into_tokio) {
                Ok(socket) => Some(Arc::new(socket)),
                Err(e) => {
                    info!("SSDP: unable to bind multicast socket on {}: {}", address, e);
                    None
                }
            };
            let unicast_socket = match bind_unicast_socket(&address).and_then(into_tokio) {
                Ok(socket) => Arc::new(socket),
                Err(e) => {
                    info!("SSDP: unable to bind unicast socket on {}: {}", address, e);
                    continue;
                }
            };
            let endpoint = Arc::new(EndpointConfig {
                address,
                multicast_address: multicast_address_for(&address),
                multicast_socket: multicast_socket.clone(),
                unicast_socket: Arc::clone(&unicast_socket),
            });
            if let Some(socket) = multicast_socket {
                tokio::spawn(run_multicast_receive_loop(
                    Arc::clone(&self.cp),
                    Arc::clone(&self.registry),
                    Arc::clone(&endpoint),
                    socket,
                    cancel.clone(),
                ));
            }
            tokio::spawn(run_unicast_receive_loop(
                Arc::clone(&self.cp),
                Arc::clone(&self.registry),
                Arc::clone(&endpoint),
                unicast_socket,
                cancel.clone(),
            ));
            endpoints.push(endpoint);
        }
        let endpoint_count = endpoints.len();
        self.cp.inner.lock().endpoints = endpoints;

        tokio::spawn(run_expiration_timer(
            Arc::clone(&self.cp),
            Arc::clone(&self.registry),
            cancel,
        ));
        info!("✅ SSDP client controller started on {} endpoint(s)", endpoint_count);

        self.search_all(None).await;
        Ok(())
    }

    /// Unconditional teardown: stops the timer and the receive loops,
    /// closes all sockets and clears the root entry table *without*
    /// raising removal events.
    pub fn close(&self) {
        {
            let mut inner = self.cp.inner.lock();
            if !inner.active {
                return;
            }
            inner.active = false;
            inner.endpoints.clear();
            inner.root_entries.clear();
        }
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        info!("👋 SSDP client controller closed");
    }

    /// Searches for all UPnP objects (`ssdp:all`).
    pub async fn search_all(&self, target: Option<SocketAddr>) {
        self.search_for_target("ssdp:all", target).await;
    }

    /// Searches for all root devices (`upnp:rootdevice`).
    pub async fn search_root_devices(&self, target: Option<SocketAddr>) {
        self.search_for_target("upnp:rootdevice", target).await;
    }

    /// Searches for the device with the given UUID.
    pub async fn search_device_by_uuid(&self, uuid: &str, target: Option<SocketAddr>) {
        self.search_for_target(&format!("uuid:{}", uuid), target).await;
    }

    /// Searches for devices of the given type and version.
    pub async fn search_device_by_device_type_version(
        &self,
        device_type: &str,
        device_type_version: u32,
        target: Option<SocketAddr>,
    ) {
        self.search_for_target(
            &format!("urn:{}:{}", device_type, device_type_version),
            target,
        )
        .await;
    }

    /// Sends an M-SEARCH for the given search target: unicast when a
    /// destination endpoint is known, multicast on every bound endpoint
    /// otherwise.
    async fn search_for_target(&self, st: &str, target: Option<SocketAddr>) {
        let endpoints: Vec<Arc<EndpointConfig>> = self.cp.inner.lock().endpoints.clone();
        let user_agent = self.config.machine_info_header();
        match target {
            Some(target) => {
                // The response comes back on the socket the search left from
                let Some(endpoint) = endpoints
                    .iter()
                    .find(|e| e.address.is_ipv4() == target.is_ipv4())
                else {
                    debug!("SSDP: no endpoint with the address family of {}", target);
                    return;
                };
                let request = build_msearch(&target.to_string(), None, st, &user_agent);
                match endpoint.unicast_socket.send_to(&request.encode(), target).await {
                    Ok(_) => debug!("📤 M-SEARCH sent to {} (ST={})", target, st),
                    Err(e) => warn!("❌ Failed to send M-SEARCH to {}: {}", target, e),
                }
            }
            None => {
                for endpoint in &endpoints {
                    let group = endpoint.multicast_target();
                    let request = build_msearch(
                        &group.to_string(),
                        Some(self.config.search_mx),
                        st,
                        &user_agent,
                    );
                    match endpoint.unicast_socket.send_to(&request.encode(), group).await {
                        Ok(_) => {
                            debug!("📤 M-SEARCH sent on {} (ST={})", endpoint.address, st);
                        }
                        Err(e) => {
                            warn!(
                                "❌ Failed to send M-SEARCH on {}: {}",
                                endpoint.address, e
                            );
                        }
                    }
                }
            }
        }
    }
}

fn log_reject(remote: SocketAddr, reject: &Reject) {
    match reject {
        Reject::Malformed(what) => {
            debug!("SSDP: dropping message from {} ({} malformed)", remote, what);
        }
        Reject::IncompatibleVersion => {
            debug!("SSDP: dropping message from {} (incompatible UPnP version)", remote);
        }
        Reject::Stale | Reject::DuplicateService | Reject::UnknownDevice => {
            trace!("SSDP: ignoring message from {} ({:?})", remote, reject);
        }
    }
}

/// Handles one request-shaped datagram received on a multicast socket.
fn process_request_datagram(
    cp: &CpData,
    registry: &SsdpEventRegistry,
    local_address: IpAddr,
    remote: SocketAddr,
    data: &[u8],
) {
    let request = match SsdpRequest::parse(data) {
        Ok(request) => request,
        Err(e) => {
            debug!("SSDP: problem parsing multicast packet from {}: {}", remote, e);
            return;
        }
    };
    let result = match request.method.as_str() {
        "NOTIFY" => NotifyInfo::from_request(&request).map_err(|e| {
            debug!("SSDP: invalid NOTIFY from {}: {}", remote, e);
        }).and_then(|info| {
            cp.apply_notify(local_address, remote, &info, Utc::now())
                .map_err(|reject| log_reject(remote, &reject))
        }),
        "UPDATE" => UpdateInfo::from_request(&request).map_err(|e| {
            debug!("SSDP: invalid UPDATE from {}: {}", remote, e);
        }).and_then(|info| {
            cp.apply_update(&info).map_err(|reject| log_reject(remote, &reject))
        }),
        "M-SEARCH" => {
            // Another control point searching; we are not a device.
            return;
        }
        other => {
            trace!("SSDP: unknown method '{}' from {}", other, remote);
            return;
        }
    };
    if let Ok(events) = result {
        registry.dispatch(events);
    }
}

/// Handles one response-shaped datagram received on a unicast socket.
fn process_response_datagram(
    cp: &CpData,
    registry: &SsdpEventRegistry,
    local_address: IpAddr,
    remote: SocketAddr,
    data: &[u8],
) {
    let response = match SsdpResponse::parse(data) {
        Ok(response) => response,
        Err(e) => {
            debug!("SSDP: problem parsing unicast packet from {}: {}", remote, e);
            return;
        }
    };
    if response.status != 200 {
        trace!("SSDP: ignoring {} search response from {}", response.status, remote);
        return;
    }
    let info = match NotifyInfo::from_response(&response) {
        Ok(info) => info,
        Err(e) => {
            debug!("SSDP: invalid search response from {}: {}", remote, e);
            return;
        }
    };
    match cp.apply_notify(local_address, remote, &info, Utc::now()) {
        Ok(events) => registry.dispatch(events),
        Err(reject) => log_reject(remote, &reject),
    }
}

async fn run_multicast_receive_loop(
    cp: Arc<CpData>,
    registry: Arc<SsdpEventRegistry>,
    endpoint: Arc<EndpointConfig>,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
) {
    let mut buffer = vec![0u8; UDP_RECEIVE_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buffer) => match received {
                Ok((len, remote)) => {
                    if !cp.is_active() {
                        break;
                    }
                    process_request_datagram(
                        &cp, &registry, endpoint.address, remote, &buffer[..len],
                    );
                }
                Err(e) => {
                    info!(
                        "SSDP: stopping multicast listener on {}: {}",
                        endpoint.address, e
                    );
                    break;
                }
            },
        }
    }
}

async fn run_unicast_receive_loop(
    cp: Arc<CpData>,
    registry: Arc<SsdpEventRegistry>,
    endpoint: Arc<EndpointConfig>,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
) {
    let mut buffer = vec![0u8; UDP_RECEIVE_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buffer) => match received {
                Ok((len, remote)) => {
                    if !cp.is_active() {
                        break;
                    }
                    process_response_datagram(
                        &cp, &registry, endpoint.address, remote, &buffer[..len],
                    );
                }
                Err(e) => {
                    info!(
                        "SSDP: stopping unicast listener on {}: {}",
                        endpoint.address, e
                    );
                    break;
                }
            },
        }
    }
}

/// Once per second, drops every root entry whose advertisement expired and
/// raises the removals outside the lock.
async fn run_expiration_timer(
    cp: Arc<CpData>,
    registry: Arc<SsdpEventRegistry>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(EXPIRATION_TIMER_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !cp.is_active() {
                    break;
                }
                let events = cp.collect_expired(Utc::now());
                registry.dispatch(events);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HttpVersion;

    fn local() -> IpAddr {
        "192.168.1.10".parse().unwrap()
    }

    fn remote() -> SocketAddr {
        "192.168.1.42:50000".parse().unwrap()
    }

    fn alive<'a>(usn: &'a str, server: &'a str) -> NotifyInfo<'a> {
        NotifyInfo {
            http_version: HttpVersion::V1_1,
            date: None,
            cache_control: Some("max-age=1800"),
            location: Some("http://192.168.1.42:8080/description.xml"),
            server: Some(server),
            nts: "ssdp:alive",
            usn,
            boot_id: None,
            config_id: None,
            search_port: None,
        }
    }

    fn alive_v11<'a>(usn: &'a str, boot_id: &'a str, config_id: &'a str) -> NotifyInfo<'a> {
        NotifyInfo {
            boot_id: Some(boot_id),
            config_id: Some(config_id),
            ..alive(usn, "Linux/5.0 UPnP/1.1 Test/1.0")
        }
    }

    fn byebye(usn: &str) -> NotifyInfo<'_> {
        NotifyInfo {
            http_version: HttpVersion::V1_1,
            date: None,
            cache_control: None,
            location: None,
            server: None,
            nts: "ssdp:byebye",
            usn,
            boot_id: None,
            config_id: None,
            search_port: None,
        }
    }

    #[test]
    fn test_alive_rootdevice_fires_root_added_with_expiration() {
        let cp = CpData::new();
        let now = Utc::now();
        let events = cp
            .apply_notify(
                local(),
                remote(),
                &alive("uuid:abc::upnp:rootdevice", "OS/1.0 UPnP/1.0 Product/1.0"),
                now,
            )
            .unwrap();

        let added = events.root_device_added.expect("root device added");
        assert_eq!(added.root_device_uuid, "abc");
        assert!(added.contains_device("abc"));
        assert_eq!(added.expiration_time, now + Duration::seconds(1800));

        let entry = cp.root_entry("abc").unwrap();
        assert_eq!(entry.preferred_link().unwrap().search_port, 1900);
    }

    #[test]
    fn test_second_alive_refreshes_without_new_event() {
        let cp = CpData::new();
        let t0 = Utc::now();
        let info = alive("uuid:abc::upnp:rootdevice", "OS/1.0 UPnP/1.0 Product/1.0");
        cp.apply_notify(local(), remote(), &info, t0).unwrap();
        let t1 = t0 + Duration::seconds(60);
        let events = cp.apply_notify(local(), remote(), &info, t1).unwrap();
        assert!(events.is_empty());
        let entry = cp.root_entry("abc").unwrap();
        assert_eq!(entry.expiration_time, t1 + Duration::seconds(1800));
    }

    #[test]
    fn test_missing_required_headers_reject() {
        let cp = CpData::new();
        let mut info = alive("uuid:abc::upnp:rootdevice", "OS/1.0 UPnP/1.0 Product/1.0");
        info.cache_control = None;
        assert_eq!(
            cp.apply_notify(local(), remote(), &info, Utc::now()),
            Err(Reject::Malformed("CACHE-CONTROL"))
        );

        let mut info = alive("uuid:abc::upnp:rootdevice", "OS/1.0 UPnP/1.0 Product/1.0");
        info.server = None;
        assert_eq!(
            cp.apply_notify(local(), remote(), &info, Utc::now()),
            Err(Reject::Malformed("SERVER"))
        );

        // Bare device-UUID USN without "::" is discarded
        let info = alive("uuid:abc", "OS/1.0 UPnP/1.0 Product/1.0");
        assert_eq!(
            cp.apply_notify(local(), remote(), &info, Utc::now()),
            Err(Reject::Malformed("USN"))
        );
        assert!(cp.root_entries().is_empty());
    }

    #[test]
    fn test_upnp_version_must_be_major_1() {
        let cp = CpData::new();
        let info = alive("uuid:abc::upnp:rootdevice", "OS/1.0 UPnP/2.0 Product/1.0");
        assert_eq!(
            cp.apply_notify(local(), remote(), &info, Utc::now()),
            Err(Reject::IncompatibleVersion)
        );
    }

    #[test]
    fn test_upnp_11_requires_boot_and_config_id() {
        let cp = CpData::new();
        let info = alive("uuid:abc::upnp:rootdevice", "OS/1.0 UPnP/1.1 Product/1.0");
        assert!(matches!(
            cp.apply_notify(local(), remote(), &info, Utc::now()),
            Err(Reject::Malformed(_))
        ));
        let events = cp
            .apply_notify(
                local(),
                remote(),
                &alive_v11("uuid:abc::upnp:rootdevice", "1", "1"),
                Utc::now(),
            )
            .unwrap();
        assert!(events.root_device_added.is_some());
    }

    #[test]
    fn test_search_port_range_is_enforced() {
        let cp = CpData::new();
        let mut info = alive_v11("uuid:abc::upnp:rootdevice", "1", "1");
        info.search_port = Some("80");
        assert_eq!(
            cp.apply_notify(local(), remote(), &info, Utc::now()),
            Err(Reject::Malformed("SEARCHPORT.UPNP.ORG"))
        );

        info.search_port = Some("50000");
        cp.apply_notify(local(), remote(), &info, Utc::now()).unwrap();
        let entry = cp.root_entry("abc").unwrap();
        assert_eq!(entry.preferred_link().unwrap().search_port, 50000);
    }

    #[test]
    fn test_boot_id_regression_is_rejected() {
        let cp = CpData::new();
        cp.apply_notify(
            local(),
            remote(),
            &alive_v11("uuid:abc::upnp:rootdevice", "5", "1"),
            Utc::now(),
        )
        .unwrap();

        // Same boot id again: accepted, no reboot
        let events = cp
            .apply_notify(
                local(),
                remote(),
                &alive_v11("uuid:abc::upnp:rootdevice", "5", "1"),
                Utc::now(),
            )
            .unwrap();
        assert!(events.device_rebooted.is_none());

        // Lower boot id: stale, no state change
        let result = cp.apply_notify(
            local(),
            remote(),
            &alive_v11("uuid:abc::urn:schemas-upnp-org:device:MediaRenderer:1", "4", "1"),
            Utc::now(),
        );
        assert_eq!(result, Err(Reject::Stale));
        let entry = cp.root_entry("abc").unwrap();
        assert_eq!(entry.boot_id, 5);
        assert!(entry.devices["abc"].device_type.is_none());
    }

    #[test]
    fn test_boot_id_increment_fires_reboot() {
        let cp = CpData::new();
        cp.apply_notify(
            local(),
            remote(),
            &alive_v11("uuid:abc::upnp:rootdevice", "5", "1"),
            Utc::now(),
        )
        .unwrap();
        let events = cp
            .apply_notify(
                local(),
                remote(),
                &alive_v11("uuid:abc::upnp:rootdevice", "6", "1"),
                Utc::now(),
            )
            .unwrap();
        let (entry, configuration_changed) = events.device_rebooted.expect("reboot");
        assert_eq!(entry.boot_id, 6);
        assert!(!configuration_changed);
        // A reboot of a known entry is not a new root device
        assert!(events.root_device_added.is_none());
    }

    #[test]
    fn test_config_id_change_fires_configuration_changed() {
        let cp = CpData::new();
        cp.apply_notify(
            local(),
            remote(),
            &alive_v11("uuid:abc::upnp:rootdevice", "5", "7"),
            Utc::now(),
        )
        .unwrap();

        // Same boot id, new config id: configuration changed, no reboot
        let events = cp
            .apply_notify(
                local(),
                remote(),
                &alive_v11("uuid:abc::upnp:rootdevice", "5", "8"),
                Utc::now(),
            )
            .unwrap();
        assert!(events.device_rebooted.is_none());
        assert!(events.configuration_changed.is_some());

        // Reboot with config change: folded into the reboot event
        let events = cp
            .apply_notify(
                local(),
                remote(),
                &alive_v11("uuid:abc::upnp:rootdevice", "6", "9"),
                Utc::now(),
            )
            .unwrap();
        let (_, configuration_changed) = events.device_rebooted.expect("reboot");
        assert!(configuration_changed);
        assert!(events.configuration_changed.is_none());
    }

    #[test]
    fn test_device_and_service_announcements() {
        let cp = CpData::new();
        cp.apply_notify(
            local(),
            remote(),
            &alive("uuid:abc::upnp:rootdevice", "OS/1.0 UPnP/1.0 Product/1.0"),
            Utc::now(),
        )
        .unwrap();

        // A device-type announcement for the same UUID sets the type and
        // fires device-added once
        let events = cp
            .apply_notify(
                local(),
                remote(),
                &alive(
                    "uuid:abc::urn:schemas-upnp-org:device:MediaRenderer:1",
                    "OS/1.0 UPnP/1.0 Product/1.0",
                ),
                Utc::now(),
            )
            .unwrap();
        let (entry, device) = events.device_added.expect("device added");
        assert_eq!(entry.root_device_uuid, "abc");
        assert_eq!(device.uuid, "abc");
        assert_eq!(
            device.device_type.as_deref(),
            Some("schemas-upnp-org:device:MediaRenderer")
        );

        // Re-announcing the type is not a new device
        let events = cp
            .apply_notify(
                local(),
                remote(),
                &alive(
                    "uuid:abc::urn:schemas-upnp-org:device:MediaRenderer:1",
                    "OS/1.0 UPnP/1.0 Product/1.0",
                ),
                Utc::now(),
            )
            .unwrap();
        assert!(events.device_added.is_none());

        let events = cp
            .apply_notify(
                local(),
                remote(),
                &alive(
                    "uuid:abc::urn:schemas-upnp-org:service:AVTransport:1",
                    "OS/1.0 UPnP/1.0 Product/1.0",
                ),
                Utc::now(),
            )
            .unwrap();
        let (_, device, urn) = events.service_added.expect("service added");
        assert_eq!(device.uuid, "abc");
        assert_eq!(urn, "urn:schemas-upnp-org:service:AVTransport:1");

        // Duplicate service announcement is dropped
        let result = cp.apply_notify(
            local(),
            remote(),
            &alive(
                "uuid:abc::urn:schemas-upnp-org:service:AVTransport:1",
                "OS/1.0 UPnP/1.0 Product/1.0",
            ),
            Utc::now(),
        );
        assert_eq!(result, Err(Reject::DuplicateService));
    }

    #[test]
    fn test_byebye_removes_the_whole_root_entry() {
        let cp = CpData::new();
        cp.apply_notify(
            local(),
            remote(),
            &alive("uuid:abc::upnp:rootdevice", "OS/1.0 UPnP/1.0 Product/1.0"),
            Utc::now(),
        )
        .unwrap();
        cp.apply_notify(
            local(),
            remote(),
            &alive(
                "uuid:abc::urn:schemas-upnp-org:service:AVTransport:1",
                "OS/1.0 UPnP/1.0 Product/1.0",
            ),
            Utc::now(),
        )
        .unwrap();

        // byebye for a service USN of the root still removes everything
        let events = cp
            .apply_notify(
                local(),
                remote(),
                &byebye("uuid:abc::urn:schemas-upnp-org:service:AVTransport:1"),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(events.root_devices_removed.len(), 1);
        assert_eq!(events.root_devices_removed[0].root_device_uuid, "abc");
        assert!(cp.root_entries().is_empty());

        // A subsequent alive is a fresh add
        let events = cp
            .apply_notify(
                local(),
                remote(),
                &alive("uuid:abc::upnp:rootdevice", "OS/1.0 UPnP/1.0 Product/1.0"),
                Utc::now(),
            )
            .unwrap();
        assert!(events.root_device_added.is_some());
    }

    #[test]
    fn test_byebye_for_unknown_device_is_ignored() {
        let cp = CpData::new();
        assert_eq!(
            cp.apply_notify(local(), remote(), &byebye("uuid:nope::upnp:rootdevice"), Utc::now()),
            Err(Reject::UnknownDevice)
        );
    }

    #[test]
    fn test_stale_byebye_is_rejected() {
        let cp = CpData::new();
        cp.apply_notify(
            local(),
            remote(),
            &alive_v11("uuid:abc::upnp:rootdevice", "5", "1"),
            Utc::now(),
        )
        .unwrap();
        let mut info = byebye("uuid:abc::upnp:rootdevice");
        info.boot_id = Some("4");
        assert_eq!(
            cp.apply_notify(local(), remote(), &info, Utc::now()),
            Err(Reject::Stale)
        );
        assert_eq!(cp.root_entries().len(), 1);
    }

    #[test]
    fn test_update_packet_advances_boot_id() {
        let cp = CpData::new();
        cp.apply_notify(
            local(),
            remote(),
            &alive_v11("uuid:abc::upnp:rootdevice", "5", "1"),
            Utc::now(),
        )
        .unwrap();

        let events = cp
            .apply_update(&UpdateInfo {
                usn: "uuid:abc::upnp:rootdevice",
                boot_id: "6",
                next_boot_id: "7",
            })
            .unwrap();
        let (entry, configuration_changed) = events.device_rebooted.expect("reboot");
        assert!(!configuration_changed);
        assert_eq!(entry.boot_id, 7);
        assert_eq!(cp.root_entry("abc").unwrap().boot_id, 7);

        // Stale UPDATE
        assert_eq!(
            cp.apply_update(&UpdateInfo {
                usn: "uuid:abc::upnp:rootdevice",
                boot_id: "5",
                next_boot_id: "6",
            }),
            Err(Reject::Stale)
        );

        // Non-numeric boot ids are malformed
        assert!(matches!(
            cp.apply_update(&UpdateInfo {
                usn: "uuid:abc::upnp:rootdevice",
                boot_id: "x",
                next_boot_id: "8",
            }),
            Err(Reject::Malformed(_))
        ));
    }

    #[test]
    fn test_expiration_removes_entries() {
        let cp = CpData::new();
        let t0 = Utc::now();
        let mut info = alive("uuid:abc::upnp:rootdevice", "OS/1.0 UPnP/1.0 Product/1.0");
        info.cache_control = Some("max-age=10");
        cp.apply_notify(local(), remote(), &info, t0).unwrap();

        // Not expired yet
        let events = cp.collect_expired(t0 + Duration::seconds(9));
        assert!(events.root_devices_removed.is_empty());

        let events = cp.collect_expired(t0 + Duration::seconds(11));
        assert_eq!(events.root_devices_removed.len(), 1);
        assert_eq!(events.root_devices_removed[0].root_device_uuid, "abc");
        assert!(cp.root_entries().is_empty());
    }

    #[test]
    fn test_search_response_expiration_uses_date_header() {
        let cp = CpData::new();
        let received_at = Utc::now();
        let mut info = alive_v11("uuid:abc::upnp:rootdevice", "1", "1");
        info.date = Some("Tue, 5 May 2026 10:00:00 +0000");
        info.cache_control = Some("max-age=100");
        cp.apply_notify(local(), remote(), &info, received_at).unwrap();

        let entry = cp.root_entry("abc").unwrap();
        let date = DateTime::parse_from_rfc2822("Tue, 5 May 2026 10:00:00 +0000")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(entry.expiration_time, date + Duration::seconds(100));
    }

    #[test]
    fn test_dispatch_order_and_outside_lock() {
        use std::sync::Mutex as StdMutex;

        let cp = Arc::new(CpData::new());
        let registry = SsdpEventRegistry::default();
        let order: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

        let o = Arc::clone(&order);
        registry.lists.write().device_rebooted.push(Box::new(move |_, _| {
            o.lock().unwrap().push("rebooted");
        }));
        let o = Arc::clone(&order);
        registry.lists.write().root_device_added.push(Box::new(move |_| {
            o.lock().unwrap().push("root_added");
        }));
        let o = Arc::clone(&order);
        let cp_for_handler = Arc::clone(&cp);
        registry.lists.write().service_added.push(Box::new(move |_, _, _| {
            // Re-entering the discovery state from a handler must not
            // deadlock: events are dispatched outside the lock.
            let _ = cp_for_handler.root_entries();
            o.lock().unwrap().push("service_added");
        }));

        let mut events = PendingEvents::default();
        let entry = RootEntry::new(
            "abc",
            crate::types::UpnpVersion::V1_1,
            "OS/1.0",
            "P/1.0",
            Utc::now(),
        );
        let device = DeviceEntry {
            uuid: "abc".to_string(),
            device_type: None,
            device_type_version: None,
            services: vec![],
        };
        events.service_added = Some((entry.clone(), device, "urn:x:service:Y:1".to_string()));
        events.root_device_added = Some(entry.clone());
        events.device_rebooted = Some((entry, false));
        registry.dispatch(events);

        assert_eq!(
            *order.lock().unwrap(),
            vec!["rebooted", "root_added", "service_added"]
        );
    }
}
