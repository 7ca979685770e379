//! UPnP network tracker.
//!
//! Subscribes to the SSDP controller's discovery events and materializes,
//! for every root device, the full set of description documents: first the
//! device description, then every service's SCPD, fetched sequentially.
//! Only when everything is in does the tracker announce the device to its
//! consumers. SSDP-level reboot/configuration-change events are hidden
//! from consumers and mapped onto remove/re-add cycles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use xmltree::Element;

use ariaupnp::config::DiscoveryConfig;
use ariaupnp::ssdp::{CpData, RootEntry, SsdpClientController};

use crate::description::{DeviceDescription, resolve_url};
use crate::errors::TrackerError;
use crate::events::{TrackerEvent, TrackerEventBus};
use crate::fetch::{DescriptionFetcher, HttpDescriptionFetcher};
use crate::store::{RootDescriptor, RootDescriptorState, ServiceDescriptor};

/// Tracks the UPnP devices available on the network and exposes their
/// materialized descriptions.
///
/// The tracker owns its [`SsdpClientController`]; [`start`](Self::start)
/// brings up the whole discovery stack and [`close`](Self::close) tears it
/// down, aborting in-flight description fetches without notifying
/// consumers.
pub struct UpnpNetworkTracker {
    cp: Arc<CpData>,
    controller: Arc<SsdpClientController>,
    /// Descriptor side-table, keyed by root device UUID.
    descriptors: Mutex<HashMap<String, Arc<RootDescriptor>>>,
    fetcher: Arc<dyn DescriptionFetcher>,
    bus: TrackerEventBus,
    active: Mutex<bool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl UpnpNetworkTracker {
    /// Creates a tracker with the reqwest-based fetcher.
    pub fn new(config: DiscoveryConfig) -> Result<Arc<Self>, TrackerError> {
        let fetcher = Arc::new(HttpDescriptionFetcher::new(
            Duration::from_secs(config.description_timeout_secs),
            &config.machine_info_header(),
        )?);
        Ok(Self::with_fetcher(config, fetcher))
    }

    /// Creates a tracker with a custom description fetcher.
    pub fn with_fetcher(
        config: DiscoveryConfig,
        fetcher: Arc<dyn DescriptionFetcher>,
    ) -> Arc<Self> {
        let cp = Arc::new(CpData::new());
        let controller = Arc::new(SsdpClientController::new(Arc::clone(&cp), config));
        let tracker = Arc::new(Self {
            cp,
            controller,
            descriptors: Mutex::new(HashMap::new()),
            fetcher,
            bus: TrackerEventBus::new(),
            active: Mutex::new(false),
            cancel: Mutex::new(None),
        });
        tracker.register_ssdp_observers();
        tracker
    }

    /// Subscribes to the tracker's consumer events.
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<TrackerEvent> {
        self.bus.subscribe()
    }

    /// The underlying SSDP controller, for explicit searches.
    pub fn controller(&self) -> Arc<SsdpClientController> {
        Arc::clone(&self.controller)
    }

    /// Shared discovery state (root entry snapshots).
    pub fn cp_data(&self) -> Arc<CpData> {
        Arc::clone(&self.cp)
    }

    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }

    /// Starts the discovery stack: SSDP sockets, expiration timer and an
    /// initial `ssdp:all` search.
    pub async fn start(&self) -> Result<(), TrackerError> {
        {
            let mut active = self.active.lock();
            if *active {
                return Err(TrackerError::AlreadyActive);
            }
            *active = true;
        }
        *self.cancel.lock() = Some(CancellationToken::new());
        self.controller.start().await?;
        info!("✅ UPnP network tracker started");
        Ok(())
    }

    /// Stops tracking: aborts every in-flight description fetch, drops all
    /// descriptors and closes the SSDP controller. Fast teardown, no
    /// removal events are raised.
    pub fn close(&self) {
        {
            let mut active = self.active.lock();
            if !*active {
                return;
            }
            *active = false;
        }
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        let descriptors: Vec<Arc<RootDescriptor>> = {
            let mut table = self.descriptors.lock();
            table.drain().map(|(_, descriptor)| descriptor).collect()
        };
        for descriptor in &descriptors {
            descriptor.invalidate();
        }
        self.controller.close();
        info!("👋 UPnP network tracker closed");
    }

    /// All tracked root descriptors, keyed by root device UUID.
    pub fn known_root_devices(&self) -> HashMap<String, Arc<RootDescriptor>> {
        self.descriptors.lock().clone()
    }

    /// The root descriptors whose description documents are all fetched.
    pub fn ready_root_devices(&self) -> Vec<Arc<RootDescriptor>> {
        self.descriptors
            .lock()
            .values()
            .filter(|descriptor| descriptor.state() == RootDescriptorState::Ready)
            .cloned()
            .collect()
    }

    fn register_ssdp_observers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.controller.on_root_device_added(move |entry| {
            if let Some(tracker) = weak.upgrade() {
                tracker.handle_root_device_added(entry);
            }
        });
        let weak = Arc::downgrade(self);
        self.controller.on_root_device_removed(move |entry| {
            if let Some(tracker) = weak.upgrade() {
                tracker.handle_root_device_removed(entry);
            }
        });
        let weak = Arc::downgrade(self);
        self.controller
            .on_device_rebooted(move |entry, configuration_changed| {
                if let Some(tracker) = weak.upgrade() {
                    tracker.handle_device_rebooted(entry, configuration_changed);
                }
            });
        let weak = Arc::downgrade(self);
        self.controller.on_device_configuration_changed(move |entry| {
            if let Some(tracker) = weak.upgrade() {
                tracker.handle_configuration_changed(entry);
            }
        });
    }

    fn handle_root_device_added(&self, entry: &RootEntry) {
        if !self.is_active() {
            return;
        }
        self.initialize_root_descriptor(entry);
    }

    /// Creates a fresh descriptor for the root entry and launches its
    /// description fetch chain.
    fn initialize_root_descriptor(&self, entry: &RootEntry) {
        let Some(link) = entry.preferred_link() else {
            debug!(
                "No usable link for root device {}, cannot fetch its description",
                entry.root_device_uuid
            );
            return;
        };
        let descriptor = Arc::new(RootDescriptor::new(
            &entry.root_device_uuid,
            &link.description_location,
        ));
        self.descriptors
            .lock()
            .insert(entry.root_device_uuid.clone(), Arc::clone(&descriptor));

        let Some(cancel) = self.cancel.lock().clone() else {
            return;
        };
        tokio::spawn(run_description_fetch(
            descriptor,
            Arc::clone(&self.fetcher),
            self.bus.clone(),
            cancel,
        ));
    }

    fn handle_root_device_removed(&self, entry: &RootEntry) {
        if !self.is_active() {
            return;
        }
        let Some(descriptor) = self.descriptors.lock().remove(&entry.root_device_uuid) else {
            return;
        };
        descriptor.invalidate();
        self.bus.broadcast(TrackerEvent::DeviceRemoved(descriptor));
    }

    fn handle_device_rebooted(&self, entry: &RootEntry, configuration_changed: bool) {
        if !self.is_active() {
            return;
        }
        let Some(descriptor) = self.descriptors.lock().get(&entry.root_device_uuid).cloned()
        else {
            return;
        };
        if configuration_changed {
            self.reinitialize_descriptor(entry, descriptor);
        } else {
            // Subscriptions at the device are gone; the eventing layer must
            // re-establish them against the unchanged descriptions.
            self.bus.broadcast(TrackerEvent::DeviceRebooted(descriptor));
        }
    }

    fn handle_configuration_changed(&self, entry: &RootEntry) {
        if !self.is_active() {
            return;
        }
        let Some(descriptor) = self.descriptors.lock().get(&entry.root_device_uuid).cloned()
        else {
            return;
        };
        self.reinitialize_descriptor(entry, descriptor);
    }

    /// Configuration changes cannot be patched incrementally — description
    /// URLs, control URLs and SCPD contents may all have moved. Handled as
    /// remove-then-re-add.
    fn reinitialize_descriptor(&self, entry: &RootEntry, old: Arc<RootDescriptor>) {
        old.invalidate();
        self.bus.broadcast(TrackerEvent::DeviceRemoved(old));
        self.initialize_root_descriptor(entry);
    }
}

/// Fetch chain of one root descriptor: device description first, then each
/// SCPD sequentially. The descriptor state is re-checked before every
/// applied result so an invalidation while a GET is in flight discards the
/// response.
async fn run_description_fetch(
    descriptor: Arc<RootDescriptor>,
    fetcher: Arc<dyn DescriptionFetcher>,
    bus: TrackerEventBus,
    cancel: CancellationToken,
) {
    let uuid = descriptor.root_device_uuid.clone();
    let base = match Url::parse(&descriptor.description_location) {
        Ok(url) => url,
        Err(_) => {
            debug!(
                "Invalid description URL '{}' for {}",
                descriptor.description_location, uuid
            );
            descriptor.mark_erroneous();
            return;
        }
    };

    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = fetcher.fetch(&base) => result,
    };
    let body = match result {
        Ok(body) => body,
        Err(e) => {
            debug!("Failed to fetch device description for {}: {}", uuid, e);
            descriptor.mark_erroneous();
            return;
        }
    };
    let (description, tree) = match DeviceDescription::parse(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Failed to parse device description for {}: {}", uuid, e);
            descriptor.mark_erroneous();
            return;
        }
    };

    // Walk the device tree depth-first and collect every service: the
    // descriptor map for lookups, the pending list for the fetches.
    let mut services: HashMap<String, HashMap<String, Arc<ServiceDescriptor>>> = HashMap::new();
    let mut pending: Vec<(Arc<ServiceDescriptor>, String)> = Vec::new();
    for device in description.all_devices() {
        if device.services.is_empty() {
            continue;
        }
        let by_urn = services.entry(device.uuid.clone()).or_default();
        for info in &device.services {
            let service = Arc::new(ServiceDescriptor::new(info));
            by_urn.insert(service.service_type_version_urn(), Arc::clone(&service));
            pending.push((service, info.scpd_url.clone()));
        }
    }

    if !descriptor.apply_device_description(description, tree, services) {
        // Invalidated while the GET was in flight
        return;
    }

    for (service, scpd_url) in pending {
        if descriptor.state() != RootDescriptorState::AwaitingServiceDescriptions {
            return;
        }
        let url = match resolve_url(&base, &scpd_url) {
            Ok(url) => url,
            Err(e) => {
                debug!("Bad SCPD URL '{}' for {}: {}", scpd_url, uuid, e);
                service.set_state(crate::store::ServiceDescriptorState::Erroneous);
                descriptor.mark_erroneous();
                return;
            }
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = fetcher.fetch(&url) => result,
        };
        let body = match result {
            Ok(body) => body,
            Err(e) => {
                debug!("Failed to fetch SCPD {} for {}: {}", url, uuid, e);
                service.set_state(crate::store::ServiceDescriptorState::Erroneous);
                descriptor.mark_erroneous();
                return;
            }
        };
        if descriptor.state() != RootDescriptorState::AwaitingServiceDescriptions {
            return;
        }
        match Element::parse(&body[..]) {
            Ok(scpd) => service.set_ready(scpd),
            Err(e) => {
                debug!("Failed to parse SCPD {} for {}: {}", url, uuid, e);
                service.set_state(crate::store::ServiceDescriptorState::Erroneous);
                descriptor.mark_erroneous();
                return;
            }
        }
    }

    if descriptor.set_state_if(
        RootDescriptorState::AwaitingServiceDescriptions,
        RootDescriptorState::Ready,
    ) {
        info!("✅ UPnP device {} ready", uuid);
        bus.broadcast(TrackerEvent::DeviceAdded(descriptor));
    }
}
