//! Materialized description store: [`RootDescriptor`] and
//! [`ServiceDescriptor`].
//!
//! A root descriptor is the fetched-content record of one root entry. It is
//! created when the SSDP layer reports a new root device, filled by the
//! fetch pipeline, and discarded (never resurrected) on removal, reboot
//! with configuration change, or tracker shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use xmltree::Element;

use crate::description::{DeviceDescription, ServiceInfo};

/// Fetch state of a root descriptor. Transitions only move forward, except
/// that `Erroneous` is terminal for the fetch attempt and `Invalid` is
/// terminal for the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootDescriptorState {
    AwaitingDeviceDescription,
    AwaitingServiceDescriptions,
    Ready,
    Erroneous,
    Invalid,
}

/// Fetch state of one service's SCPD document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceDescriptorState {
    AwaitingDescription,
    Ready,
    Erroneous,
    Invalid,
}

struct ServiceDescriptorInner {
    state: ServiceDescriptorState,
    scpd: Option<Element>,
}

/// One service of a tracked device: its identity URLs plus, once fetched,
/// the SCPD document.
pub struct ServiceDescriptor {
    /// Service type without `urn:` prefix and version suffix.
    pub service_type: String,
    pub service_type_version: u32,
    pub service_id: String,
    /// Control URL, as advertised (resolve against the description URL).
    pub control_url: String,
    /// Event subscription URL, as advertised.
    pub event_sub_url: String,
    inner: Mutex<ServiceDescriptorInner>,
}

impl ServiceDescriptor {
    pub(crate) fn new(info: &ServiceInfo) -> Self {
        Self {
            service_type: info.service_type.clone(),
            service_type_version: info.service_type_version,
            service_id: info.service_id.clone(),
            control_url: info.control_url.clone(),
            event_sub_url: info.event_sub_url.clone(),
            inner: Mutex::new(ServiceDescriptorInner {
                state: ServiceDescriptorState::AwaitingDescription,
                scpd: None,
            }),
        }
    }

    /// `urn:<type>:<version>`, the key this service is looked up by.
    pub fn service_type_version_urn(&self) -> String {
        format!("urn:{}:{}", self.service_type, self.service_type_version)
    }

    pub fn state(&self) -> ServiceDescriptorState {
        self.inner.lock().state
    }

    /// The SCPD document, once the descriptor is `Ready`.
    pub fn scpd(&self) -> Option<Element> {
        self.inner.lock().scpd.clone()
    }

    pub(crate) fn set_state(&self, state: ServiceDescriptorState) {
        self.inner.lock().state = state;
    }

    pub(crate) fn set_ready(&self, scpd: Element) {
        let mut inner = self.inner.lock();
        inner.scpd = Some(scpd);
        inner.state = ServiceDescriptorState::Ready;
    }
}

struct RootDescriptorInner {
    state: RootDescriptorState,
    device_description: Option<DeviceDescription>,
    description_tree: Option<Element>,
    /// device UUID → (service type+version URN → descriptor)
    services: HashMap<String, HashMap<String, Arc<ServiceDescriptor>>>,
}

/// Materialized view of one root device, filled by the fetch pipeline.
///
/// Consumers receive it through tracker events and must treat it as
/// read-only; a handle must not be retained across a device-removed event.
pub struct RootDescriptor {
    /// UUID of the root device this descriptor materializes.
    pub root_device_uuid: String,
    /// Description-document URL the fetch pipeline used; relative URLs in
    /// the documents resolve against it.
    pub description_location: String,
    inner: Mutex<RootDescriptorInner>,
}

impl RootDescriptor {
    pub(crate) fn new(root_device_uuid: &str, description_location: &str) -> Self {
        Self {
            root_device_uuid: root_device_uuid.to_string(),
            description_location: description_location.to_string(),
            inner: Mutex::new(RootDescriptorInner {
                state: RootDescriptorState::AwaitingDeviceDescription,
                device_description: None,
                description_tree: None,
                services: HashMap::new(),
            }),
        }
    }

    pub fn state(&self) -> RootDescriptorState {
        self.inner.lock().state
    }

    /// Typed device tree, present from `AwaitingServiceDescriptions` on.
    pub fn device_description(&self) -> Option<DeviceDescription> {
        self.inner.lock().device_description.clone()
    }

    /// Raw description document, for elements not modeled in
    /// [`DeviceDescription`].
    pub fn description_tree(&self) -> Option<Element> {
        self.inner.lock().description_tree.clone()
    }

    /// Service descriptors of one device of the tree.
    pub fn service_descriptors(&self, device_uuid: &str) -> Vec<Arc<ServiceDescriptor>> {
        self.inner
            .lock()
            .services
            .get(device_uuid)
            .map(|services| services.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Looks up one service by device UUID and `urn:<type>:<version>`.
    pub fn service(
        &self,
        device_uuid: &str,
        service_type_version_urn: &str,
    ) -> Option<Arc<ServiceDescriptor>> {
        self.inner
            .lock()
            .services
            .get(device_uuid)?
            .get(service_type_version_urn)
            .cloned()
    }

    /// Stores the fetched device description and moves to
    /// `AwaitingServiceDescriptions`. Returns false when the descriptor was
    /// invalidated (or errored) while the GET was in flight; the caller
    /// must then discard the result.
    pub(crate) fn apply_device_description(
        &self,
        description: DeviceDescription,
        tree: Element,
        services: HashMap<String, HashMap<String, Arc<ServiceDescriptor>>>,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RootDescriptorState::AwaitingDeviceDescription {
            return false;
        }
        inner.device_description = Some(description);
        inner.description_tree = Some(tree);
        inner.services = services;
        inner.state = RootDescriptorState::AwaitingServiceDescriptions;
        true
    }

    /// Transition `from → to` if the descriptor is still in `from`.
    pub(crate) fn set_state_if(&self, from: RootDescriptorState, to: RootDescriptorState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != from {
            return false;
        }
        inner.state = to;
        true
    }

    /// Marks a failed fetch attempt. Only the awaiting states can become
    /// `Erroneous`; an already invalidated descriptor stays `Invalid`.
    pub(crate) fn mark_erroneous(&self) {
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            RootDescriptorState::AwaitingDeviceDescription
                | RootDescriptorState::AwaitingServiceDescriptions
        ) {
            inner.state = RootDescriptorState::Erroneous;
        }
    }

    /// Terminal invalidation: the descriptor and every owned service
    /// descriptor become `Invalid`.
    pub(crate) fn invalidate(&self) {
        let mut inner = self.inner.lock();
        inner.state = RootDescriptorState::Invalid;
        for services in inner.services.values() {
            for service in services.values() {
                service.set_state(ServiceDescriptorState::Invalid);
            }
        }
    }
}
