//! Parsing of UPnP device description documents.
//!
//! A description document is one `<root>` element with a `<device>` tree:
//! every device carries its UDN, type and `<serviceList>`, and may embed
//! further devices in a `<deviceList>`. The whole tree is walked here once
//! and kept both as typed [`DeviceDescription`] data and as the raw
//! [`xmltree::Element`] for callers that need the full document.

use url::Url;
use xmltree::Element;

use ariaupnp::types::{parse_type_version_urn, uuid_from_udn};

use crate::errors::DescriptionError;

/// One `<service>` entry of a device description.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service type without the `urn:` prefix and version suffix
    /// (ex: "schemas-upnp-org:service:AVTransport").
    pub service_type: String,
    pub service_type_version: u32,
    pub service_id: String,
    /// SCPD document URL, possibly relative to the description URL.
    pub scpd_url: String,
    pub control_url: String,
    pub event_sub_url: String,
}

impl ServiceInfo {
    /// `urn:<type>:<version>` form, the key services are looked up by.
    pub fn service_type_version_urn(&self) -> String {
        format!("urn:{}:{}", self.service_type, self.service_type_version)
    }

    fn from_element(element: &Element) -> Result<Self, DescriptionError> {
        let service_type_urn =
            child_text(element, "serviceType").ok_or(DescriptionError::MissingField("serviceType"))?;
        let (service_type, service_type_version) = parse_type_version_urn(&service_type_urn)
            .map_err(|_| DescriptionError::BadServiceType(service_type_urn.clone()))?;
        Ok(Self {
            service_type: service_type.to_string(),
            service_type_version,
            service_id: child_text(element, "serviceId").unwrap_or_default(),
            scpd_url: child_text(element, "SCPDURL")
                .ok_or(DescriptionError::MissingField("SCPDURL"))?,
            control_url: child_text(element, "controlURL").unwrap_or_default(),
            event_sub_url: child_text(element, "eventSubURL").unwrap_or_default(),
        })
    }
}

/// Typed view of one `<device>` element, embedded devices included.
#[derive(Debug, Clone)]
pub struct DeviceDescription {
    /// Device UUID (UDN without its `uuid:` prefix).
    pub uuid: String,
    pub udn: String,
    pub device_type: String,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub services: Vec<ServiceInfo>,
    pub devices: Vec<DeviceDescription>,
}

impl DeviceDescription {
    /// Parses a full description document. Returns the typed device tree
    /// and the raw document for callers that need elements not modeled
    /// here.
    pub fn parse(body: &[u8]) -> Result<(Self, Element), DescriptionError> {
        let root = Element::parse(body)?;
        let device = root
            .get_child("device")
            .ok_or(DescriptionError::MissingField("device"))?;
        let description = Self::from_element(device)?;
        Ok((description, root))
    }

    fn from_element(element: &Element) -> Result<Self, DescriptionError> {
        let udn = child_text(element, "UDN").ok_or(DescriptionError::MissingField("UDN"))?;
        let device_type =
            child_text(element, "deviceType").ok_or(DescriptionError::MissingField("deviceType"))?;

        let mut services = Vec::new();
        if let Some(list) = element.get_child("serviceList") {
            for child in element_children(list) {
                if child.name == "service" {
                    services.push(ServiceInfo::from_element(child)?);
                }
            }
        }

        let mut devices = Vec::new();
        if let Some(list) = element.get_child("deviceList") {
            for child in element_children(list) {
                if child.name == "device" {
                    devices.push(Self::from_element(child)?);
                }
            }
        }

        Ok(Self {
            uuid: uuid_from_udn(&udn).to_string(),
            udn: udn.clone(),
            device_type,
            friendly_name: child_text(element, "friendlyName"),
            manufacturer: child_text(element, "manufacturer"),
            model_name: child_text(element, "modelName"),
            services,
            devices,
        })
    }

    /// The device and all embedded devices, depth-first, the root first.
    pub fn all_devices(&self) -> Vec<&DeviceDescription> {
        let mut result = vec![self];
        for device in &self.devices {
            result.extend(device.all_devices());
        }
        result
    }
}

/// Resolves a possibly-relative document URL against the description URL.
pub fn resolve_url(base: &Url, reference: &str) -> Result<Url, DescriptionError> {
    base.join(reference)
        .map_err(|_| DescriptionError::InvalidUrl(reference.to_string()))
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element
        .get_child(name)
        .and_then(|child| child.get_text())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn element_children(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| node.as_element())
}
