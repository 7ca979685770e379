//! Table entries for devices seen on the network.
//!
//! A [`RootEntry`] is the network-presence record of one root device: it
//! aggregates everything learned from SSDP alone, before any description
//! document has been fetched. One root entry owns a [`DeviceEntry`] per
//! announced device UUID (the root itself plus embedded devices) and one
//! [`LinkData`] per local interface the device was heard on, because the
//! same device may be reachable over several local addresses.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};

use crate::types::{HttpVersion, UpnpVersion};

/// Per-local-endpoint link data of a root device.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkData {
    /// Local interface address the advertisement was received on.
    pub local_address: IpAddr,
    /// URL of the device description document advertised for this link.
    pub description_location: String,
    /// HTTP version the device speaks on this link.
    pub http_version: HttpVersion,
    /// Unicast search port (SEARCHPORT.UPNP.ORG, default 1900).
    pub search_port: u16,
}

/// One announced device (root or embedded) inside a [`RootEntry`].
///
/// Created lazily the first time any message references its UUID; the type
/// and the service list fill in as further announcements arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntry {
    pub uuid: String,
    pub device_type: Option<String>,
    pub device_type_version: Option<u32>,
    /// Advertised `serviceType:version` URNs.
    pub services: Vec<String>,
}

impl DeviceEntry {
    fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            device_type: None,
            device_type_version: None,
            services: Vec::new(),
        }
    }

    /// `urn:<type>:<version>` of this device, once a device-type
    /// announcement has been seen.
    pub fn device_type_version_urn(&self) -> Option<String> {
        match (&self.device_type, self.device_type_version) {
            (Some(ty), Some(version)) => Some(format!("urn:{}:{}", ty, version)),
            _ => None,
        }
    }
}

/// One UPnP root device as seen on the network.
#[derive(Debug, Clone, PartialEq)]
pub struct RootEntry {
    /// UUID of the root device, stable identity key of this entry.
    pub root_device_uuid: String,
    /// UPnP version from the SERVER header of the last accepted message.
    pub upnp_version: UpnpVersion,
    /// OS token of the SERVER header.
    pub os_version: String,
    /// Product token of the SERVER header.
    pub product_version: String,
    /// The entry is dropped by the expiration timer once this passes.
    pub expiration_time: DateTime<Utc>,
    /// Last accepted BOOTID.UPNP.ORG value (0 for UPnP 1.0 devices).
    pub boot_id: u32,
    /// Devices under this root, keyed by device UUID. Contains at least the
    /// root UUID once any message for it has been processed.
    pub devices: HashMap<String, DeviceEntry>,
    config_ids: HashMap<SocketAddr, u32>,
    links: HashMap<IpAddr, LinkData>,
}

impl RootEntry {
    pub(crate) fn new(
        root_device_uuid: &str,
        upnp_version: UpnpVersion,
        os_version: &str,
        product_version: &str,
        expiration_time: DateTime<Utc>,
    ) -> Self {
        Self {
            root_device_uuid: root_device_uuid.to_string(),
            upnp_version,
            os_version: os_version.to_string(),
            product_version: product_version.to_string(),
            expiration_time,
            boot_id: 0,
            devices: HashMap::new(),
            config_ids: HashMap::new(),
            links: HashMap::new(),
        }
    }

    /// Registers or refreshes the link data for one local interface.
    pub(crate) fn add_or_update_link(
        &mut self,
        local_address: IpAddr,
        description_location: &str,
        http_version: HttpVersion,
        search_port: u16,
    ) {
        self.links.insert(
            local_address,
            LinkData {
                local_address,
                description_location: description_location.to_string(),
                http_version,
                search_port,
            },
        );
    }

    /// The link to use when fetching description documents. IPv4 links win
    /// over IPv6 ones, ties break on the lower local address so the choice
    /// is stable.
    pub fn preferred_link(&self) -> Option<&LinkData> {
        self.links
            .values()
            .min_by_key(|link| (link.local_address.is_ipv6(), link.local_address))
    }

    /// Last CONFIGID.UPNP.ORG seen from the given remote endpoint, 0 when
    /// none was seen yet.
    pub fn config_id(&self, remote: &SocketAddr) -> u32 {
        self.config_ids.get(remote).copied().unwrap_or(0)
    }

    pub(crate) fn set_config_id(&mut self, remote: SocketAddr, config_id: u32) {
        self.config_ids.insert(remote, config_id);
    }

    pub(crate) fn get_or_create_device_entry(&mut self, uuid: &str) -> &mut DeviceEntry {
        self.devices
            .entry(uuid.to_string())
            .or_insert_with(|| DeviceEntry::new(uuid))
    }

    /// True when the given UUID belongs to this root entry (root or any
    /// embedded device).
    pub fn contains_device(&self, uuid: &str) -> bool {
        self.devices.contains_key(uuid)
    }
}
