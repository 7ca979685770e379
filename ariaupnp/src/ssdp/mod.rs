//! # Module SSDP - Simple Service Discovery Protocol (control point)
//!
//! Ce module implémente le côté *client* du protocole SSDP : réception des
//! annonces NOTIFY/UPDATE en multicast, envoi de M-SEARCH et réception des
//! réponses en unicast, et maintien de la table des devices annoncés.
//!
//! ## Architecture
//!
//! - [`SsdpClientController`] : contrôleur principal (sockets, timer,
//!   événements)
//! - [`CpData`] : état partagé entre le contrôleur et la couche tracker
//! - [`RootEntry`] / [`DeviceEntry`] : table des devices vus sur le réseau
//! - [`message`] : codec des trames SSDP
//!
//! ## Constantes SSDP
//!
//! - **Multicast IPv4**: 239.255.255.250:1900
//! - **Multicast IPv6 (link local)**: [FF02::C]:1900

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

pub mod controller;
pub mod endpoint;
pub mod entry;
pub mod message;

pub use controller::{CpData, PendingEvents, Reject, SsdpClientController};
pub use endpoint::EndpointConfig;
pub use entry::{DeviceEntry, LinkData, RootEntry};

/// Adresse multicast SSDP IPv4.
pub const SSDP_MULTICAST_ADDR_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Adresse multicast SSDP IPv6 (scope link-local).
pub const SSDP_MULTICAST_ADDR_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);

/// Port SSDP.
pub const SSDP_PORT: u16 = 1900;

/// Default unicast search port when no SEARCHPORT.UPNP.ORG header is given.
pub const DEFAULT_SEARCH_PORT: u16 = 1900;

/// Registered dynamic range allowed for SEARCHPORT.UPNP.ORG.
pub const SEARCH_PORT_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;

/// Interval of the advertisement-expiration check.
pub const EXPIRATION_TIMER_INTERVAL: Duration = Duration::from_secs(1);

/// Receive buffer size for SSDP datagrams.
pub const UDP_RECEIVE_BUFFER_SIZE: usize = 8192;

/// Multicast group matching the address family of a local interface address.
pub fn multicast_address_for(address: &IpAddr) -> IpAddr {
    match address {
        IpAddr::V4(_) => IpAddr::V4(SSDP_MULTICAST_ADDR_V4),
        IpAddr::V6(_) => IpAddr::V6(SSDP_MULTICAST_ADDR_V6),
    }
}
