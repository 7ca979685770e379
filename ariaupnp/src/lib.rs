//! # AriaUPnP - couche protocole SSDP pour control points
//!
//! Ce crate implémente la partie réseau de la découverte UPnP côté control
//! point : écoute des annonces SSDP (NOTIFY alive/byebye, UPDATE), envoi de
//! M-SEARCH et réception des réponses, et maintien de la table des root
//! devices connus avec leur expiration.
//!
//! ## Fonctionnalités
//!
//! - ✅ Réception multicast des NOTIFY sur chaque interface locale
//! - ✅ M-SEARCH multicast et unicast avec réception des réponses
//! - ✅ Détection des reboots et des changements de configuration
//!   (BOOTID.UPNP.ORG / CONFIGID.UPNP.ORG)
//! - ✅ Expiration automatique des annonces (timer 1 s)
//!
//! ## Architecture
//!
//! - [`ssdp::SsdpClientController`] : contrôleur SSDP principal
//! - [`ssdp::CpData`] : table partagée des [`ssdp::RootEntry`]
//! - [`ssdp::message`] : codec des trames SSDP
//!
//! La couche supérieure (récupération des documents de description) vit dans
//! le crate `ariacontrol`.

pub mod config;
pub mod errors;
pub mod ssdp;
pub mod types;

pub use config::DiscoveryConfig;
pub use errors::{DiscoveryError, SsdpParseError};
