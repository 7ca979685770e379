//! # AriaControl - suivi des devices UPnP du réseau
//!
//! Ce crate est la couche control point au-dessus de `ariaupnp` : il écoute
//! les événements SSDP du contrôleur, récupère en HTTP les documents de
//! description (device description puis SCPD de chaque service) et expose
//! l'arbre matérialisé [`RootDescriptor`] / [`ServiceDescriptor`] aux
//! consommateurs.
//!
//! ## Cycle de vie d'un descripteur
//!
//! ```text
//! AwaitingDeviceDescription → AwaitingServiceDescriptions → Ready
//!         │                            │
//!         └────────── Erroneous ───────┘        Invalid (removal/close)
//! ```
//!
//! Un device n'est annoncé aux consommateurs (événement
//! [`TrackerEvent::DeviceAdded`]) qu'une fois *tous* ses documents de
//! description récupérés.

pub mod description;
pub mod errors;
pub mod events;
pub mod fetch;
pub mod store;
pub mod tracker;

pub use description::{DeviceDescription, ServiceInfo};
pub use errors::{DescriptionError, TrackerError};
pub use events::{TrackerEvent, TrackerEventBus};
pub use fetch::{DescriptionFetcher, HttpDescriptionFetcher};
pub use store::{RootDescriptor, RootDescriptorState, ServiceDescriptor, ServiceDescriptorState};
pub use tracker::UpnpNetworkTracker;
