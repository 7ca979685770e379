//! Erreurs de la couche tracker.

use thiserror::Error;

/// Errors of the description fetch/parse pipeline.
///
/// None of these is fatal: a failed fetch leaves the affected descriptor
/// `Erroneous` until the next re-advertisement cycle retries it.
#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("XML parsing error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("missing required device element: {0}")]
    MissingField(&'static str),

    #[error("'{0}' is not a valid serviceType URN")]
    BadServiceType(String),
}

/// Lifecycle errors of the network tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("UPnP network tracker is already active")]
    AlreadyActive,

    #[error(transparent)]
    Discovery(#[from] ariaupnp::DiscoveryError),

    #[error(transparent)]
    Description(#[from] DescriptionError),
}
