//! Erreurs de la couche SSDP.

use thiserror::Error;

/// Errors raised while decoding SSDP wire data.
///
/// Third-party protocol messages are never trusted to be well-formed: every
/// variant here means "drop the message", the kind only decides the log
/// level at the call site.
#[derive(Error, Debug)]
pub enum SsdpParseError {
    #[error("empty datagram")]
    Empty,

    #[error("invalid start line: '{0}'")]
    InvalidStartLine(String),

    #[error("unsupported HTTP version: '{0}'")]
    UnsupportedHttpVersion(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid {0} header: '{1}'")]
    InvalidHeader(&'static str, String),

    #[error("USN '{0}' does not carry a uuid:<device-uuid>::<suffix> identity")]
    InvalidUsn(String),

    #[error("'{0}' is not a <type>:<version> URN")]
    InvalidTypeVersionUrn(String),

    #[error("no UPnP/<major>.<minor> token in SERVER header '{0}'")]
    NoUpnpVersionToken(String),
}

/// Lifecycle errors of the SSDP client controller.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("SSDP client controller is already active")]
    AlreadyActive,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
