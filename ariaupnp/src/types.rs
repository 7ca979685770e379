//! Wire-level token types shared by the SSDP codec and the controller:
//! UPnP and HTTP version tokens, USN identities and `<type>:<version>` URNs.

use std::fmt;

use crate::errors::SsdpParseError;

/// UPnP version announced in a SERVER or USER-AGENT header token
/// (`UPnP/<major>.<minor>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpnpVersion {
    pub major: u32,
    pub minor: u32,
}

impl UpnpVersion {
    /// Prefix of the version token inside a SERVER header.
    pub const TOKEN_PREFIX: &'static str = "UPnP/";

    pub const V1_0: UpnpVersion = UpnpVersion { major: 1, minor: 0 };
    pub const V1_1: UpnpVersion = UpnpVersion { major: 1, minor: 1 };

    /// Parses a `UPnP/<major>.<minor>` token.
    pub fn parse(token: &str) -> Result<Self, SsdpParseError> {
        let bad = || SsdpParseError::InvalidHeader("SERVER", token.to_string());
        let rest = token.strip_prefix(Self::TOKEN_PREFIX).ok_or_else(bad)?;
        let (major, minor) = rest.split_once('.').ok_or_else(bad)?;
        Ok(Self {
            major: major.parse().map_err(|_| bad())?,
            minor: minor.parse().map_err(|_| bad())?,
        })
    }
}

impl fmt::Display for UpnpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPnP/{}.{}", self.major, self.minor)
    }
}

/// HTTP version of an SSDP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    V1_0,
    V1_1,
}

impl HttpVersion {
    pub fn parse(token: &str) -> Result<Self, SsdpParseError> {
        match token {
            "HTTP/1.0" => Ok(HttpVersion::V1_0),
            "HTTP/1.1" => Ok(HttpVersion::V1_1),
            other => Err(SsdpParseError::UnsupportedHttpVersion(other.to_string())),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpVersion::V1_0 => write!(f, "HTTP/1.0"),
            HttpVersion::V1_1 => write!(f, "HTTP/1.1"),
        }
    }
}

/// Splits a USN of the form `uuid:<device-uuid>::<suffix>` into the device
/// UUID and the message-type suffix.
///
/// A USN without the `::` separator is a bare device-UUID announcement which
/// carries no usable information for the discovery table, so it is rejected
/// here and discarded by the caller.
pub fn parse_usn(usn: &str) -> Result<(&str, &str), SsdpParseError> {
    let bad = || SsdpParseError::InvalidUsn(usn.to_string());
    let rest = usn.strip_prefix("uuid:").ok_or_else(bad)?;
    let (uuid, suffix) = rest.split_once("::").ok_or_else(bad)?;
    if uuid.is_empty() {
        return Err(bad());
    }
    Ok((uuid, suffix))
}

/// Extracts the device UUID from a UDN (`uuid:<device-uuid>`).
pub fn uuid_from_udn(udn: &str) -> &str {
    udn.strip_prefix("uuid:").unwrap_or(udn)
}

/// Parses a `urn:<domain>:<kind>:<type>:<version>` URN into the type part
/// (without the `urn:` prefix) and the numeric version.
///
/// `urn:schemas-upnp-org:device:MediaRenderer:1` yields
/// `("schemas-upnp-org:device:MediaRenderer", 1)`.
pub fn parse_type_version_urn(urn: &str) -> Result<(&str, u32), SsdpParseError> {
    let bad = || SsdpParseError::InvalidTypeVersionUrn(urn.to_string());
    let rest = urn.strip_prefix("urn:").ok_or_else(bad)?;
    let (type_part, version) = rest.rsplit_once(':').ok_or_else(bad)?;
    if type_part.is_empty() {
        return Err(bad());
    }
    Ok((type_part, version.parse().map_err(|_| bad())?))
}

/// Splits a SERVER header into `(os_version, upnp_version, product_version)`.
///
/// The header must contain at least three whitespace-separated tokens and
/// one of them must be a `UPnP/<major>.<minor>` token, per the UPnP
/// architecture; anything else makes the whole message unusable.
pub fn parse_server_header(
    server: &str,
) -> Result<(&str, UpnpVersion, &str), SsdpParseError> {
    let tokens: Vec<&str> = server.split(' ').filter(|t| !t.is_empty()).collect();
    let version_token = tokens
        .iter()
        .find(|t| t.starts_with(UpnpVersion::TOKEN_PREFIX))
        .ok_or_else(|| SsdpParseError::NoUpnpVersionToken(server.to_string()))?;
    let upnp_version = UpnpVersion::parse(version_token)?;
    if tokens.len() < 3 {
        return Err(SsdpParseError::InvalidHeader("SERVER", server.to_string()));
    }
    Ok((tokens[0], upnp_version, tokens[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upnp_version() {
        assert_eq!(UpnpVersion::parse("UPnP/1.1").unwrap(), UpnpVersion::V1_1);
        assert_eq!(UpnpVersion::parse("UPnP/1.0").unwrap(), UpnpVersion::V1_0);
        assert!(UpnpVersion::parse("UPnP/2").is_err());
        assert!(UpnpVersion::parse("DLNADOC/1.50").is_err());
    }

    #[test]
    fn test_parse_usn_splits_uuid_and_suffix() {
        let (uuid, suffix) = parse_usn("uuid:abc-123::upnp:rootdevice").unwrap();
        assert_eq!(uuid, "abc-123");
        assert_eq!(suffix, "upnp:rootdevice");

        let (uuid, suffix) =
            parse_usn("uuid:abc::urn:schemas-upnp-org:service:AVTransport:1").unwrap();
        assert_eq!(uuid, "abc");
        assert_eq!(suffix, "urn:schemas-upnp-org:service:AVTransport:1");
    }

    #[test]
    fn test_parse_usn_rejects_bare_uuid_announcement() {
        // "uuid:device-UUID" without "::" carries nothing we can use.
        assert!(parse_usn("uuid:abc-123").is_err());
        assert!(parse_usn("abc::upnp:rootdevice").is_err());
        assert!(parse_usn("uuid:::upnp:rootdevice").is_err());
    }

    #[test]
    fn test_parse_type_version_urn() {
        let (ty, version) =
            parse_type_version_urn("urn:schemas-upnp-org:device:MediaRenderer:1").unwrap();
        assert_eq!(ty, "schemas-upnp-org:device:MediaRenderer");
        assert_eq!(version, 1);

        assert!(parse_type_version_urn("urn:foo:device:Bar:x").is_err());
        assert!(parse_type_version_urn("schemas-upnp-org:device:Bar:1").is_err());
    }

    #[test]
    fn test_parse_server_header() {
        let (os, version, product) =
            parse_server_header("Linux/5.0 UPnP/1.1 AriaControl/0.1.0").unwrap();
        assert_eq!(os, "Linux/5.0");
        assert_eq!(version, UpnpVersion::V1_1);
        assert_eq!(product, "AriaControl/0.1.0");

        // No UPnP token at all
        assert!(parse_server_header("Linux/5.0 DLNADOC/1.50 Foo/1.0").is_err());
        // Too few tokens
        assert!(parse_server_header("UPnP/1.0").is_err());
    }
}
