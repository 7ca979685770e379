//! Codec des trames SSDP.
//!
//! SSDP reuses the HTTP/1.1 start-line + header framing over UDP. Two wire
//! forms exist: request-like frames (`NOTIFY * HTTP/1.1`,
//! `M-SEARCH * HTTP/1.1`, `UPDATE * HTTP/1.1`) received on the multicast
//! socket, and response-like frames (`HTTP/1.1 200 OK`) received on the
//! unicast socket as M-SEARCH answers.

use crate::errors::SsdpParseError;
use crate::types::HttpVersion;

/// Ordered SSDP header list.
///
/// Order is preserved so that encoded requests are byte-stable; lookups are
/// case-insensitive as header names on the wire come in any casing.
#[derive(Debug, Clone, Default)]
pub struct SsdpHeaders {
    entries: Vec<(String, String)>,
}

impl SsdpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets a header, replacing an existing one of the same name in place.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parses the header lines following a start line. Individual malformed
    /// lines are skipped; the frame itself stays usable.
    fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Self {
        let mut headers = SsdpHeaders::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            // Empty line marks end of headers
            if line.is_empty() {
                break;
            }
            // Split on first ':' only (values may contain ':')
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            headers.entries.push((name.to_string(), value.trim().to_string()));
        }
        headers
    }
}

/// Request-like SSDP frame (NOTIFY, M-SEARCH, UPDATE).
#[derive(Debug, Clone)]
pub struct SsdpRequest {
    pub method: String,
    /// Request target, `*` for all SSDP messages.
    pub param: String,
    pub http_version: HttpVersion,
    pub headers: SsdpHeaders,
}

impl SsdpRequest {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            param: "*".to_string(),
            http_version: HttpVersion::V1_1,
            headers: SsdpHeaders::new(),
        }
    }

    /// Decodes a request frame from a received datagram.
    pub fn parse(data: &[u8]) -> Result<Self, SsdpParseError> {
        let text = String::from_utf8_lossy(data);
        let mut lines = text.split('\n');
        let start = lines
            .next()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .ok_or(SsdpParseError::Empty)?;
        let mut parts = start.split(' ').filter(|p| !p.is_empty());
        let (method, param, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(m), Some(p), Some(v), None) => (m, p, v),
            _ => return Err(SsdpParseError::InvalidStartLine(start.to_string())),
        };
        Ok(Self {
            method: method.to_string(),
            param: param.to_string(),
            http_version: HttpVersion::parse(version)?,
            headers: SsdpHeaders::parse_lines(lines),
        })
    }

    /// Encodes the frame with exact `METHOD * HTTP/1.1\r\n…` framing.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.param, self.http_version);
        for (name, value) in self.headers.iter() {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

/// Response-like SSDP frame (M-SEARCH answer).
#[derive(Debug, Clone)]
pub struct SsdpResponse {
    pub http_version: HttpVersion,
    pub status: u16,
    pub headers: SsdpHeaders,
}

impl SsdpResponse {
    /// Decodes a response frame from a received datagram.
    pub fn parse(data: &[u8]) -> Result<Self, SsdpParseError> {
        let text = String::from_utf8_lossy(data);
        let mut lines = text.split('\n');
        let start = lines
            .next()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .ok_or(SsdpParseError::Empty)?;
        let mut parts = start.splitn(3, ' ');
        let (version, status) = match (parts.next(), parts.next()) {
            (Some(v), Some(s)) => (v, s),
            _ => return Err(SsdpParseError::InvalidStartLine(start.to_string())),
        };
        let status = status
            .parse::<u16>()
            .map_err(|_| SsdpParseError::InvalidStartLine(start.to_string()))?;
        Ok(Self {
            http_version: HttpVersion::parse(version)?,
            status,
            headers: SsdpHeaders::parse_lines(lines),
        })
    }
}

/// Parses the `max-age=<seconds>` directive out of a CACHE-CONTROL header.
pub fn parse_max_age(cache_control: &str) -> Option<u32> {
    for directive in cache_control.split(',') {
        let Some((name, value)) = directive.split_once('=') else {
            continue;
        };
        if name.trim() != "max-age" {
            continue;
        }
        if let Ok(age) = value.trim().parse::<u32>() {
            return Some(age);
        }
    }
    None
}

/// Convenience view over the headers every NOTIFY-shaped message shares,
/// whether it arrived as a NOTIFY request or as a search response.
#[derive(Debug, Clone)]
pub struct NotifyInfo<'a> {
    pub http_version: HttpVersion,
    /// DATE header of a search response; NOTIFY requests have none and use
    /// the receipt time instead.
    pub date: Option<&'a str>,
    pub cache_control: Option<&'a str>,
    pub location: Option<&'a str>,
    pub server: Option<&'a str>,
    /// `ssdp:alive` or `ssdp:byebye`.
    pub nts: &'a str,
    pub usn: &'a str,
    pub boot_id: Option<&'a str>,
    pub config_id: Option<&'a str>,
    pub search_port: Option<&'a str>,
}

impl<'a> NotifyInfo<'a> {
    /// Extracts the NOTIFY view from a multicast request frame.
    pub fn from_request(request: &'a SsdpRequest) -> Result<Self, SsdpParseError> {
        if request.param != "*" {
            return Err(SsdpParseError::InvalidStartLine(format!(
                "{} {}",
                request.method, request.param
            )));
        }
        let headers = &request.headers;
        Ok(Self {
            http_version: request.http_version,
            date: None,
            cache_control: headers.get("CACHE-CONTROL"),
            location: headers.get("LOCATION"),
            server: headers.get("SERVER"),
            nts: headers.get("NTS").ok_or(SsdpParseError::MissingHeader("NTS"))?,
            usn: headers.get("USN").ok_or(SsdpParseError::MissingHeader("USN"))?,
            boot_id: headers.get("BOOTID.UPNP.ORG"),
            config_id: headers.get("CONFIGID.UPNP.ORG"),
            search_port: headers.get("SEARCHPORT.UPNP.ORG"),
        })
    }

    /// Extracts the NOTIFY view from a search-response frame. Search
    /// responses are implicit `ssdp:alive` announcements.
    pub fn from_response(response: &'a SsdpResponse) -> Result<Self, SsdpParseError> {
        let headers = &response.headers;
        Ok(Self {
            http_version: response.http_version,
            date: headers.get("DATE"),
            cache_control: headers.get("CACHE-CONTROL"),
            location: headers.get("LOCATION"),
            server: headers.get("SERVER"),
            nts: "ssdp:alive",
            usn: headers.get("USN").ok_or(SsdpParseError::MissingHeader("USN"))?,
            boot_id: headers.get("BOOTID.UPNP.ORG"),
            config_id: headers.get("CONFIGID.UPNP.ORG"),
            search_port: headers.get("SEARCHPORT.UPNP.ORG"),
        })
    }
}

/// Headers of an `UPDATE * HTTP/1.1` reboot announcement.
#[derive(Debug, Clone)]
pub struct UpdateInfo<'a> {
    pub usn: &'a str,
    pub boot_id: &'a str,
    pub next_boot_id: &'a str,
}

impl<'a> UpdateInfo<'a> {
    pub fn from_request(request: &'a SsdpRequest) -> Result<Self, SsdpParseError> {
        if request.param != "*" {
            return Err(SsdpParseError::InvalidStartLine(format!(
                "{} {}",
                request.method, request.param
            )));
        }
        let headers = &request.headers;
        Ok(Self {
            usn: headers.get("USN").ok_or(SsdpParseError::MissingHeader("USN"))?,
            boot_id: headers
                .get("BOOTID.UPNP.ORG")
                .ok_or(SsdpParseError::MissingHeader("BOOTID.UPNP.ORG"))?,
            next_boot_id: headers
                .get("NEXTBOOTID.UPNP.ORG")
                .ok_or(SsdpParseError::MissingHeader("NEXTBOOTID.UPNP.ORG"))?,
        })
    }
}

/// Builds the M-SEARCH request for a search target.
///
/// `mx` is only present on multicast searches; unicast searches address one
/// device directly and need no response spreading.
pub fn build_msearch(
    host: &str,
    mx: Option<u32>,
    st: &str,
    user_agent: &str,
) -> SsdpRequest {
    let mut request = SsdpRequest::new("M-SEARCH");
    request.headers.set("HOST", host);
    request.headers.set("MAN", "\"ssdp:discover\"");
    if let Some(mx) = mx {
        // MX must be >= 1
        request.headers.set("MX", mx.max(1).to_string());
    }
    request.headers.set("ST", st);
    request.headers.set("USER-AGENT", user_agent);
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTIFY_ALIVE: &str = "NOTIFY * HTTP/1.1\r\n\
        HOST: 239.255.255.250:1900\r\n\
        CACHE-CONTROL: max-age=1800\r\n\
        LOCATION: http://192.168.1.42:8080/description.xml\r\n\
        NT: upnp:rootdevice\r\n\
        NTS: ssdp:alive\r\n\
        SERVER: Linux/5.0 UPnP/1.0 TestProduct/1.0\r\n\
        USN: uuid:abc::upnp:rootdevice\r\n\
        \r\n";

    #[test]
    fn test_parse_notify_request() {
        let request = SsdpRequest::parse(NOTIFY_ALIVE.as_bytes()).unwrap();
        assert_eq!(request.method, "NOTIFY");
        assert_eq!(request.param, "*");
        assert_eq!(request.http_version, HttpVersion::V1_1);
        assert_eq!(request.headers.get("nts"), Some("ssdp:alive"));
        assert_eq!(request.headers.get("USN"), Some("uuid:abc::upnp:rootdevice"));

        let info = NotifyInfo::from_request(&request).unwrap();
        assert_eq!(info.nts, "ssdp:alive");
        assert_eq!(info.cache_control, Some("max-age=1800"));
        assert!(info.date.is_none());
    }

    #[test]
    fn test_parse_search_response() {
        let raw = "HTTP/1.1 200 OK\r\n\
            CACHE-CONTROL: max-age=100\r\n\
            DATE: Tue, 05 May 2026 10:00:00 GMT\r\n\
            EXT:\r\n\
            LOCATION: http://192.168.1.42:8080/description.xml\r\n\
            SERVER: Linux/5.0 UPnP/1.1 TestProduct/1.0\r\n\
            ST: upnp:rootdevice\r\n\
            USN: uuid:abc::upnp:rootdevice\r\n\
            BOOTID.UPNP.ORG: 2\r\n\
            CONFIGID.UPNP.ORG: 7\r\n\
            \r\n";
        let response = SsdpResponse::parse(raw.as_bytes()).unwrap();
        assert_eq!(response.status, 200);

        let info = NotifyInfo::from_response(&response).unwrap();
        assert_eq!(info.nts, "ssdp:alive");
        assert_eq!(info.boot_id, Some("2"));
        assert_eq!(info.config_id, Some("7"));
        assert_eq!(info.date, Some("Tue, 05 May 2026 10:00:00 GMT"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(SsdpRequest::parse(b"").is_err());
        assert!(SsdpRequest::parse(b"\r\n").is_err());
        assert!(SsdpRequest::parse(b"NOTIFY *\r\n\r\n").is_err());
        assert!(SsdpRequest::parse(b"NOTIFY * SIP/2.0\r\n\r\n").is_err());
        assert!(SsdpResponse::parse(b"HTTP/1.1 abc OK\r\n\r\n").is_err());
    }

    #[test]
    fn test_missing_usn_is_an_error() {
        let raw = "NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\n\r\n";
        let request = SsdpRequest::parse(raw.as_bytes()).unwrap();
        match NotifyInfo::from_request(&request) {
            Err(SsdpParseError::MissingHeader("USN")) => {}
            other => panic!("expected MissingHeader(USN), got {:?}", other),
        }
    }

    #[test]
    fn test_msearch_encode_decode_roundtrip() {
        let request = build_msearch(
            "239.255.255.250:1900",
            Some(3),
            "ssdp:all",
            "linux/1.0 UPnP/1.1 TestProduct/1.0",
        );
        let encoded = request.encode();
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert!(text.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(text.contains("MAN: \"ssdp:discover\"\r\n"));

        let decoded = SsdpRequest::parse(&encoded).unwrap();
        assert_eq!(decoded.method, "M-SEARCH");
        assert_eq!(decoded.param, "*");
        assert_eq!(decoded.headers.get("HOST"), Some("239.255.255.250:1900"));
        assert_eq!(decoded.headers.get("MX"), Some("3"));
        assert_eq!(decoded.headers.get("ST"), Some("ssdp:all"));
        assert_eq!(
            decoded.headers.get("USER-AGENT"),
            Some("linux/1.0 UPnP/1.1 TestProduct/1.0")
        );
    }

    #[test]
    fn test_unicast_msearch_has_no_mx() {
        let request = build_msearch("192.168.1.42:1900", None, "uuid:abc", "agent");
        assert!(request.headers.get("MX").is_none());
    }

    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_max_age("max-age=1800"), Some(1800));
        assert_eq!(parse_max_age("no-cache, max-age = 60"), Some(60));
        assert_eq!(parse_max_age("max-age=abc"), None);
        assert_eq!(parse_max_age("no-cache"), None);
    }
}
