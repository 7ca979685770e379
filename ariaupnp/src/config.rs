//! Configuration de la découverte UPnP.

use serde::{Deserialize, Serialize};

/// Discovery settings, meant to be embedded in the host application's
/// configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Listen and search on IPv4 interfaces.
    pub use_ipv4: bool,

    /// Listen and search on IPv6 interfaces.
    pub use_ipv6: bool,

    /// MX value (maximum response delay, seconds) sent in multicast
    /// M-SEARCH requests.
    pub search_mx: u32,

    /// Timeout for one description-document HTTP GET, in seconds.
    pub description_timeout_secs: u64,

    /// Product token advertised in USER-AGENT headers.
    pub product_name: String,

    /// Version of the product token.
    pub product_version: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            use_ipv4: true,
            use_ipv6: false,
            search_mx: 3,
            description_timeout_secs: 30,
            product_name: "AriaControl".to_string(),
            product_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl DiscoveryConfig {
    /// Machine-info header in the canonical `OS/version UPnP/1.1
    /// product/version` form, used as USER-AGENT on M-SEARCH requests and
    /// description GETs (ex: "linux/1.0 UPnP/1.1 AriaControl/0.1.0").
    pub fn machine_info_header(&self) -> String {
        format!(
            "{}/1.0 UPnP/1.1 {}/{}",
            std::env::consts::OS,
            self.product_name,
            self.product_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_ipv4_only() {
        let config = DiscoveryConfig::default();
        assert!(config.use_ipv4);
        assert!(!config.use_ipv6);
        assert_eq!(config.description_timeout_secs, 30);
    }

    #[test]
    fn test_machine_info_header_contains_upnp_token() {
        let config = DiscoveryConfig::default();
        let header = config.machine_info_header();
        assert!(header.contains("UPnP/1.1"), "header was: {}", header);
        assert_eq!(header.split(' ').count(), 3);
    }
}
