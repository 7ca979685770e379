/*!
The SSDP client needs two sockets per local interface:

* a multicast-receive socket bound on the SSDP port which joins the group on
  that interface, to hear NOTIFY/UPDATE announcements;
* a unicast socket bound on an ephemeral port, to send M-SEARCH and receive
  the HTTP/200 search responses.

Responses must arrive on the same socket the search was sent from, and the
two frame shapes (request-like vs response-like) are parsed differently, so
the sockets cannot be merged.
*/

use std::net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

use super::{SSDP_MULTICAST_ADDR_V4, SSDP_MULTICAST_ADDR_V6, SSDP_PORT, multicast_address_for};
use crate::config::DiscoveryConfig;

/// Sockets and addressing of one local UPnP-eligible interface address.
#[derive(Debug)]
pub struct EndpointConfig {
    /// Local interface address.
    pub address: IpAddr,
    /// SSDP multicast group for this address family.
    pub multicast_address: IpAddr,
    /// Multicast-receive socket, absent when the multicast bind failed
    /// (the endpoint can still search via unicast).
    pub multicast_socket: Option<Arc<UdpSocket>>,
    /// Unicast send/receive socket.
    pub unicast_socket: Arc<UdpSocket>,
}

impl EndpointConfig {
    /// Destination of multicast M-SEARCH requests on this endpoint.
    pub fn multicast_target(&self) -> SocketAddr {
        SocketAddr::new(self.multicast_address, SSDP_PORT)
    }
}

/// Local addresses eligible for UPnP, filtered by the configured address
/// families, loopback excluded, IPv4 ordered before IPv6.
pub fn upnp_enabled_addresses(config: &DiscoveryConfig) -> std::io::Result<Vec<IpAddr>> {
    let mut addresses: Vec<IpAddr> = get_if_addrs::get_if_addrs()?
        .into_iter()
        .map(|iface| iface.ip())
        .filter(|ip| !ip.is_loopback())
        .filter(|ip| match ip {
            IpAddr::V4(_) => config.use_ipv4,
            IpAddr::V6(_) => config.use_ipv6,
        })
        .collect();
    addresses.sort_by_key(|ip| (ip.is_ipv6(), *ip));
    addresses.dedup();
    Ok(addresses)
}

/// Binds the multicast-receive socket for one interface address: SSDP port,
/// reuse-address, group joined on that interface.
pub fn bind_multicast_socket(address: &IpAddr) -> std::io::Result<StdUdpSocket> {
    let domain = match address {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    match address {
        IpAddr::V4(local) => {
            let bind_addr: SocketAddr = SocketAddr::new("0.0.0.0".parse().unwrap(), SSDP_PORT);
            socket.bind(&bind_addr.into())?;
            socket.join_multicast_v4(&SSDP_MULTICAST_ADDR_V4, local)?;
        }
        IpAddr::V6(_) => {
            socket.set_only_v6(true)?;
            let bind_addr: SocketAddr = SocketAddr::new("::".parse().unwrap(), SSDP_PORT);
            socket.bind(&bind_addr.into())?;
            // get_if_addrs carries no interface index, join on the default
            socket.join_multicast_v6(&SSDP_MULTICAST_ADDR_V6, 0)?;
        }
    }
    debug!(
        "SSDP: joined {} on {}",
        multicast_address_for(address),
        address
    );
    Ok(socket.into())
}

/// Binds the unicast search socket on an ephemeral port of the interface.
pub fn bind_unicast_socket(address: &IpAddr) -> std::io::Result<StdUdpSocket> {
    let socket = StdUdpSocket::bind(SocketAddr::new(*address, 0))?;
    Ok(socket)
}

/// Converts a bound std socket into a nonblocking tokio one.
pub fn into_tokio(socket: StdUdpSocket) -> std::io::Result<UdpSocket> {
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}
