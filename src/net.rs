//! UDP socket setup and kernel queue inspection.
//!
//! Sockets are built with `socket2` so the receive buffer size, address
//! reuse and multicast membership can be set before binding, then handed
//! to tokio as a non-blocking `std::net::UdpSocket`.

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use socket2::{Domain, InterfaceIndexOrAddress, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::{Result, SddsError};

/// Where an SDDS stream arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Stream id to use as the attachment id; generated when empty.
    #[serde(default)]
    pub stream_id: String,
    /// Unicast address of a local interface, or a multicast group.
    pub address: Ipv4Addr,
    pub port: u16,
    /// Recorded for reporting; VLAN tagging is left to the host network setup.
    #[serde(default)]
    pub vlan: u16,
}

impl EndpointDescriptor {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { stream_id: String::new(), address, port, vlan: 0 }
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }

    pub fn with_vlan(mut self, vlan: u16) -> Self {
        self.vlan = vlan;
        self
    }

    pub fn is_multicast(&self) -> bool {
        self.address.is_multicast()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }
}

/// A bound, non-blocking socket and the receive buffer the kernel granted.
#[derive(Debug)]
pub struct BoundSocket {
    pub socket: std::net::UdpSocket,
    pub recv_buffer_size: usize,
}

/// Create, configure and bind a socket for `endpoint`.
pub fn bind_udp(endpoint: &EndpointDescriptor, config: &SessionConfig) -> Result<BoundSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| SddsError::socket("create UDP socket", e))?;

    if endpoint.is_multicast() {
        socket
            .set_reuse_address(true)
            .map_err(|e| SddsError::socket("set SO_REUSEADDR", e))?;
    }

    if let Err(e) = socket.set_recv_buffer_size(config.udp_socket_buffer_size) {
        warn!(
            requested = config.udp_socket_buffer_size,
            "Could not set socket receive buffer: {}", e
        );
    }
    let recv_buffer_size = socket.recv_buffer_size().unwrap_or(0);
    if recv_buffer_size < config.udp_socket_buffer_size {
        warn!(
            requested = config.udp_socket_buffer_size,
            granted = recv_buffer_size,
            "Socket receive buffer smaller than requested; raise net.core.rmem_max"
        );
    }

    let bind_addr = bind_address(endpoint);
    socket
        .bind(&bind_addr.into())
        .map_err(|source| SddsError::Bind { endpoint: bind_addr, source })?;

    if endpoint.is_multicast() {
        let interface = resolve_interface(&config.interface)
            .map_err(|e| SddsError::config("interface", format!("{e:#}")))?;
        socket
            .join_multicast_v4_n(&endpoint.address, &interface)
            .map_err(|e| {
                SddsError::socket(format!("join multicast group {}", endpoint.address), e)
            })?;
        info!(group = %endpoint.address, interface = %config.interface, "Joined multicast group");
    }

    socket.set_nonblocking(true).map_err(|e| SddsError::socket("set non-blocking", e))?;

    debug!(%bind_addr, recv_buffer_size, "UDP socket bound");
    Ok(BoundSocket { socket: socket.into(), recv_buffer_size })
}

/// Multicast sockets bind the group address on Linux so other groups on the
/// same port are filtered; elsewhere they bind the wildcard address.
fn bind_address(endpoint: &EndpointDescriptor) -> SocketAddr {
    if endpoint.is_multicast() && !cfg!(target_os = "linux") {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, endpoint.port))
    } else {
        endpoint.socket_addr()
    }
}

/// Interface for a multicast join: empty means any, an IPv4 literal is used
/// as-is, anything else is an interface name looked up in sysfs.
fn resolve_interface(interface: &str) -> anyhow::Result<InterfaceIndexOrAddress> {
    let interface = interface.trim();
    if interface.is_empty() {
        return Ok(InterfaceIndexOrAddress::Address(Ipv4Addr::UNSPECIFIED));
    }
    if let Ok(addr) = interface.parse::<Ipv4Addr>() {
        return Ok(InterfaceIndexOrAddress::Address(addr));
    }
    if !cfg!(target_os = "linux") {
        bail!("interface names are only resolved on Linux; use an IPv4 address");
    }

    let path = format!("/sys/class/net/{interface}/ifindex");
    let index = std::fs::read_to_string(&path)
        .with_context(|| format!("unknown interface '{interface}'"))?
        .trim()
        .parse::<u32>()
        .with_context(|| format!("unreadable {path}"))?;
    Ok(InterfaceIndexOrAddress::Index(index))
}

/// Bytes queued in the kernel for UDP sockets bound to `port`.
///
/// Reads `/proc/net/udp` on Linux; reports zero elsewhere or on error.
pub fn rx_queue_depth(port: u16) -> u64 {
    if !cfg!(target_os = "linux") {
        return 0;
    }
    std::fs::read_to_string("/proc/net/udp")
        .context("reading /proc/net/udp")
        .and_then(|contents| parse_rx_queue(&contents, port))
        .unwrap_or_else(|e| {
            debug!("Socket queue depth unavailable: {:#}", e);
            0
        })
}

/// Sum the `rx_queue` column of every entry whose local port is `port`.
fn parse_rx_queue(contents: &str, port: u16) -> anyhow::Result<u64> {
    let mut total = 0;
    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (Some(local), Some(queues)) = (fields.get(1), fields.get(4)) else {
            continue;
        };
        let local_port = local
            .rsplit_once(':')
            .map(|(_, p)| u16::from_str_radix(p, 16))
            .context("local address without port")?
            .context("local port is not hex")?;
        if local_port != port {
            continue;
        }
        let rx = queues
            .split_once(':')
            .map(|(_, rx)| u64::from_str_radix(rx, 16))
            .context("queue column without rx part")?
            .context("rx_queue is not hex")?;
        total += rx;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_NET_UDP: &str = "\
   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops
  132: 00000000:7337 00000000:0000 07 00000000:00004380 00:00000000 00000000  1000        0 51393 2 0000000000000000 0
  187: 3500007F:0035 00000000:0000 07 00000000:00000000 00:00000000 00000000   101        0 19623 2 0000000000000000 0
  301: 0100007F:7337 00000000:0000 07 00000000:00000100 00:00000000 00000000  1000        0 51394 2 0000000000000000 0
";

    #[test]
    fn rx_queue_sums_matching_port() {
        assert_eq!(parse_rx_queue(PROC_NET_UDP, 0x7337).unwrap(), 0x4380 + 0x100);
        assert_eq!(parse_rx_queue(PROC_NET_UDP, 53).unwrap(), 0);
        assert_eq!(parse_rx_queue(PROC_NET_UDP, 9).unwrap(), 0);
    }

    #[test]
    fn rx_queue_rejects_garbage() {
        let garbage = "header\n 1: nothex:zz 0 0 00000000:00000000\n";
        assert!(parse_rx_queue(garbage, 1).is_err());
    }

    #[test]
    fn interface_resolution() {
        assert!(matches!(
            resolve_interface("").unwrap(),
            InterfaceIndexOrAddress::Address(addr) if addr == Ipv4Addr::UNSPECIFIED
        ));
        assert!(matches!(
            resolve_interface("10.1.2.3").unwrap(),
            InterfaceIndexOrAddress::Address(addr) if addr == Ipv4Addr::new(10, 1, 2, 3)
        ));
        assert!(resolve_interface("definitely-not-an-interface0").is_err());
    }

    #[test]
    fn endpoint_classifies_multicast() {
        assert!(EndpointDescriptor::new(Ipv4Addr::new(239, 1, 1, 1), 29495).is_multicast());
        assert!(!EndpointDescriptor::new(Ipv4Addr::LOCALHOST, 29495).is_multicast());
    }

    #[test]
    fn binds_loopback_and_reports_buffer() {
        let endpoint = EndpointDescriptor::new(Ipv4Addr::LOCALHOST, 0);
        let config = SessionConfig { udp_socket_buffer_size: 65_536, ..SessionConfig::default() };
        let bound = bind_udp(&endpoint, &config).unwrap();
        assert!(bound.socket.local_addr().unwrap().port() != 0);
        assert!(bound.recv_buffer_size > 0);
    }

    #[test]
    fn bind_to_foreign_address_fails_with_bind_error() {
        // TEST-NET-1 is never assigned to a local interface
        let endpoint = EndpointDescriptor::new(Ipv4Addr::new(192, 0, 2, 1), 29495);
        let err = bind_udp(&endpoint, &SessionConfig::default()).unwrap_err();
        assert!(matches!(err, SddsError::Bind { .. }));
    }
}
