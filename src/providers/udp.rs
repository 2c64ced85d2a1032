//! UDP socket provider

use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::config::SessionConfig;
use crate::net::{EndpointDescriptor, bind_udp};
use crate::provider::Provider;
use crate::types::SDDS_PACKET_SIZE;
use crate::{Result, SddsError};

/// Provider reading SDDS datagrams from a unicast or multicast socket.
#[derive(Debug)]
pub struct UdpProvider {
    socket: UdpSocket,
    endpoint: EndpointDescriptor,
    local_addr: Option<SocketAddr>,
    recv_buffer_size: usize,
}

impl UdpProvider {
    /// Bind a socket for `endpoint`. Must be called inside a tokio runtime.
    pub fn bind(endpoint: &EndpointDescriptor, config: &SessionConfig) -> Result<Self> {
        let bound = bind_udp(endpoint, config)?;
        let socket = UdpSocket::from_std(bound.socket)
            .map_err(|e| SddsError::socket("register socket with runtime", e))?;
        let local_addr = socket.local_addr().ok();

        info!(
            address = %endpoint.address,
            port = endpoint.port,
            vlan = endpoint.vlan,
            local = ?local_addr,
            recv_buffer_size = bound.recv_buffer_size,
            "UDP provider ready"
        );

        Ok(Self {
            socket,
            endpoint: endpoint.clone(),
            local_addr,
            recv_buffer_size: bound.recv_buffer_size,
        })
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl Provider for UdpProvider {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (len, from) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(|e| SddsError::socket("receive datagram", e))?;
        trace!(len, %from, "Datagram received");
        Ok(len)
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.socket.try_recv_from(buf) {
            Ok((len, _)) => Ok(Some(len)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SddsError::socket("receive datagram", e)),
        }
    }

    fn discard_pending(&mut self) -> usize {
        let mut scratch = [0u8; SDDS_PACKET_SIZE];
        let mut discarded = 0;
        while self.socket.try_recv_from(&mut scratch).is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "Discarded queued datagrams");
        }
        discarded
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn socket_buffer_size(&self) -> Option<usize> {
        Some(self.recv_buffer_size)
    }
}
