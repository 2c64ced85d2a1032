//! Provider trait for datagram sources

use std::net::SocketAddr;

use crate::Result;

/// Source of raw SDDS datagrams.
///
/// The ingestion task owns the provider and is its only caller. Providers
/// deliver one datagram per call and never interpret the bytes; decoding
/// and validation happen in the ingestion loop.
#[async_trait::async_trait]
pub trait Provider: Send + 'static {
    /// Wait for the next datagram and copy it into `buf`.
    ///
    /// Returns the number of bytes copied. Datagrams longer than `buf` are
    /// truncated, so callers pass a buffer larger than any valid packet.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Receive a datagram if one is already queued.
    ///
    /// Lets the ingestion loop drain a burst without yielding between
    /// datagrams.
    fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;

    /// Drop every datagram currently queued; returns how many were dropped.
    fn discard_pending(&mut self) -> usize;

    /// Address the source is bound to, if it has one.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Kernel receive buffer granted to the source, if it has one.
    fn socket_buffer_size(&self) -> Option<usize>;
}
