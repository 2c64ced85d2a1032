//! Frames: decoded headers paired with their pooled packet storage.

use super::{SDDS_HEADER_SIZE, SDDS_PACKET_SIZE, SddsHeader};

/// Fixed-size storage for one datagram, recycled through the buffer pool.
pub type PacketSlot = Box<[u8; SDDS_PACKET_SIZE]>;

/// Allocate a zeroed packet slot.
pub fn new_slot() -> PacketSlot {
    Box::new([0u8; SDDS_PACKET_SIZE])
}

/// A received, validated SDDS datagram.
///
/// The frame owns its slot until the reconstruction path has copied the
/// samples out, then the slot goes back to the pool.
#[derive(Debug)]
pub struct Frame {
    pub header: SddsHeader,
    slot: PacketSlot,
    /// Position in reception order since the attachment started.
    pub arrival_index: u64,
}

impl Frame {
    pub fn new(header: SddsHeader, slot: PacketSlot, arrival_index: u64) -> Self {
        Self { header, slot, arrival_index }
    }

    /// The full 1080-byte datagram.
    pub fn bytes(&self) -> &[u8; SDDS_PACKET_SIZE] {
        &self.slot
    }

    pub fn payload(&self) -> &[u8] {
        &self.slot[SDDS_HEADER_SIZE..]
    }

    pub fn into_slot(self) -> PacketSlot {
        self.slot
    }
}
