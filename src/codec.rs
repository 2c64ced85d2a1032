//! SDDS packet decoding and validation.
//!
//! A datagram is accepted when it is exactly [`SDDS_PACKET_SIZE`] bytes and
//! its format identifier is self-consistent: the reserved bits are clear and
//! the parity bit is not set (parity frames occupy reserved sequence slots
//! and carry no samples). Packets with the standard-format bit clear are
//! still accepted.
//!
//! Payload byte order is not a codec concern; the codec hands back raw bytes.

use tracing::trace;

use crate::types::{
    FormatIdentifier, Frame, SDDS_HEADER_SIZE, SDDS_PACKET_SIZE, SSD_AAD_SIZE, SddsHeader,
    SddsTime, TimeTagInfo, new_slot,
};
use crate::{Result, SddsError};

/// Stateless SDDS decoder.
pub struct PacketCodec;

impl PacketCodec {
    /// Validate a datagram and decode its header without touching the payload.
    pub fn decode_header(bytes: &[u8]) -> Result<SddsHeader> {
        if bytes.len() != SDDS_PACKET_SIZE {
            return Err(SddsError::malformed(
                format!("expected {} bytes, got {}", SDDS_PACKET_SIZE, bytes.len()),
                bytes.len(),
            ));
        }

        let format = FormatIdentifier::new(parse_u16_be(bytes, 0));
        if format.reserved() != 0 {
            return Err(SddsError::malformed(
                format!("reserved format bits set ({:#06x})", format.value()),
                bytes.len(),
            ));
        }
        if format.parity() {
            return Err(SddsError::malformed("parity frames are not supported", bytes.len()));
        }

        let mut ssd_aad = [0u8; SSD_AAD_SIZE];
        ssd_aad.copy_from_slice(&bytes[32..SDDS_HEADER_SIZE]);

        let header = SddsHeader {
            format,
            fsn: parse_u16_be(bytes, 2),
            time_tag_info: TimeTagInfo::new(parse_u16_be(bytes, 4)),
            one_ms_delta: parse_u16_be(bytes, 6),
            time: SddsTime::new(parse_u64_be(bytes, 8), parse_u32_be(bytes, 16)),
            dfdt: parse_u32_be(bytes, 20) as i32,
            frequency: parse_u64_be(bytes, 24) as i64,
            ssd_aad,
        };

        trace!(
            fsn = header.fsn,
            bps = header.bits_per_sample(),
            ttv = header.time_tag_valid(),
            "Decoded SDDS header"
        );
        Ok(header)
    }

    /// Decode a datagram into a frame that owns a fresh copy of the bytes.
    pub fn decode(bytes: &[u8], arrival_index: u64) -> Result<Frame> {
        let header = Self::decode_header(bytes)?;
        let mut slot = new_slot();
        slot.copy_from_slice(bytes);
        Ok(Frame::new(header, slot, arrival_index))
    }
}

// Callers check the total length first, so these index within bounds.
fn parse_u16_be(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn parse_u32_be(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

fn parse_u64_be(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}
