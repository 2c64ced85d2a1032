//! Decoded SDDS packet header.
//!
//! # Wire Layout
//!
//! Every SDDS datagram is 1080 bytes: a 56-byte header followed by a
//! 1024-byte payload. Multi-byte header fields are big endian.
//!
//! ```text
//! offset  size  field
//!      0     2  format identifier (see FormatIdentifier)
//!      2     2  frame sequence number
//!      4     2  time tag info (see TimeTagInfo)
//!      6     2  1 ms delta
//!      8     8  time tag, 250 ps ticks since Jan 1 00:00:00 UTC
//!     16     4  time tag extension, LSB = 250 ps / 2^32
//!     20     4  dF/dT
//!     24     8  frequency, LSB = 125 MHz / 2^63
//!     32    24  SSD/AAD (opaque)
//! ```

use serde::{Deserialize, Serialize};

use super::{FormatIdentifier, SddsTime, TimeTagInfo};

pub const SDDS_HEADER_SIZE: usize = 56;
pub const SDDS_PAYLOAD_SIZE: usize = 1024;
pub const SDDS_PACKET_SIZE: usize = SDDS_HEADER_SIZE + SDDS_PAYLOAD_SIZE;

/// Size of the opaque SSD/AAD tail of the header.
pub const SSD_AAD_SIZE: usize = 24;

/// Hertz per LSB of the frequency field (125 MHz / 2^63).
pub const FREQUENCY_LSB_HZ: f64 = 125e6 / 9_223_372_036_854_775_808.0;

/// One reserved parity slot every 32 sequence numbers.
pub const PARITY_INTERVAL: u16 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SddsHeader {
    pub format: FormatIdentifier,
    /// Frame sequence number.
    pub fsn: u16,
    pub time_tag_info: TimeTagInfo,
    pub one_ms_delta: u16,
    pub time: SddsTime,
    pub dfdt: i32,
    /// Raw frequency field.
    pub frequency: i64,
    pub ssd_aad: [u8; SSD_AAD_SIZE],
}

impl SddsHeader {
    /// Sample clock frequency in Hz.
    pub fn freq_hz(&self) -> f64 {
        self.frequency as f64 * FREQUENCY_LSB_HZ
    }

    pub fn time_tag_valid(&self) -> bool {
        self.time_tag_info.time_tag_valid()
    }

    pub fn is_complex(&self) -> bool {
        self.format.complex()
    }

    pub fn bits_per_sample(&self) -> u8 {
        self.format.bits_per_sample()
    }

    /// Samples in one payload, or `None` when the width is zero.
    pub fn samples_per_frame(&self) -> Option<u32> {
        match self.bits_per_sample() {
            0 => None,
            bps => Some((SDDS_PAYLOAD_SIZE as u32 * 8) / bps as u32),
        }
    }
}

/// True for sequence numbers reserved for parity frames.
pub fn is_parity_slot(fsn: u16) -> bool {
    fsn % PARITY_INTERVAL == PARITY_INTERVAL - 1
}

/// Frequency field value for a sample rate in Hz.
pub fn frequency_field_for_hz(hz: f64) -> i64 {
    (hz / FREQUENCY_LSB_HZ).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_field_scales_to_hertz() {
        let field = frequency_field_for_hz(10e6);
        let header = SddsHeader {
            format: FormatIdentifier::new(0x8210),
            fsn: 0,
            time_tag_info: TimeTagInfo::new(0),
            one_ms_delta: 0,
            time: SddsTime::default(),
            dfdt: 0,
            frequency: field,
            ssd_aad: [0; SSD_AAD_SIZE],
        };
        assert!((header.freq_hz() - 10e6).abs() < 1e-3);
        assert_eq!(header.samples_per_frame(), Some(512));
    }

    #[test]
    fn parity_slots_are_every_32nd() {
        assert!(is_parity_slot(31));
        assert!(is_parity_slot(63));
        assert!(is_parity_slot(65535));
        assert!(!is_parity_slot(0));
        assert!(!is_parity_slot(32));
    }
}
