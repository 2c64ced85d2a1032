//! Core types for SDDS stream representation.
//!
//! - [`SddsHeader`] is the decoded 56-byte packet header, built from the
//!   [`FormatIdentifier`] and [`TimeTagInfo`] bit words
//! - [`Frame`] pairs a header with the pooled 1080-byte slot holding the datagram
//! - [`SampleFormat`] and [`SampleBuffer`] describe the typed output lane
//! - [`Sri`] carries stream routing metadata
//! - [`SddsTime`], [`PrecisionUtcTime`] and [`YearEpoch`] handle time tags
//!
//! ```rust
//! use sdds_source::types::{SampleBuffer, SampleFormat, Endianness};
//!
//! let mut samples = SampleBuffer::empty(SampleFormat::Short);
//! samples.extend_from_payload(&[0x01, 0x02, 0xff, 0xfe], Endianness::Big);
//! assert_eq!(samples, SampleBuffer::Short(vec![0x0102, -2]));
//! ```

mod bitfield;
mod frame;
mod header;
mod sample;
mod sri;
mod time;

pub use bitfield::{FormatIdentifier, TimeTagInfo};
pub use frame::{Frame, PacketSlot, new_slot};
pub use header::{
    FREQUENCY_LSB_HZ, PARITY_INTERVAL, SDDS_HEADER_SIZE, SDDS_PACKET_SIZE, SDDS_PAYLOAD_SIZE,
    SSD_AAD_SIZE, SddsHeader, frequency_field_for_hz, is_parity_slot,
};
pub use sample::{Endianness, PAYLOAD_BITS, SampleBuffer, SampleFormat};
pub use sri::{DATA_REF_KEYWORD, Keyword, KeywordValue, Sri};
pub use time::{
    PS_PER_TICK, PrecisionUtcTime, SddsTime, TICKS_PER_SECOND, TimeCodeMode, TimeCodeStatus,
    YearEpoch,
};
