//! Test utilities for building SDDS datagrams.
//!
//! [`PacketBuilder`] writes wire-exact 1080-byte packets; [`FrameGenerator`]
//! produces a well-behaved stream (parity slots skipped, time tags advancing
//! by exactly one frame period) that tests then perturb.

#![cfg(any(test, feature = "benchmark"))]

use crate::sequence::successor;
use crate::types::{
    FormatIdentifier, SDDS_HEADER_SIZE, SDDS_PACKET_SIZE, SDDS_PAYLOAD_SIZE, SddsTime,
    TimeTagInfo, frequency_field_for_hz,
};

/// Builder for a single SDDS datagram.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    format: u16,
    fsn: u16,
    time_tag_info: u16,
    one_ms_delta: u16,
    time: SddsTime,
    dfdt: i32,
    frequency: i64,
    ssd_aad: [u8; 24],
    payload: Vec<u8>,
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuilder {
    /// Standard format, data mode 2, 16-bit real samples, TTV and SSV set, 10 MHz.
    pub fn new() -> Self {
        Self {
            format: FormatIdentifier::STANDARD_FORMAT | (2 << 8) | 16,
            fsn: 0,
            time_tag_info: TimeTagInfo::TIME_TAG_VALID | TimeTagInfo::SSC_VALID,
            one_ms_delta: 0,
            time: SddsTime::default(),
            dfdt: 0,
            frequency: frequency_field_for_hz(10e6),
            ssd_aad: [0; 24],
            payload: vec![0; SDDS_PAYLOAD_SIZE],
        }
    }

    pub fn fsn(mut self, fsn: u16) -> Self {
        self.fsn = fsn;
        self
    }

    /// Set the sample width; 32 is written as the wire value 31.
    pub fn bits_per_sample(mut self, bits: u8) -> Self {
        let wire = if bits == 32 { 31 } else { bits as u16 & 0x1f };
        self.format = (self.format & !FormatIdentifier::BITS_PER_SAMPLE_MASK) | wire;
        self
    }

    fn flag(mut self, flag: u16, on: bool) -> Self {
        if on {
            self.format |= flag;
        } else {
            self.format &= !flag;
        }
        self
    }

    pub fn standard_format(self, on: bool) -> Self {
        self.flag(FormatIdentifier::STANDARD_FORMAT, on)
    }

    pub fn complex(self, on: bool) -> Self {
        self.flag(FormatIdentifier::COMPLEX, on)
    }

    pub fn parity(self, on: bool) -> Self {
        self.flag(FormatIdentifier::PARITY, on)
    }

    /// Overwrite the two reserved format bits.
    pub fn reserved_bits(mut self, bits: u8) -> Self {
        self.format =
            (self.format & !FormatIdentifier::RESERVED_MASK) | ((bits as u16 & 0b11) << 5);
        self
    }

    pub fn time_tag_valid(mut self, valid: bool) -> Self {
        if valid {
            self.time_tag_info |= TimeTagInfo::TIME_TAG_VALID;
        } else {
            self.time_tag_info &= !TimeTagInfo::TIME_TAG_VALID;
        }
        self
    }

    pub fn time(mut self, time: SddsTime) -> Self {
        self.time = time;
        self
    }

    pub fn sample_rate_hz(mut self, hz: f64) -> Self {
        self.frequency = frequency_field_for_hz(hz);
        self
    }

    pub fn frequency_field(mut self, field: i64) -> Self {
        self.frequency = field;
        self
    }

    pub fn dfdt(mut self, dfdt: i32) -> Self {
        self.dfdt = dfdt;
        self
    }

    /// Payload bytes; shorter input is zero padded, longer input truncated.
    pub fn payload(mut self, bytes: &[u8]) -> Self {
        let n = bytes.len().min(SDDS_PAYLOAD_SIZE);
        self.payload = vec![0; SDDS_PAYLOAD_SIZE];
        self.payload[..n].copy_from_slice(&bytes[..n]);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SDDS_PACKET_SIZE);
        out.extend_from_slice(&self.format.to_be_bytes());
        out.extend_from_slice(&self.fsn.to_be_bytes());
        out.extend_from_slice(&self.time_tag_info.to_be_bytes());
        out.extend_from_slice(&self.one_ms_delta.to_be_bytes());
        out.extend_from_slice(&self.time.ticks.to_be_bytes());
        out.extend_from_slice(&self.time.extension.to_be_bytes());
        out.extend_from_slice(&self.dfdt.to_be_bytes());
        out.extend_from_slice(&self.frequency.to_be_bytes());
        out.extend_from_slice(&self.ssd_aad);
        debug_assert_eq!(out.len(), SDDS_HEADER_SIZE);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Produces a clean SDDS stream at a fixed sample rate.
#[derive(Debug, Clone)]
pub struct FrameGenerator {
    fsn: u16,
    time_ps: u128,
    rate_hz: f64,
    bits_per_sample: u8,
    time_step_ps: Option<f64>,
    template: PacketBuilder,
}

impl FrameGenerator {
    pub fn new(rate_hz: f64, bits_per_sample: u8) -> Self {
        Self {
            fsn: 0,
            time_ps: 0,
            rate_hz,
            bits_per_sample,
            time_step_ps: None,
            template: PacketBuilder::new().bits_per_sample(bits_per_sample).sample_rate_hz(rate_hz),
        }
    }

    /// Start the time tags at an offset into the year.
    pub fn starting_at_ps(mut self, time_ps: u128) -> Self {
        self.time_ps = time_ps;
        self
    }

    pub fn starting_fsn(mut self, fsn: u16) -> Self {
        self.fsn = fsn;
        self
    }

    pub fn complex(mut self, on: bool) -> Self {
        self.template = self.template.complex(on);
        self
    }

    /// Advance the time tags by a fixed step instead of the frame period.
    pub fn time_step_ps(mut self, step_ps: f64) -> Self {
        self.time_step_ps = Some(step_ps);
        self
    }

    /// Time between consecutive frames in picoseconds.
    pub fn frame_period_ps(&self) -> f64 {
        if let Some(step_ps) = self.time_step_ps {
            return step_ps;
        }
        let samples = (SDDS_PAYLOAD_SIZE * 8) as f64 / self.bits_per_sample as f64;
        samples / self.rate_hz * 1e12
    }

    pub fn fsn(&self) -> u16 {
        self.fsn
    }

    pub fn time_ps(&self) -> u128 {
        self.time_ps
    }

    /// Shift the time base without emitting a frame.
    pub fn offset_time_ps(&mut self, delta_ps: i128) {
        self.time_ps = (self.time_ps as i128 + delta_ps).max(0) as u128;
    }

    /// Change the sample rate from the next frame on.
    pub fn set_rate_hz(&mut self, rate_hz: f64) {
        self.rate_hz = rate_hz;
        self.template = self.template.clone().sample_rate_hz(rate_hz);
    }

    /// Builder for the next frame; advances sequence and time.
    pub fn next_builder(&mut self) -> PacketBuilder {
        let builder =
            self.template.clone().fsn(self.fsn).time(SddsTime::from_picoseconds(self.time_ps));
        self.time_ps += self.frame_period_ps().round() as u128;
        self.fsn = successor(self.fsn);
        builder
    }

    pub fn next_packet(&mut self) -> Vec<u8> {
        self.next_builder().build()
    }
}
