//! Bit-packed header words: the format identifier and the time tag info.

use serde::{Deserialize, Serialize};

/// Format identifier word (header bytes 0..2).
///
/// Bit layout, MSB first: SF, SoS, PP, OF, SS, DataMode (3 bits), CX,
/// two reserved bits, BitsPerSample (5 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatIdentifier(pub u16);

impl FormatIdentifier {
    pub const STANDARD_FORMAT: u16 = 1 << 15;
    pub const START_OF_SEQUENCE: u16 = 1 << 14;
    pub const PARITY: u16 = 1 << 13;
    pub const ORIGINAL_FORMAT: u16 = 1 << 12;
    pub const SPECTRAL_SENSE: u16 = 1 << 11;
    pub const DATA_MODE_MASK: u16 = 0b0111 << 8;
    pub const COMPLEX: u16 = 1 << 7;
    pub const RESERVED_MASK: u16 = 0b11 << 5;
    pub const BITS_PER_SAMPLE_MASK: u16 = 0x1f;

    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Check if a specific flag is set using a bitmask.
    pub fn has_flag(&self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    pub fn standard_format(&self) -> bool {
        self.has_flag(Self::STANDARD_FORMAT)
    }

    pub fn start_of_sequence(&self) -> bool {
        self.has_flag(Self::START_OF_SEQUENCE)
    }

    pub fn parity(&self) -> bool {
        self.has_flag(Self::PARITY)
    }

    pub fn original_format(&self) -> bool {
        self.has_flag(Self::ORIGINAL_FORMAT)
    }

    pub fn spectral_sense(&self) -> bool {
        self.has_flag(Self::SPECTRAL_SENSE)
    }

    /// True when samples are complex (I/Q) pairs.
    pub fn complex(&self) -> bool {
        self.has_flag(Self::COMPLEX)
    }

    /// Three-bit data mode field.
    pub fn data_mode(&self) -> u8 {
        ((self.0 & Self::DATA_MODE_MASK) >> 8) as u8
    }

    /// Value of the two reserved bits; non-zero on a conforming packet is an error.
    pub fn reserved(&self) -> u8 {
        ((self.0 & Self::RESERVED_MASK) >> 5) as u8
    }

    /// Bits per sample. The five-bit wire value 31 stands for 32.
    pub fn bits_per_sample(&self) -> u8 {
        match (self.0 & Self::BITS_PER_SAMPLE_MASK) as u8 {
            31 => 32,
            bps => bps,
        }
    }

    /// Get the raw word.
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Time tag info word (header bytes 4..6).
///
/// Bit layout, MSB first: MSV, TTV, SSV, two reserved bits, 11-bit 1 ms pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeTagInfo(pub u16);

impl TimeTagInfo {
    pub const MSD_VALID: u16 = 1 << 15;
    pub const TIME_TAG_VALID: u16 = 1 << 14;
    pub const SSC_VALID: u16 = 1 << 13;
    pub const RESERVED_MASK: u16 = 0b11 << 11;
    pub const ONE_MS_POINTER_MASK: u16 = 0x07ff;

    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    pub fn msd_valid(&self) -> bool {
        self.has_flag(Self::MSD_VALID)
    }

    pub fn time_tag_valid(&self) -> bool {
        self.has_flag(Self::TIME_TAG_VALID)
    }

    pub fn ssc_valid(&self) -> bool {
        self.has_flag(Self::SSC_VALID)
    }

    pub fn one_ms_pointer(&self) -> u16 {
        self.0 & Self::ONE_MS_POINTER_MASK
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}
