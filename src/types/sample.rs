//! Sample formats, typed sample buffers, and payload byte order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Result, SddsError};

/// Bits carried by one SDDS payload.
pub const PAYLOAD_BITS: usize = 1024 * 8;

/// Output lane chosen by the first accepted frame of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 1024 signed 8-bit samples per frame.
    Octet,
    /// 512 signed 16-bit samples per frame.
    Short,
    /// 256 32-bit float samples per frame.
    Float,
}

impl SampleFormat {
    pub fn from_bits_per_sample(bits: u8) -> Result<Self> {
        match bits {
            8 => Ok(SampleFormat::Octet),
            16 => Ok(SampleFormat::Short),
            32 => Ok(SampleFormat::Float),
            other => Err(SddsError::UnsupportedSampleFormat { bits_per_sample: other }),
        }
    }

    pub fn bits_per_sample(&self) -> u8 {
        match self {
            SampleFormat::Octet => 8,
            SampleFormat::Short => 16,
            SampleFormat::Float => 32,
        }
    }

    pub fn samples_per_frame(&self) -> usize {
        PAYLOAD_BITS / self.bits_per_sample() as usize
    }
}

/// Byte order of payload samples.
///
/// Written the way the wire configuration spells it: `"4321"` for big
/// endian (network order) and `"1234"` for little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

impl Endianness {
    /// Value of the `dataRef` SRI keyword announcing little-endian payloads.
    pub const DATA_REF_LITTLE: i64 = 0x1234;
    /// Value of the `dataRef` SRI keyword announcing big-endian payloads.
    pub const DATA_REF_BIG: i64 = 0x4321;

    pub fn as_str(&self) -> &'static str {
        match self {
            Endianness::Big => "4321",
            Endianness::Little => "1234",
        }
    }

    pub fn from_data_ref(value: i64) -> Option<Self> {
        match value {
            Self::DATA_REF_LITTLE => Some(Endianness::Little),
            Self::DATA_REF_BIG => Some(Endianness::Big),
            _ => None,
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endianness {
    type Err = SddsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "4321" => Ok(Endianness::Big),
            "1234" => Ok(Endianness::Little),
            other => Err(SddsError::config(
                "endianness",
                format!("expected 1234 or 4321, got '{other}'"),
            )),
        }
    }
}

impl TryFrom<String> for Endianness {
    type Error = SddsError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Endianness> for String {
    fn from(value: Endianness) -> Self {
        value.as_str().to_string()
    }
}

/// Samples of one output push, in the attachment's lane.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    Octet(Vec<i8>),
    Short(Vec<i16>),
    Float(Vec<f32>),
}

impl SampleBuffer {
    pub fn with_capacity(format: SampleFormat, frames: usize) -> Self {
        let samples = frames * format.samples_per_frame();
        match format {
            SampleFormat::Octet => SampleBuffer::Octet(Vec::with_capacity(samples)),
            SampleFormat::Short => SampleBuffer::Short(Vec::with_capacity(samples)),
            SampleFormat::Float => SampleBuffer::Float(Vec::with_capacity(samples)),
        }
    }

    pub fn empty(format: SampleFormat) -> Self {
        Self::with_capacity(format, 0)
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            SampleBuffer::Octet(_) => SampleFormat::Octet,
            SampleBuffer::Short(_) => SampleFormat::Short,
            SampleBuffer::Float(_) => SampleFormat::Float,
        }
    }

    /// Number of samples (not bytes).
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::Octet(v) => v.len(),
            SampleBuffer::Short(v) => v.len(),
            SampleBuffer::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload size in bytes.
    pub fn byte_len(&self) -> usize {
        self.len() * self.format().bits_per_sample() as usize / 8
    }

    /// Append one frame's payload, converting from the given byte order.
    pub fn extend_from_payload(&mut self, payload: &[u8], order: Endianness) {
        match self {
            SampleBuffer::Octet(v) => v.extend(payload.iter().map(|&b| b as i8)),
            SampleBuffer::Short(v) => v.extend(payload.chunks_exact(2).map(|c| {
                let bytes = [c[0], c[1]];
                match order {
                    Endianness::Big => i16::from_be_bytes(bytes),
                    Endianness::Little => i16::from_le_bytes(bytes),
                }
            })),
            SampleBuffer::Float(v) => v.extend(payload.chunks_exact(4).map(|c| {
                let bytes = [c[0], c[1], c[2], c[3]];
                match order {
                    Endianness::Big => f32::from_be_bytes(bytes),
                    Endianness::Little => f32::from_le_bytes(bytes),
                }
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_follow_bits_per_sample() {
        assert_eq!(SampleFormat::from_bits_per_sample(8).unwrap(), SampleFormat::Octet);
        assert_eq!(SampleFormat::from_bits_per_sample(16).unwrap(), SampleFormat::Short);
        assert_eq!(SampleFormat::from_bits_per_sample(32).unwrap(), SampleFormat::Float);
        assert!(matches!(
            SampleFormat::from_bits_per_sample(4),
            Err(SddsError::UnsupportedSampleFormat { bits_per_sample: 4 })
        ));

        assert_eq!(SampleFormat::Octet.samples_per_frame(), 1024);
        assert_eq!(SampleFormat::Short.samples_per_frame(), 512);
        assert_eq!(SampleFormat::Float.samples_per_frame(), 256);
    }

    #[test]
    fn shorts_decode_identically_from_either_byte_order() {
        let values: Vec<i16> = (0..512).map(|i| (i * 37 - 9000) as i16).collect();
        let big: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        let little: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut from_big = SampleBuffer::empty(SampleFormat::Short);
        from_big.extend_from_payload(&big, Endianness::Big);
        let mut from_little = SampleBuffer::empty(SampleFormat::Short);
        from_little.extend_from_payload(&little, Endianness::Little);

        assert_eq!(from_big, SampleBuffer::Short(values));
        assert_eq!(from_big, from_little);
    }

    #[test]
    fn floats_decode_from_big_endian() {
        let values: Vec<f32> = (0..256).map(|i| i as f32 * 0.5 - 3.0).collect();
        let big: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        let mut buffer = SampleBuffer::empty(SampleFormat::Float);
        buffer.extend_from_payload(&big, Endianness::Big);
        assert_eq!(buffer, SampleBuffer::Float(values));
        assert_eq!(buffer.byte_len(), 1024);
    }

    #[test]
    fn endianness_parses_wire_spelling() {
        assert_eq!("4321".parse::<Endianness>().unwrap(), Endianness::Big);
        assert_eq!("1234".parse::<Endianness>().unwrap(), Endianness::Little);
        assert!("big".parse::<Endianness>().is_err());
        assert_eq!(Endianness::from_data_ref(4660), Some(Endianness::Little));
        assert_eq!(Endianness::from_data_ref(17185), Some(Endianness::Big));
        assert_eq!(Endianness::from_data_ref(0), None);
    }
}
