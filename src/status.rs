//! Live status counters shared between the pipeline tasks and the session.

use serde::Serialize;
use std::sync::atomic::{
    AtomicBool, AtomicU16, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering,
};

use crate::types::Endianness;

const NO_EXPECTED_FSN: u32 = u32::MAX;

/// Counters written by the pipeline tasks and read without locking.
#[derive(Debug)]
pub struct StatusCounters {
    dropped_packets: AtomicU64,
    time_slips: AtomicU64,
    received_packets: AtomicU64,
    malformed_packets: AtomicU64,
    little_endian: AtomicBool,
    bits_per_sample: AtomicU8,
    expected_fsn: AtomicU32,
    sample_rate_bits: AtomicU64,
    local_port: AtomicU16,
    socket_buffer_size: AtomicUsize,
}

impl Default for StatusCounters {
    fn default() -> Self {
        Self {
            dropped_packets: AtomicU64::new(0),
            time_slips: AtomicU64::new(0),
            received_packets: AtomicU64::new(0),
            malformed_packets: AtomicU64::new(0),
            little_endian: AtomicBool::new(false),
            bits_per_sample: AtomicU8::new(0),
            expected_fsn: AtomicU32::new(NO_EXPECTED_FSN),
            sample_rate_bits: AtomicU64::new(0),
            local_port: AtomicU16::new(0),
            socket_buffer_size: AtomicUsize::new(0),
        }
    }
}

impl StatusCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything tied to one attachment's stream.
    pub fn reset_stream(&self) {
        self.dropped_packets.store(0, Ordering::Relaxed);
        self.time_slips.store(0, Ordering::Relaxed);
        self.received_packets.store(0, Ordering::Relaxed);
        self.malformed_packets.store(0, Ordering::Relaxed);
        self.bits_per_sample.store(0, Ordering::Relaxed);
        self.expected_fsn.store(NO_EXPECTED_FSN, Ordering::Relaxed);
        self.sample_rate_bits.store(0, Ordering::Relaxed);
    }

    pub fn add_dropped(&self, frames: u64) {
        self.dropped_packets.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn set_time_slips(&self, slips: u64) {
        self.time_slips.store(slips, Ordering::Relaxed);
    }

    pub fn add_received(&self, packets: u64) {
        self.received_packets.fetch_add(packets, Ordering::Relaxed);
    }

    pub fn add_malformed(&self, packets: u64) {
        self.malformed_packets.fetch_add(packets, Ordering::Relaxed);
    }

    pub fn set_endianness(&self, order: Endianness) {
        self.little_endian.store(order == Endianness::Little, Ordering::Relaxed);
    }

    pub fn set_bits_per_sample(&self, bits: u8) {
        self.bits_per_sample.store(bits, Ordering::Relaxed);
    }

    pub fn set_expected_fsn(&self, fsn: Option<u16>) {
        self.expected_fsn.store(fsn.map_or(NO_EXPECTED_FSN, u32::from), Ordering::Relaxed);
    }

    pub fn set_sample_rate(&self, hz: f64) {
        self.sample_rate_bits.store(hz.to_bits(), Ordering::Relaxed);
    }

    pub fn set_socket(&self, port: Option<u16>, buffer_size: usize) {
        self.local_port.store(port.unwrap_or(0), Ordering::Relaxed);
        self.socket_buffer_size.store(buffer_size, Ordering::Relaxed);
    }

    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets.load(Ordering::Relaxed)
    }

    pub fn time_slips(&self) -> u64 {
        self.time_slips.load(Ordering::Relaxed)
    }

    pub fn received_packets(&self) -> u64 {
        self.received_packets.load(Ordering::Relaxed)
    }

    pub fn local_port(&self) -> Option<u16> {
        match self.local_port.load(Ordering::Relaxed) {
            0 => None,
            port => Some(port),
        }
    }

    /// Snapshot the counters; pool and socket-queue figures come from the caller.
    pub fn snapshot(
        &self,
        empty_buffers_available: usize,
        buffers_to_work: usize,
        queue_depth: u64,
    ) -> Status {
        let endianness = if self.little_endian.load(Ordering::Relaxed) {
            Endianness::Little
        } else {
            Endianness::Big
        };
        let expected = self.expected_fsn.load(Ordering::Relaxed);

        Status {
            dropped_packets: self.dropped_packets(),
            time_slips: self.time_slips(),
            input_endianness: endianness.as_str().to_string(),
            empty_buffers_available,
            udp_socket_buffer_queue_depth: queue_depth,
            buffers_to_work,
            received_packets: self.received_packets(),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            bits_per_sample: self.bits_per_sample.load(Ordering::Relaxed),
            expected_sequence_number: u16::try_from(expected).ok(),
            input_sample_rate: f64::from_bits(self.sample_rate_bits.load(Ordering::Relaxed)),
            input_port: self.local_port(),
            udp_socket_buffer_size: self.socket_buffer_size.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    /// Frames missing from the sequence since attach (modulo-65536 gaps).
    pub dropped_packets: u64,
    /// Clock inconsistencies detected since attach.
    pub time_slips: u64,
    /// Payload byte order in use, `"4321"` or `"1234"`.
    pub input_endianness: String,
    pub empty_buffers_available: usize,
    /// Bytes waiting in the kernel receive queue of the bound socket.
    pub udp_socket_buffer_queue_depth: u64,
    /// Frames received but not yet processed.
    pub buffers_to_work: usize,
    pub received_packets: u64,
    pub malformed_packets: u64,
    pub bits_per_sample: u8,
    pub expected_sequence_number: Option<u16>,
    pub input_sample_rate: f64,
    pub input_port: Option<u16>,
    /// Kernel receive buffer size granted for the socket.
    pub udp_socket_buffer_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let counters = StatusCounters::new();
        counters.add_dropped(3);
        counters.add_dropped(65535);
        counters.set_time_slips(2);
        counters.set_endianness(Endianness::Little);
        counters.set_expected_fsn(Some(32));
        counters.set_sample_rate(1e6);
        counters.set_socket(Some(29495), 212_992);

        let status = counters.snapshot(19_500, 0, 0);
        assert_eq!(status.dropped_packets, 65538);
        assert_eq!(status.time_slips, 2);
        assert_eq!(status.input_endianness, "1234");
        assert_eq!(status.expected_sequence_number, Some(32));
        assert_eq!(status.input_sample_rate, 1e6);
        assert_eq!(status.input_port, Some(29495));
        assert_eq!(status.empty_buffers_available, 19_500);
    }

    #[test]
    fn reset_clears_stream_counters_but_keeps_socket() {
        let counters = StatusCounters::new();
        counters.add_dropped(5);
        counters.set_expected_fsn(Some(7));
        counters.set_socket(Some(4000), 1024);
        counters.reset_stream();

        let status = counters.snapshot(0, 0, 0);
        assert_eq!(status.dropped_packets, 0);
        assert_eq!(status.expected_sequence_number, None);
        assert_eq!(status.input_port, Some(4000));
    }

    #[test]
    fn status_serializes_with_field_names() {
        let yaml = serde_yaml_ng::to_string(&StatusCounters::new().snapshot(1, 2, 3)).unwrap();
        assert!(yaml.contains("dropped_packets: 0"));
        assert!(
            yaml.contains("input_endianness: '4321'")
                || yaml.contains("input_endianness: \"4321\"")
        );
        assert!(yaml.contains("udp_socket_buffer_queue_depth: 3"));
    }
}
