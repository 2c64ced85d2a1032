//! Per-attachment reconstruction: from decoded frames to output pushes.
//!
//! A [`Pipeline`] owns everything that must survive a stop/start cycle of
//! one attachment: the sequence and clock trackers, the SRI merger, the
//! output scheduler and the sample lane. Detaching drops it; the next
//! attachment builds a fresh one.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::clock::ClockTracker;
use crate::config::SessionConfig;
use crate::output::{OutputPacket, OutputScheduler, PushPolicy, ScheduledFrame, SchedulerState};
use crate::sequence::SequenceTracker;
use crate::sri::SriMerger;
use crate::status::StatusCounters;
use crate::types::{Endianness, Frame, SampleFormat, Sri, YearEpoch};

/// Externally pushed SRI, shared between the session and its pipeline.
pub type ExternalSri = watch::Receiver<Option<Arc<Sri>>>;

#[derive(Debug)]
pub struct Pipeline {
    attach_id: String,
    configured_order: Endianness,
    lane: Option<SampleFormat>,
    sequence: SequenceTracker,
    clock: ClockTracker,
    sri: SriMerger,
    scheduler: OutputScheduler,
    epoch: YearEpoch,
    external_sri: ExternalSri,
    status: Arc<StatusCounters>,
    lane_mismatches: u64,
}

impl Pipeline {
    pub fn new(
        attach_id: impl Into<String>,
        config: &SessionConfig,
        external_sri: ExternalSri,
        status: Arc<StatusCounters>,
    ) -> Self {
        let attach_id = attach_id.into();
        status.set_endianness(config.endianness);
        Self {
            sri: SriMerger::new(attach_id.clone()),
            attach_id,
            configured_order: config.endianness,
            lane: None,
            sequence: SequenceTracker::new(),
            clock: ClockTracker::new(),
            scheduler: OutputScheduler::new(PushPolicy::from_config(config)),
            epoch: YearEpoch::current(),
            external_sri,
            status,
            lane_mismatches: 0,
        }
    }

    /// Start from a specific year instead of the current one.
    pub fn with_epoch(mut self, epoch: YearEpoch) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn attach_id(&self) -> &str {
        &self.attach_id
    }

    pub fn lane(&self) -> Option<SampleFormat> {
        self.lane
    }

    pub fn sequence(&self) -> &SequenceTracker {
        &self.sequence
    }

    pub fn clock(&self) -> &ClockTracker {
        &self.clock
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Payload byte order in effect: the external `dataRef` keyword when
    /// present, the configured default otherwise.
    pub fn byte_order(&self) -> Endianness {
        self.external_sri
            .borrow()
            .as_deref()
            .and_then(Sri::data_ref)
            .unwrap_or(self.configured_order)
    }

    /// Pick the pipeline up again after [`finish`](Self::finish), keeping
    /// tracker state. Push settings are re-read from `config`.
    pub fn resume(&mut self, config: &SessionConfig) {
        self.configured_order = config.endianness;
        self.status.set_endianness(self.byte_order());
        self.scheduler.set_policy(PushPolicy::from_config(config));
        if let Some(lane) = self.lane {
            self.scheduler.begin(lane);
        }
        debug!(
            attach_id = %self.attach_id,
            expected_fsn = ?self.sequence.expected(),
            time_slips = self.clock.time_slips(),
            "Pipeline resumed"
        );
    }

    /// Process one frame; returns the pushes it triggered.
    pub fn handle_frame(&mut self, frame: &Frame) -> Vec<OutputPacket> {
        let header = &frame.header;

        let dropped = self.sequence.accept(header.fsn);
        if dropped > 0 {
            self.status.add_dropped(u64::from(dropped));
        }
        self.status.set_expected_fsn(self.sequence.expected());

        let event = self.clock.observe(header, dropped);
        trace!(fsn = header.fsn, ?event, "Clock check");
        self.status.set_time_slips(self.clock.time_slips());

        let Some(lane) = self.accept_lane(header.bits_per_sample()) else {
            return Vec::new();
        };
        if self.scheduler.state() == SchedulerState::Idle {
            self.scheduler.begin(lane);
        }

        let external = self.external_sri.borrow().clone();
        let byte_order =
            external.as_deref().and_then(Sri::data_ref).unwrap_or(self.configured_order);
        self.status.set_endianness(byte_order);

        let (sri, sri_changed) = self.sri.merge(external.as_deref(), header);
        let freq_hz = header.freq_hz();
        if freq_hz > 0.0 {
            self.status.set_sample_rate(freq_hz);
        }

        let time_tag_valid = header.time_tag_valid();
        let timestamp = self.epoch.timestamp(&header.time, time_tag_valid);

        self.scheduler.offer(ScheduledFrame {
            payload: frame.payload(),
            byte_order,
            time_tag_valid,
            timestamp,
            sri,
            sri_changed,
        })
    }

    /// Flush the open batch and end the stream.
    ///
    /// The next push after a [`resume`](Self::resume) carries the SRI again.
    pub fn finish(&mut self) -> Vec<OutputPacket> {
        let pushes = self.scheduler.finish(self.sri.current());
        self.sri.invalidate();
        debug!(attach_id = %self.attach_id, pushes = pushes.len(), "Pipeline finished");
        pushes
    }

    /// Fix the lane on the first frame and reject frames that disagree with it.
    fn accept_lane(&mut self, bits_per_sample: u8) -> Option<SampleFormat> {
        match self.lane {
            Some(lane) if lane.bits_per_sample() == bits_per_sample => Some(lane),
            Some(lane) => {
                self.lane_mismatches += 1;
                if self.lane_mismatches == 1 {
                    warn!(
                        lane = ?lane,
                        bits_per_sample,
                        "Discarding frame whose sample width differs from the stream"
                    );
                } else {
                    trace!(
                        bits_per_sample,
                        mismatches = self.lane_mismatches,
                        "Discarding mismatched frame"
                    );
                }
                None
            }
            None => match SampleFormat::from_bits_per_sample(bits_per_sample) {
                Ok(lane) => {
                    debug!(attach_id = %self.attach_id, ?lane, "Sample lane selected");
                    self.lane = Some(lane);
                    self.status.set_bits_per_sample(bits_per_sample);
                    Some(lane)
                }
                Err(e) => {
                    warn!("Discarding frame: {}", e);
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketCodec;
    use crate::types::{DATA_REF_KEYWORD, Keyword, KeywordValue, SampleBuffer};
    use crate::test_utils::{FrameGenerator, PacketBuilder};

    fn pipeline(
        config: &SessionConfig,
    ) -> (Pipeline, watch::Sender<Option<Arc<Sri>>>, Arc<StatusCounters>) {
        let (tx, rx) = watch::channel(None);
        let status = Arc::new(StatusCounters::new());
        (Pipeline::new("attach-1", config, rx, status.clone()), tx, status)
    }

    fn frame(bytes: &[u8]) -> Frame {
        PacketCodec::decode(bytes, 0).unwrap()
    }

    fn total_samples(pushes: &[OutputPacket]) -> usize {
        pushes.iter().map(|p| p.samples.len()).sum()
    }

    #[test]
    fn full_sequence_of_octet_frames_arrives_intact() {
        let (mut pipeline, _tx, status) = pipeline(&SessionConfig::default());
        let mut generator = FrameGenerator::new(25e6, 8);
        let mut pushes = Vec::new();
        let mut frames = 0;

        while generator.fsn() < 2112 {
            pushes.extend(pipeline.handle_frame(&frame(&generator.next_packet())));
            frames += 1;
        }
        pushes.extend(pipeline.finish());

        assert_eq!(frames, 2046);
        assert_eq!(total_samples(&pushes), 2_095_104);
        assert_eq!(status.dropped_packets(), 0);
        assert_eq!(pipeline.clock().time_slips(), 0);
        assert!(pushes.last().unwrap().eos);
        assert!(pushes.iter().all(|p| matches!(p.samples, SampleBuffer::Octet(_))));
    }

    #[test]
    fn repeated_fsn_counts_a_full_wrap() {
        let (mut pipeline, _tx, status) = pipeline(&SessionConfig::default());
        pipeline.handle_frame(&frame(&PacketBuilder::new().fsn(1).build()));
        pipeline.handle_frame(&frame(&PacketBuilder::new().fsn(1).build()));
        assert_eq!(status.dropped_packets(), 65535);
    }

    #[test]
    fn first_frame_fixes_the_lane() {
        let config = SessionConfig { sdds_pkts_per_bulkio_push: 1, ..SessionConfig::default() };
        let (mut pipeline, _tx, status) = pipeline(&config);

        let pushes = pipeline
            .handle_frame(&frame(&PacketBuilder::new().fsn(0).bits_per_sample(16).build()));
        assert_eq!(pushes.len(), 1);
        assert_eq!(pipeline.lane(), Some(SampleFormat::Short));

        let pushes = pipeline
            .handle_frame(&frame(&PacketBuilder::new().fsn(1).bits_per_sample(8).build()));
        assert!(pushes.is_empty());

        let pushes = pipeline
            .handle_frame(&frame(&PacketBuilder::new().fsn(2).bits_per_sample(16).build()));
        assert_eq!(pushes[0].samples.len(), 512);
        assert_eq!(status.snapshot(0, 0, 0).bits_per_sample, 16);
    }

    #[test]
    fn unsupported_width_is_discarded_until_a_supported_one_arrives() {
        let config = SessionConfig { sdds_pkts_per_bulkio_push: 1, ..SessionConfig::default() };
        let (mut pipeline, _tx, _status) = pipeline(&config);

        let packet = PacketBuilder::new().fsn(0).bits_per_sample(4).build();
        assert!(pipeline.handle_frame(&frame(&packet)).is_empty());
        assert_eq!(pipeline.lane(), None);

        let pushes = pipeline
            .handle_frame(&frame(&PacketBuilder::new().fsn(1).bits_per_sample(32).build()));
        assert_eq!(pipeline.lane(), Some(SampleFormat::Float));
        assert_eq!(pushes[0].samples.len(), 256);
    }

    #[test]
    fn data_ref_keyword_overrides_configured_byte_order() {
        let config = SessionConfig { sdds_pkts_per_bulkio_push: 1, ..SessionConfig::default() };
        let (mut pipeline, tx, status) = pipeline(&config);

        let values: [i16; 3] = [1, -2, 300];
        let little: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let big: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();

        let pushes =
            pipeline.handle_frame(&frame(&PacketBuilder::new().fsn(0).payload(&big).build()));
        let SampleBuffer::Short(samples) = &pushes[0].samples else { panic!("expected shorts") };
        assert_eq!(&samples[..3], &values);
        assert_eq!(status.snapshot(0, 0, 0).input_endianness, "4321");

        let mut sri = Sri::new("external");
        sri.keywords.push(Keyword::new(
            DATA_REF_KEYWORD,
            KeywordValue::Long(Endianness::DATA_REF_LITTLE),
        ));
        tx.send_replace(Some(Arc::new(sri)));

        let pushes =
            pipeline.handle_frame(&frame(&PacketBuilder::new().fsn(1).payload(&little).build()));
        let SampleBuffer::Short(samples) = &pushes[0].samples else { panic!("expected shorts") };
        assert_eq!(&samples[..3], &values);
        assert_eq!(pushes[0].sri.stream_id, "external");
        assert!(pushes[0].sri_changed);
        assert_eq!(pipeline.byte_order(), Endianness::Little);
        assert_eq!(status.snapshot(0, 0, 0).input_endianness, "1234");
    }

    #[test]
    fn resume_keeps_tracker_state() {
        let config = SessionConfig { sdds_pkts_per_bulkio_push: 4, ..SessionConfig::default() };
        let (mut pipeline, _tx, status) = pipeline(&config);
        let mut generator = FrameGenerator::new(1e6, 16);

        for _ in 0..10 {
            pipeline.handle_frame(&frame(&generator.next_packet()));
        }
        let pushes = pipeline.finish();
        assert!(pushes.last().unwrap().eos);
        assert_eq!(pipeline.scheduler_state(), SchedulerState::Idle);

        pipeline.resume(&config);
        assert_eq!(pipeline.scheduler_state(), SchedulerState::Accumulating);
        assert_eq!(pipeline.sequence().expected(), Some(generator.fsn()));

        let pushes: Vec<_> =
            (0..4).flat_map(|_| pipeline.handle_frame(&frame(&generator.next_packet()))).collect();
        assert_eq!(pushes.len(), 1);
        assert!(pushes[0].sri_changed);
        assert_eq!(status.dropped_packets(), 0);
        assert_eq!(pipeline.clock().time_slips(), 0);
    }

    #[test]
    fn finish_before_any_frame_emits_octet_eos() {
        let (mut pipeline, _tx, _status) = pipeline(&SessionConfig::default());
        let pushes = pipeline.finish();
        assert_eq!(pushes.len(), 1);
        assert!(pushes[0].eos);
        assert_eq!(pushes[0].samples, SampleBuffer::Octet(vec![]));
        assert_eq!(pushes[0].sri.stream_id, "attach-1");
    }

    #[test]
    fn time_slips_reach_status() {
        let (mut pipeline, _tx, status) = pipeline(&SessionConfig::default());
        let mut generator = FrameGenerator::new(1e6, 16);
        for _ in 0..20 {
            pipeline.handle_frame(&frame(&generator.next_packet()));
        }
        generator.offset_time_ps(5_000_000);
        for _ in 0..20 {
            pipeline.handle_frame(&frame(&generator.next_packet()));
        }
        assert_eq!(status.time_slips(), 1);
        assert_eq!(status.snapshot(0, 0, 0).input_sample_rate.round(), 1e6);
    }

    #[test]
    fn complex_device_stamping_per_pair_reports_no_slips() {
        let (mut pipeline, _tx, status) = pipeline(&SessionConfig::default());
        let mut generator = FrameGenerator::new(1e6, 16).complex(true).time_step_ps(256_000_000.0);
        for _ in 0..97 {
            pipeline.handle_frame(&frame(&generator.next_packet()));
        }
        assert_eq!(status.time_slips(), 0);
        assert_eq!(status.dropped_packets(), 0);
    }
}
