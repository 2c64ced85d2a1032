//! Output batching and push policies.
//!
//! The scheduler collects frames into a batch and decides when the batch
//! goes downstream:
//!
//! - the batch reaches `frames_per_push` frames;
//! - the SRI changed (the open batch is pushed first so a push never mixes SRIs);
//! - `push_on_ttv`: the time-tag-valid flag differs from the previous frame's;
//! - `wait_on_ttv`: the flag falls from valid to invalid. Frames without a
//!   valid time tag are withheld and never pushed.
//!
//! Under either time-tag policy the edges delimit the pushes, so a run is
//! only cut by size once it reaches [`PushPolicy::batch_limit`].
//!
//! [`finish`](OutputScheduler::finish) pushes what is left followed by an
//! end-of-stream packet and returns the scheduler to [`SchedulerState::Idle`].

use std::sync::Arc;
use tracing::{debug, trace};

use super::OutputPacket;
use crate::config::SessionConfig;
use crate::types::{Endianness, PrecisionUtcTime, SampleBuffer, SampleFormat, Sri};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not attached or stopped; frames are not accepted.
    Idle,
    Accumulating,
    /// A batch is being emitted.
    Flushing,
}

/// When batches are pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushPolicy {
    pub frames_per_push: usize,
    pub push_on_ttv: bool,
    pub wait_on_ttv: bool,
}

/// How far a time-tag run may outgrow `frames_per_push` before it is cut.
const TTV_RUN_LIMIT_FACTOR: usize = 2;

impl PushPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            frames_per_push: config.sdds_pkts_per_bulkio_push.max(1),
            push_on_ttv: config.push_on_ttv,
            wait_on_ttv: config.wait_on_ttv,
        }
    }

    /// Frames at which an open batch is pushed whatever the time tags do.
    pub fn batch_limit(&self) -> usize {
        if self.push_on_ttv || self.wait_on_ttv {
            self.frames_per_push * TTV_RUN_LIMIT_FACTOR
        } else {
            self.frames_per_push
        }
    }
}

impl Default for PushPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// One frame as seen by the scheduler.
#[derive(Debug, Clone)]
pub struct ScheduledFrame<'a> {
    pub payload: &'a [u8],
    pub byte_order: Endianness,
    pub time_tag_valid: bool,
    pub timestamp: PrecisionUtcTime,
    pub sri: Arc<Sri>,
    pub sri_changed: bool,
}

#[derive(Debug)]
struct Batch {
    samples: SampleBuffer,
    frame_times: Vec<PrecisionUtcTime>,
    sri: Arc<Sri>,
    sri_changed: bool,
}

#[derive(Debug)]
pub struct OutputScheduler {
    policy: PushPolicy,
    state: SchedulerState,
    lane: Option<SampleFormat>,
    batch: Option<Batch>,
    last_ttv: Option<bool>,
    last_timestamp: Option<PrecisionUtcTime>,
    last_sri: Option<Arc<Sri>>,
    /// An SRI change arrived on a withheld frame and still has to be announced.
    sri_pending: bool,
    withheld: u64,
}

impl OutputScheduler {
    pub fn new(policy: PushPolicy) -> Self {
        Self {
            policy,
            state: SchedulerState::Idle,
            lane: None,
            batch: None,
            last_ttv: None,
            last_timestamp: None,
            last_sri: None,
            sri_pending: false,
            withheld: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn policy(&self) -> PushPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: PushPolicy) {
        self.policy = policy;
    }

    pub fn lane(&self) -> Option<SampleFormat> {
        self.lane
    }

    /// Frames dropped by `wait_on_ttv` since the scheduler was created.
    pub fn withheld_frames(&self) -> u64 {
        self.withheld
    }

    /// Frames in the open batch.
    pub fn pending_frames(&self) -> usize {
        self.batch.as_ref().map_or(0, |b| b.frame_times.len())
    }

    /// Start accepting frames for the given lane.
    pub fn begin(&mut self, lane: SampleFormat) {
        if self.state == SchedulerState::Idle {
            debug!(
                ?lane,
                frames_per_push = self.policy.frames_per_push,
                "Output scheduler started"
            );
        }
        self.lane = Some(lane);
        self.state = SchedulerState::Accumulating;
    }

    /// Add a frame; returns the pushes it triggered, in order.
    pub fn offer(&mut self, frame: ScheduledFrame<'_>) -> Vec<OutputPacket> {
        let mut pushes = Vec::new();
        let Some(lane) = self.lane else {
            trace!("Frame offered before a lane was chosen");
            return pushes;
        };
        if self.state == SchedulerState::Idle {
            trace!("Frame offered while idle");
            return pushes;
        }

        let ttv = frame.time_tag_valid;
        let edge = self.last_ttv.replace(ttv).is_some_and(|previous| previous != ttv);

        if frame.sri_changed {
            pushes.extend(self.flush());
        }

        if edge && (self.policy.push_on_ttv || (self.policy.wait_on_ttv && !ttv)) {
            trace!(current = ttv, "Time tag valid edge");
            pushes.extend(self.flush());
        }

        if self.policy.wait_on_ttv && !ttv {
            self.withheld += 1;
            self.sri_pending |= frame.sri_changed;
            trace!(withheld = self.withheld, "Withholding frame without a valid time tag");
            return pushes;
        }

        let sri_changed = std::mem::take(&mut self.sri_pending) | frame.sri_changed;
        let batch = self.batch.get_or_insert_with(|| Batch {
            samples: SampleBuffer::with_capacity(lane, self.policy.frames_per_push),
            frame_times: Vec::with_capacity(self.policy.frames_per_push),
            sri: frame.sri.clone(),
            sri_changed: false,
        });
        batch.samples.extend_from_payload(frame.payload, frame.byte_order);
        batch.frame_times.push(frame.timestamp);
        batch.sri = frame.sri;
        batch.sri_changed |= sri_changed;

        if batch.frame_times.len() >= self.policy.batch_limit() {
            pushes.extend(self.flush());
        }

        pushes
    }

    /// Push the open batch, if any.
    pub fn flush(&mut self) -> Option<OutputPacket> {
        let batch = self.batch.take()?;
        let previous = self.state;
        self.state = SchedulerState::Flushing;

        let frames = batch.frame_times.len();
        let timestamp = batch.frame_times.first().copied().unwrap_or_else(PrecisionUtcTime::now);
        self.last_timestamp = Some(timestamp);
        self.last_sri = Some(batch.sri.clone());
        trace!(frames, samples = batch.samples.len(), "Flushing batch");

        let packet = OutputPacket {
            samples: batch.samples,
            timestamp,
            sri: batch.sri,
            sri_changed: batch.sri_changed,
            eos: false,
            frames,
        };

        self.state = if previous == SchedulerState::Idle {
            SchedulerState::Idle
        } else {
            SchedulerState::Accumulating
        };
        Some(packet)
    }

    /// Push what is left, then an end-of-stream packet, and go idle.
    ///
    /// `sri` describes the stream when no batch was ever pushed.
    pub fn finish(&mut self, sri: Arc<Sri>) -> Vec<OutputPacket> {
        let mut pushes: Vec<OutputPacket> = self.flush().into_iter().collect();
        let lane = self.lane.unwrap_or(SampleFormat::Octet);
        let eos = OutputPacket {
            samples: SampleBuffer::empty(lane),
            timestamp: self.last_timestamp.unwrap_or_else(PrecisionUtcTime::now),
            sri: self.last_sri.clone().unwrap_or(sri),
            sri_changed: false,
            eos: true,
            frames: 0,
        };
        pushes.push(eos);

        debug!(pushes = pushes.len(), "Output scheduler finished with end of stream");
        self.state = SchedulerState::Idle;
        self.last_ttv = None;
        self.last_timestamp = None;
        self.last_sri = None;
        self.sri_pending = false;
        pushes
    }

    /// Forget the lane; the next attachment chooses its own.
    pub fn reset(&mut self) {
        self.batch = None;
        self.lane = None;
        self.state = SchedulerState::Idle;
        self.last_ttv = None;
        self.last_timestamp = None;
        self.last_sri = None;
        self.sri_pending = false;
    }
}
