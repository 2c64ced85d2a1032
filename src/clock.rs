//! Clock consistency ("time slip") detection.
//!
//! Each frame carries a time tag and the sample clock frequency. From the
//! frequency of the previous frame the tracker knows how far apart two
//! consecutive time tags should be; the difference to the actual spacing is
//! checked two ways:
//!
//! - **Jump slip**: a single interval off by more than
//!   [`JUMP_SLIP_THRESHOLD_PS`]. Drift is re-anchored afterwards.
//! - **Accumulator slip**: small per-frame deviations summed until their
//!   magnitude exceeds [`ACCUMULATOR_SLIP_THRESHOLD_PS`], then reset.
//!
//! Time tags restart every January 1st. A spacing more negative than
//! 364 days is that rollover and neither slips nor accumulates.
//!
//! Frames without a valid time tag or with a non-positive frequency are not
//! checked; they clear the reference so the next checkable frame re-seeds.
//!
//! Complex streams come in two flavours: some senders advance the time tag
//! by one sample period per I/Q pair, others per 16-bit word. The first
//! checked interval of a complex stream picks the closer of the two and the
//! choice holds until [`ClockTracker::reset`].

use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{SddsHeader, SddsTime};

/// Accumulated drift beyond which a slip is counted (1 ns).
pub const ACCUMULATOR_SLIP_THRESHOLD_PS: f64 = 1_000.0;

/// Single-interval deviation beyond which a slip is counted (1 µs).
pub const JUMP_SLIP_THRESHOLD_PS: f64 = 1_000_000.0;

const YEAR_ROLLOVER_THRESHOLD_PS: f64 = -364.0 * 86_400.0 * 1e12;

/// Sequence gaps at or above this size re-seed instead of being bridged.
const MAX_BRIDGED_DROPS: u16 = 1024;

/// Outcome of checking one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockEvent {
    /// First checkable frame; reference stored.
    Seeded,
    /// Frame could not be checked.
    Unchecked,
    Consistent,
    YearRollover,
    AccumulatorSlip { drift_ps: f64 },
    JumpSlip { deviation_ps: f64 },
}

impl ClockEvent {
    pub fn is_slip(&self) -> bool {
        matches!(self, ClockEvent::AccumulatorSlip { .. } | ClockEvent::JumpSlip { .. })
    }
}

/// How a complex stream's time tags advance across one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComplexSpacing {
    /// One sample period per word: the frame spans all of its samples.
    PerSample,
    /// One sample period per I/Q pair: the frame spans half of its samples.
    PerPair,
}

impl ComplexSpacing {
    fn closest(actual_ps: f64, per_sample_ps: f64) -> Self {
        let pair_error = (actual_ps - per_sample_ps / 2.0).abs();
        if pair_error < (actual_ps - per_sample_ps).abs() {
            ComplexSpacing::PerPair
        } else {
            ComplexSpacing::PerSample
        }
    }

    fn expected_ps(self, per_sample_ps: f64) -> f64 {
        match self {
            ComplexSpacing::PerSample => per_sample_ps,
            ComplexSpacing::PerPair => per_sample_ps / 2.0,
        }
    }
}

/// Snapshot of the tracker's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClockState {
    pub last_time_tag: Option<SddsTime>,
    pub accumulated_drift_ps: f64,
    /// Expected spacing of the most recently checked interval.
    pub expected_increment_ps: Option<i64>,
    pub time_slips: u64,
    /// Latched on the first checked interval of a complex stream.
    pub complex_spacing: Option<ComplexSpacing>,
}

#[derive(Debug, Clone, Default)]
pub struct ClockTracker {
    state: ClockState,
    /// Frame period implied by the reference frame's frequency.
    period_ps: Option<f64>,
    reference_complex: bool,
}

impl ClockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a frame against the previous one.
    ///
    /// `dropped` is the number of frames the sequence tracker reported
    /// missing just before this one; the expected spacing covers them.
    pub fn observe(&mut self, header: &SddsHeader, dropped: u16) -> ClockEvent {
        let freq_hz = header.freq_hz();
        let period_ps = match header.samples_per_frame() {
            Some(samples) if header.time_tag_valid() && freq_hz > 0.0 => {
                samples as f64 / freq_hz * 1e12
            }
            _ => {
                self.forget_reference();
                return ClockEvent::Unchecked;
            }
        };

        let (last, last_period) = match (self.state.last_time_tag, self.period_ps) {
            (Some(last), Some(period)) if dropped < MAX_BRIDGED_DROPS => (last, period),
            _ => {
                self.state.last_time_tag = Some(header.time);
                self.period_ps = Some(period_ps);
                self.reference_complex = header.is_complex();
                return ClockEvent::Seeded;
            }
        };

        let reference_complex = std::mem::replace(&mut self.reference_complex, header.is_complex());
        let actual_ps = header.time.picoseconds_since(&last);
        self.state.last_time_tag = Some(header.time);
        self.period_ps = Some(period_ps);

        if actual_ps < YEAR_ROLLOVER_THRESHOLD_PS {
            debug!(actual_ps, "SDDS time tag wrapped at year boundary");
            return ClockEvent::YearRollover;
        }

        let mut expected_ps = last_period * (dropped as f64 + 1.0);
        if reference_complex {
            let spacing = match self.state.complex_spacing {
                Some(spacing) => spacing,
                None => {
                    let spacing = ComplexSpacing::closest(actual_ps, expected_ps);
                    debug!(?spacing, "Complex time tag spacing selected");
                    self.state.complex_spacing = Some(spacing);
                    spacing
                }
            };
            expected_ps = spacing.expected_ps(expected_ps);
        }
        self.state.expected_increment_ps = Some(expected_ps.round() as i64);

        let deviation_ps = actual_ps - expected_ps;
        if deviation_ps.abs() > JUMP_SLIP_THRESHOLD_PS {
            self.state.time_slips += 1;
            self.state.accumulated_drift_ps = 0.0;
            warn!(
                fsn = header.fsn,
                deviation_ps,
                slips = self.state.time_slips,
                "Time slip: time tag jumped"
            );
            return ClockEvent::JumpSlip { deviation_ps };
        }

        self.state.accumulated_drift_ps += deviation_ps;
        let drift_ps = self.state.accumulated_drift_ps;
        if drift_ps.abs() > ACCUMULATOR_SLIP_THRESHOLD_PS {
            self.state.time_slips += 1;
            self.state.accumulated_drift_ps = 0.0;
            warn!(
                fsn = header.fsn,
                drift_ps,
                slips = self.state.time_slips,
                "Time slip: clock drift"
            );
            return ClockEvent::AccumulatorSlip { drift_ps };
        }

        ClockEvent::Consistent
    }

    pub fn time_slips(&self) -> u64 {
        self.state.time_slips
    }

    pub fn state(&self) -> &ClockState {
        &self.state
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn forget_reference(&mut self) {
        self.state.last_time_tag = None;
        self.period_ps = None;
    }
}
