//! SDDS time tags and the UTC timestamps attached to output pushes.
//!
//! The wire time tag counts 250 ps ticks since 00:00:00 UTC on January 1 of
//! the current year, with a 32-bit extension that subdivides one tick. It
//! wraps every year, so turning it into an absolute time needs the year it
//! belongs to; [`YearEpoch`] tracks that.

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Picoseconds per time tag tick.
pub const PS_PER_TICK: u64 = 250;

/// Time tag ticks per second.
pub const TICKS_PER_SECOND: u64 = 4_000_000_000;

const EXTENSION_SCALE: f64 = 4_294_967_296.0;

/// A time tag is treated as having rolled into the next year only when it
/// regresses by more than this many seconds.
const YEAR_ROLLOVER_MIN_REGRESSION_SECS: u64 = 182 * 86_400;

/// Full-precision SDDS time tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SddsTime {
    /// 250 ps ticks since the start of the year.
    pub ticks: u64,
    /// Fraction of a tick, LSB = 250 ps / 2^32.
    pub extension: u32,
}

impl SddsTime {
    pub fn new(ticks: u64, extension: u32) -> Self {
        Self { ticks, extension }
    }

    /// Nearest representable time tag for a picosecond offset into the year.
    pub fn from_picoseconds(ps: u128) -> Self {
        let ticks = (ps / PS_PER_TICK as u128) as u64;
        let remainder = ps % PS_PER_TICK as u128;
        let extension = ((remainder << 32) / PS_PER_TICK as u128) as u32;
        Self { ticks, extension }
    }

    /// Time tag and extension as one integer, in units of 250 ps / 2^32.
    pub fn sub_ticks(&self) -> i128 {
        ((self.ticks as i128) << 32) | self.extension as i128
    }

    /// Signed distance from `earlier` to `self` in picoseconds.
    pub fn picoseconds_since(&self, earlier: &SddsTime) -> f64 {
        let delta = self.sub_ticks() - earlier.sub_ticks();
        delta as f64 * PS_PER_TICK as f64 / EXTENSION_SCALE
    }

    pub fn whole_seconds(&self) -> u64 {
        self.ticks / TICKS_PER_SECOND
    }

    pub fn fractional_seconds(&self) -> f64 {
        let frac_ticks = self.ticks % TICKS_PER_SECOND;
        frac_ticks as f64 / TICKS_PER_SECOND as f64
            + self.extension as f64 * (PS_PER_TICK as f64 * 1e-12) / EXTENSION_SCALE
    }
}

/// Source of a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeCodeMode {
    /// Host clock.
    Cpu,
    /// Derived from an SDDS time tag.
    Sdds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeCodeStatus {
    Valid,
    Invalid,
}

/// High-precision UTC timestamp carried by every output push.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecisionUtcTime {
    pub tcmode: TimeCodeMode,
    pub tcstatus: TimeCodeStatus,
    /// Offset of the first sample from the time reference, in samples.
    pub toff: f64,
    /// Whole seconds since the Unix epoch.
    pub twsec: f64,
    /// Fractional seconds.
    pub tfsec: f64,
}

impl PrecisionUtcTime {
    /// Host wall-clock time.
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            tcmode: TimeCodeMode::Cpu,
            tcstatus: TimeCodeStatus::Valid,
            toff: 0.0,
            twsec: now.timestamp() as f64,
            tfsec: now.timestamp_subsec_nanos() as f64 * 1e-9,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.tcstatus == TimeCodeStatus::Valid
    }

    /// Seconds since the Unix epoch as a single float (loses sub-microsecond precision).
    pub fn as_secs_f64(&self) -> f64 {
        self.twsec + self.tfsec
    }
}

/// Maps year-relative time tags onto absolute UTC.
#[derive(Debug, Clone)]
pub struct YearEpoch {
    year: i32,
    start_unix_secs: i64,
    last_whole_seconds: Option<u64>,
}

impl YearEpoch {
    /// Epoch for the current UTC year.
    pub fn current() -> Self {
        Self::for_year(Utc::now().year())
    }

    pub fn for_year(year: i32) -> Self {
        Self { year, start_unix_secs: start_of_year(year), last_whole_seconds: None }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Unix seconds of 00:00:00 UTC, January 1 of the tracked year.
    pub fn start_unix_secs(&self) -> i64 {
        self.start_unix_secs
    }

    /// Build the output timestamp for a frame.
    ///
    /// Only valid time tags move the epoch: a large regression in whole
    /// seconds means the source crossed into the next year.
    pub fn timestamp(&mut self, time: &SddsTime, time_tag_valid: bool) -> PrecisionUtcTime {
        let whole = time.whole_seconds();

        if time_tag_valid {
            if let Some(last) = self.last_whole_seconds {
                if whole < last && last - whole > YEAR_ROLLOVER_MIN_REGRESSION_SECS {
                    self.year += 1;
                    self.start_unix_secs = start_of_year(self.year);
                    tracing::info!(year = self.year, "SDDS time tag rolled into a new year");
                }
            }
            self.last_whole_seconds = Some(whole);
        }

        PrecisionUtcTime {
            tcmode: TimeCodeMode::Sdds,
            tcstatus: if time_tag_valid { TimeCodeStatus::Valid } else { TimeCodeStatus::Invalid },
            toff: 0.0,
            twsec: (self.start_unix_secs + whole as i64) as f64,
            tfsec: time.fractional_seconds(),
        }
    }
}

fn start_of_year(year: i32) -> i64 {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp())
        .unwrap_or(0)
}
