//! Output side: batched sample pushes and where they go.

mod scheduler;
mod sink;

use std::sync::Arc;

use crate::types::{PrecisionUtcTime, SampleBuffer, Sri};

pub use scheduler::{OutputScheduler, PushPolicy, ScheduledFrame, SchedulerState};
pub use sink::{ChannelSink, OutputReceiver, OutputSink, channel};

/// One push to the downstream consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPacket {
    pub samples: SampleBuffer,
    /// Time of the first sample.
    pub timestamp: PrecisionUtcTime,
    pub sri: Arc<Sri>,
    /// True when `sri` differs from what the previous push carried.
    pub sri_changed: bool,
    /// End of stream; `samples` is empty.
    pub eos: bool,
    /// SDDS frames merged into this push.
    pub frames: usize,
}
