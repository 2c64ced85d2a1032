//! Receive SDDS sample streams over UDP and republish them as typed,
//! timestamped output.
//!
//! SDDS carries a continuous sample stream in fixed 1080-byte datagrams: a
//! 56-byte header (sequence number, time tag, sample rate) followed by 1024
//! bytes of samples. This crate binds a unicast or multicast endpoint,
//! validates every datagram, tracks sequence gaps and clock slips, and
//! merges frames into larger pushes with stream metadata (SRI) attached.
//!
//! # Features
//!
//! - **Non-blocking ingestion**: the socket reader never waits on the consumer;
//!   overload shows up as sequence gaps, not a stalled socket
//! - **Stream health**: dropped-frame and time-slip counters in [`Status`]
//! - **Typed lanes**: 8, 16 and 32-bit payloads arrive as `i8`, `i16` or `f32`
//! - **Push policies**: fixed batch size, push on time-tag-valid edges, or
//!   hold until the time tag becomes valid
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sdds_source::{EndpointDescriptor, SessionConfig, StreamSession};
//! use futures::StreamExt;
//! use sdds_source::stream::UntilEosExt;
//! use std::net::Ipv4Addr;
//!
//! #[tokio::main]
//! async fn main() -> sdds_source::Result<()> {
//!     let config = SessionConfig::from_yaml_str("sdds_pkts_per_bulkio_push: 64\n")?;
//!     let (session, output) = StreamSession::with_channel(config)?;
//!
//!     let endpoint = EndpointDescriptor::new(Ipv4Addr::LOCALHOST, 29495);
//!     let id = session.attach(endpoint, "quickstart").await?;
//!     session.start().await?;
//!
//!     let mut pushes = output.until_eos();
//!     while let Some(push) = pushes.next().await {
//!         println!("{} samples at {:.6}", push.samples.len(), push.timestamp.as_secs_f64());
//!         if session.status().dropped_packets > 1000 {
//!             session.detach(&id).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Per-frame processing
pub mod clock;
pub mod codec;
pub mod pipeline;
pub mod pool;
pub mod sequence;
pub mod sri;

// Stream-based output
pub mod output;
pub mod stream;

// Sources and task management
pub mod driver;
pub mod net;
pub mod provider;
pub mod providers;

// Control surface
pub mod config;
pub mod session;
pub mod status;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use clock::{ClockEvent, ClockTracker, ComplexSpacing};
pub use codec::PacketCodec;
pub use config::{AttachmentOverride, SessionConfig};
pub use net::EndpointDescriptor;
pub use output::{OutputPacket, OutputReceiver, OutputSink};
pub use pool::BufferPool;
pub use sequence::SequenceTracker;
pub use session::{SessionState, StreamSession};
pub use sri::SriMerger;
pub use status::Status;
