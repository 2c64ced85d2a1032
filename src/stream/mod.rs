//! Stream utilities for output consumers

mod until_eos;

pub use until_eos::{UntilEos, UntilEosExt};
