//! Error types for SDDS stream reception.
//!
//! All errors implement `std::error::Error` and carry enough context to tell
//! a caller what went wrong with which endpoint, packet or setting.
//!
//! ## Error Categories
//!
//! - **Packet Errors**: malformed datagrams or sample widths with no output lane
//! - **Lifecycle Errors**: attach/detach calls that conflict with the session state
//! - **Socket Errors**: bind, multicast join and socket option failures
//! - **Configuration Errors**: invalid settings or settings locked while running
//! - **Output Errors**: the downstream consumer went away
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use sdds_source::SddsError;
//!
//! let error = SddsError::already_attached("stream-1");
//! if !error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias for SDDS operations.
pub type Result<T, E = SddsError> = std::result::Result<T, E>;

/// Main error type for SDDS operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SddsError {
    #[error("Malformed SDDS packet: {details}")]
    MalformedPacket { details: String, length: usize },

    #[error("Unsupported sample format: {bits_per_sample} bits per sample")]
    UnsupportedSampleFormat { bits_per_sample: u8 },

    #[error("Stream '{attach_id}' is already attached; detach it first")]
    AlreadyAttached { attach_id: String },

    #[error("Unknown attachment '{requested}' (current: {current:?})")]
    UnknownAttachment { requested: String, current: Option<String> },

    #[error("No stream is attached")]
    NotAttached,

    #[error("Failed to bind {endpoint}")]
    Bind {
        endpoint: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket operation failed: {context}")]
    Socket {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration for '{field}': {reason}")]
    Config { field: String, reason: String },

    #[error("Output consumer closed")]
    OutputClosed,
}

impl SddsError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SddsError::Bind { .. } => true,
            SddsError::Socket { .. } => true,
            SddsError::MalformedPacket { .. } => false,
            SddsError::UnsupportedSampleFormat { .. } => false,
            SddsError::AlreadyAttached { .. } => false,
            SddsError::UnknownAttachment { .. } => false,
            SddsError::NotAttached => false,
            SddsError::Config { .. } => false,
            SddsError::OutputClosed => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SddsError::MalformedPacket { .. } => vec![
                "Verify the sender produces 1080-byte SDDS datagrams",
                "Check that nothing else transmits to the same port",
            ],
            SddsError::UnsupportedSampleFormat { .. } => vec![
                "Configure the sender for 8, 16 or 32 bits per sample",
            ],
            SddsError::AlreadyAttached { .. } => vec![
                "Detach the current stream before attaching another",
                "Use a second session for a second stream",
            ],
            SddsError::UnknownAttachment { .. } => vec![
                "Pass the id returned by attach",
                "Check whether the stream was already detached",
            ],
            SddsError::NotAttached => vec!["Attach a stream first"],
            SddsError::Bind { .. } => vec![
                "Check that the address belongs to a local interface",
                "Check that no other process holds the port",
                "Verify the multicast interface name or address",
            ],
            SddsError::Socket { .. } => vec![
                "Check socket permissions and system limits (net.core.rmem_max)",
                "Retry the operation",
            ],
            SddsError::Config { .. } => vec![
                "Check the value against the documented range",
                "Stop the session before changing pipeline settings",
            ],
            SddsError::OutputClosed => {
                vec!["Keep the output receiver alive while the session runs"]
            }
        }
    }

    /// Helper constructor for malformed packets.
    pub fn malformed(details: impl Into<String>, length: usize) -> Self {
        SddsError::MalformedPacket { details: details.into(), length }
    }

    /// Helper constructor for attach conflicts.
    pub fn already_attached(attach_id: impl Into<String>) -> Self {
        SddsError::AlreadyAttached { attach_id: attach_id.into() }
    }

    /// Helper constructor for socket failures with context.
    pub fn socket(context: impl Into<String>, source: std::io::Error) -> Self {
        SddsError::Socket { context: context.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SddsError::Config { field: field.into(), reason: reason.into() }
    }
}

impl From<std::io::Error> for SddsError {
    fn from(err: std::io::Error) -> Self {
        SddsError::Socket { context: "I/O".to_string(), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            details in ".*",
            attach_id in "\\w+",
            field in "[a-z_]+",
            reason in ".*",
            bits in 0u8..32u8,
            length in 0usize..65536usize,
          ) {
            let malformed = SddsError::malformed(details.clone(), length);
            prop_assert!(malformed.to_string().contains(&details));

            let attached = SddsError::already_attached(attach_id.clone());
            prop_assert!(attached.to_string().contains(&attach_id));

            let config = SddsError::config(field.clone(), reason.clone());
            let msg = config.to_string();
            prop_assert!(msg.contains(&field));
            prop_assert!(msg.contains(&reason));

            let format = SddsError::UnsupportedSampleFormat { bits_per_sample: bits };
            prop_assert!(format.to_string().contains(&bits.to_string()));
          }

          #[test]
          fn io_conversions_keep_the_source(message in ".*") {
            let io_err = std::io::Error::other(message.clone());
            let converted: SddsError = io_err.into();
            let source = std::error::Error::source(&converted);
            prop_assert!(source.is_some());
            prop_assert_eq!(source.map(|s| s.to_string()), Some(message));
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<SddsError>();

        let error = SddsError::NotAttached;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn bind_error_reports_endpoint_and_source() {
        let endpoint: SocketAddr = "192.0.2.1:29495".parse().unwrap();
        let err = SddsError::Bind {
            endpoint,
            source: std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "not local"),
        };
        assert!(err.to_string().contains("192.0.2.1:29495"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.is_retryable());
    }

    #[test]
    fn recovery_methods_work() {
        let errors = [
            SddsError::malformed("short", 12),
            SddsError::already_attached("a"),
            SddsError::UnknownAttachment { requested: "b".into(), current: Some("a".into()) },
            SddsError::NotAttached,
            SddsError::config("buffer_size", "too small"),
            SddsError::OutputClosed,
        ];

        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty(), "{error} has no suggestions");
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }

        assert!(!SddsError::already_attached("a").is_retryable());
        assert!(!SddsError::malformed("x", 0).is_retryable());
    }
}
