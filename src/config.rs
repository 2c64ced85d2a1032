//! Session configuration.
//!
//! Every field has a default, so a YAML document only needs the settings
//! it changes:
//!
//! ```rust
//! use sdds_source::SessionConfig;
//!
//! let yaml = "sdds_pkts_per_bulkio_push: 64\nwait_on_ttv: true\n";
//! let config = SessionConfig::from_yaml_str(yaml).unwrap();
//! assert_eq!(config.sdds_pkts_per_bulkio_push, 64);
//! assert_eq!(config.buffer_size, 20_000);
//! ```

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::debug;

use crate::net::EndpointDescriptor;
use crate::types::Endianness;
use crate::{Result, SddsError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Packet slots in the buffer pool.
    pub buffer_size: usize,
    /// Datagrams read per receive batch; the ingestion task keeps this many slots in hand.
    pub pkts_per_socket_read: usize,
    /// SDDS frames merged into one output push.
    pub sdds_pkts_per_bulkio_push: usize,
    /// Push whenever the time-tag-valid flag changes.
    pub push_on_ttv: bool,
    /// Hold frames without a valid time tag; push when the flag falls.
    pub wait_on_ttv: bool,
    /// Requested kernel receive buffer (SO_RCVBUF) in bytes.
    pub udp_socket_buffer_size: usize,
    /// Multicast interface: empty for any, an IPv4 address, or an interface name.
    pub interface: String,
    /// Default payload byte order.
    pub endianness: Endianness,
    /// Endpoint bound by `start` in place of an attachment.
    pub attachment_override: AttachmentOverride,
}

/// A fixed endpoint that `start` binds without any `attach` call.
///
/// While enabled, attach and detach only record the attachment; the
/// overriding stream keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttachmentOverride {
    pub enabled: bool,
    pub ip_address: Ipv4Addr,
    pub vlan: u16,
    pub port: u16,
    /// Payload byte order of the overriding stream; replaces `endianness`.
    pub endianness: Endianness,
}

impl Default for AttachmentOverride {
    fn default() -> Self {
        Self {
            enabled: false,
            ip_address: Ipv4Addr::LOCALHOST,
            vlan: 0,
            port: 29495,
            endianness: Endianness::Big,
        }
    }
}

impl AttachmentOverride {
    pub fn endpoint(&self) -> EndpointDescriptor {
        EndpointDescriptor::new(self.ip_address, self.port).with_vlan(self.vlan)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 20_000,
            pkts_per_socket_read: 500,
            sdds_pkts_per_bulkio_push: 1000,
            push_on_ttv: false,
            wait_on_ttv: false,
            udp_socket_buffer_size: 134_217_728,
            interface: String::new(),
            endianness: Endianness::Big,
            attachment_override: AttachmentOverride::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SessionConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| SddsError::config("yaml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| SddsError::config("path", format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loading session configuration");
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pkts_per_socket_read == 0 {
            return Err(SddsError::config("pkts_per_socket_read", "must be at least 1"));
        }
        if self.buffer_size < self.pkts_per_socket_read {
            return Err(SddsError::config(
                "buffer_size",
                format!(
                    "{} is smaller than pkts_per_socket_read ({})",
                    self.buffer_size, self.pkts_per_socket_read
                ),
            ));
        }
        if self.sdds_pkts_per_bulkio_push == 0 {
            return Err(SddsError::config("sdds_pkts_per_bulkio_push", "must be at least 1"));
        }
        Ok(())
    }

    /// First field that differs from `other` and cannot change while running.
    ///
    /// Every field shapes the running pipeline, so any difference counts.
    pub fn locked_difference(&self, other: &SessionConfig) -> Option<&'static str> {
        if self.buffer_size != other.buffer_size {
            Some("buffer_size")
        } else if self.pkts_per_socket_read != other.pkts_per_socket_read {
            Some("pkts_per_socket_read")
        } else if self.sdds_pkts_per_bulkio_push != other.sdds_pkts_per_bulkio_push {
            Some("sdds_pkts_per_bulkio_push")
        } else if self.push_on_ttv != other.push_on_ttv {
            Some("push_on_ttv")
        } else if self.wait_on_ttv != other.wait_on_ttv {
            Some("wait_on_ttv")
        } else if self.udp_socket_buffer_size != other.udp_socket_buffer_size {
            Some("udp_socket_buffer_size")
        } else if self.interface != other.interface {
            Some("interface")
        } else if self.endianness != other.endianness {
            Some("endianness")
        } else if self.attachment_override != other.attachment_override {
            Some("attachment_override")
        } else {
            None
        }
    }

    /// Empty slots the pool keeps at steady state.
    pub fn buffer_headroom(&self) -> usize {
        self.buffer_size.saturating_sub(self.pkts_per_socket_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.buffer_size, 20_000);
        assert_eq!(config.pkts_per_socket_read, 500);
        assert_eq!(config.sdds_pkts_per_bulkio_push, 1000);
        assert_eq!(config.udp_socket_buffer_size, 134_217_728);
        assert_eq!(config.endianness, Endianness::Big);
        assert!(!config.push_on_ttv && !config.wait_on_ttv);
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_headroom(), 19_500);
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let config = SessionConfig::from_yaml_str(
            "buffer_size: 3300\npkts_per_socket_read: 100\nendianness: \"1234\"\ninterface: eth1\n",
        )
        .unwrap();
        assert_eq!(config.buffer_size, 3300);
        assert_eq!(config.pkts_per_socket_read, 100);
        assert_eq!(config.endianness, Endianness::Little);
        assert_eq!(config.interface, "eth1");
        assert_eq!(config.sdds_pkts_per_bulkio_push, 1000);
    }

    #[test]
    fn attachment_override_section_parses() {
        let config = SessionConfig::from_yaml_str(
            "attachment_override:\n  enabled: true\n  ip_address: 239.1.1.1\n  port: 30000\n  \
             endianness: \"1234\"\n",
        )
        .unwrap();
        let overriding = &config.attachment_override;
        assert!(overriding.enabled);
        assert_eq!(overriding.vlan, 0);
        assert_eq!(overriding.endianness, Endianness::Little);
        assert_eq!(
            overriding.endpoint(),
            EndpointDescriptor::new(Ipv4Addr::new(239, 1, 1, 1), 30000)
        );

        let defaults = SessionConfig::default().attachment_override;
        assert!(!defaults.enabled);
        assert_eq!(defaults.endpoint().socket_addr().to_string(), "127.0.0.1:29495");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            SessionConfig::from_yaml_str("pkts_per_socket_read: 0"),
            Err(SddsError::Config { field, .. }) if field == "pkts_per_socket_read"
        ));
        assert!(matches!(
            SessionConfig::from_yaml_str("buffer_size: 10\npkts_per_socket_read: 20"),
            Err(SddsError::Config { field, .. }) if field == "buffer_size"
        ));
        assert!(SessionConfig::from_yaml_str("sdds_pkts_per_bulkio_push: 0").is_err());
        assert!(SessionConfig::from_yaml_str("endianness: \"9999\"").is_err());
        assert!(SessionConfig::from_yaml_str("no_such_setting: 1").is_err());
    }

    #[test]
    fn locked_difference_names_the_field() {
        let base = SessionConfig::default();
        assert_eq!(base.locked_difference(&base.clone()), None);

        let changed = SessionConfig { wait_on_ttv: true, ..base.clone() };
        assert_eq!(base.locked_difference(&changed), Some("wait_on_ttv"));
    }
}
