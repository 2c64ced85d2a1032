//! Merging externally supplied SRI with what each packet says about itself.
//!
//! Packet-derived fields always win: `mode` follows the complex bit and
//! `xdelta` follows the frequency field. Everything else comes from the
//! external SRI when one has been pushed, otherwise from defaults keyed on
//! the attachment's stream id.

use std::sync::Arc;
use tracing::debug;

use crate::types::{SddsHeader, Sri};

/// Merge one packet's header into the external (or default) SRI.
pub fn merge_sri(external: Option<&Sri>, header: &SddsHeader, default_stream_id: &str) -> Sri {
    let mut sri = match external {
        Some(external) => external.clone(),
        None => Sri::new(default_stream_id),
    };

    sri.mode = i16::from(header.is_complex());
    let freq_hz = header.freq_hz();
    if freq_hz > 0.0 {
        sri.xdelta = 1.0 / freq_hz;
    }
    sri
}

/// Tracks the last SRI handed downstream and reports changes.
#[derive(Debug, Clone)]
pub struct SriMerger {
    default_stream_id: String,
    current: Option<Arc<Sri>>,
}

impl SriMerger {
    pub fn new(default_stream_id: impl Into<String>) -> Self {
        Self { default_stream_id: default_stream_id.into(), current: None }
    }

    /// Merge for one frame. The flag is true when the result differs from the
    /// previously returned SRI or none was returned since the last invalidate.
    pub fn merge(&mut self, external: Option<&Sri>, header: &SddsHeader) -> (Arc<Sri>, bool) {
        let merged = merge_sri(external, header, &self.default_stream_id);

        if let Some(current) = &self.current {
            if **current == merged {
                return (current.clone(), false);
            }
        }

        debug!(
            stream_id = %merged.stream_id,
            xdelta = merged.xdelta,
            mode = merged.mode,
            "SRI changed"
        );
        let merged = Arc::new(merged);
        self.current = Some(merged.clone());
        (merged, true)
    }

    /// Last merged SRI, or the defaults if no frame has been merged yet.
    pub fn current(&self) -> Arc<Sri> {
        self.current.clone().unwrap_or_else(|| Arc::new(Sri::new(self.default_stream_id.as_str())))
    }

    /// Force the next merge to report a change.
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    pub fn default_stream_id(&self) -> &str {
        &self.default_stream_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketCodec;
    use crate::test_utils::PacketBuilder;
    use crate::types::{Keyword, KeywordValue};

    fn header(builder: PacketBuilder) -> SddsHeader {
        PacketCodec::decode_header(&builder.build()).unwrap()
    }

    #[test]
    fn defaults_use_attach_id_and_packet_fields() {
        let sri = merge_sri(
            None,
            &header(PacketBuilder::new().sample_rate_hz(5e6).complex(true)),
            "attach-1",
        );
        assert_eq!(sri.stream_id, "attach-1");
        assert_eq!(sri.xunits, 1);
        assert_eq!(sri.mode, 1);
        assert!((sri.xdelta - 2e-7).abs() < 1e-15);
        assert!(sri.keywords.is_empty());
    }

    #[test]
    fn external_fields_survive_except_packet_owned_ones() {
        let mut external = Sri::new("upstream");
        external.xdelta = 0.5;
        external.mode = 1;
        external.subsize = 64;
        external.blocking = true;
        external.keywords.push(Keyword::new("COL_RF", KeywordValue::Double(1.5e9)));

        let sri = merge_sri(
            Some(&external),
            &header(PacketBuilder::new().sample_rate_hz(1e6)),
            "attach-1",
        );
        assert_eq!(sri.stream_id, "upstream");
        assert_eq!(sri.subsize, 64);
        assert!(sri.blocking);
        assert_eq!(sri.keywords, external.keywords);
        assert_eq!(sri.mode, 0);
        assert!((sri.xdelta - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn zero_frequency_keeps_external_xdelta() {
        let mut external = Sri::new("upstream");
        external.xdelta = 0.25;
        let sri = merge_sri(Some(&external), &header(PacketBuilder::new().frequency_field(0)), "a");
        assert_eq!(sri.xdelta, 0.25);
    }

    #[test]
    fn merger_reports_changes_only() {
        let mut merger = SriMerger::new("attach-1");
        let slow = header(PacketBuilder::new().sample_rate_hz(1e6));
        let fast = header(PacketBuilder::new().sample_rate_hz(2e6));

        assert!(merger.merge(None, &slow).1);
        assert!(!merger.merge(None, &slow).1);
        assert!(merger.merge(None, &fast).1);

        let external = Sri::new("renamed");
        let (sri, changed) = merger.merge(Some(&external), &fast);
        assert!(changed);
        assert_eq!(sri.stream_id, "renamed");

        merger.invalidate();
        assert!(merger.merge(Some(&external), &fast).1);
    }
}
