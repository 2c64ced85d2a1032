//! Stream routing information (SRI) attached to output pushes.

use serde::{Deserialize, Serialize};

use super::Endianness;

/// Keyword id carrying the payload byte order.
pub const DATA_REF_KEYWORD: &str = "dataRef";

/// Value of an SRI keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeywordValue {
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: String,
    pub value: KeywordValue,
}

impl Keyword {
    pub fn new(id: impl Into<String>, value: KeywordValue) -> Self {
        Self { id: id.into(), value }
    }
}

/// Stream metadata describing how to interpret a sample stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sri {
    #[serde(rename = "streamID")]
    pub stream_id: String,
    pub xstart: f64,
    /// Seconds between samples.
    pub xdelta: f64,
    pub xunits: i16,
    pub subsize: i32,
    pub ystart: f64,
    pub ydelta: f64,
    pub yunits: i16,
    /// 0 for real samples, 1 for complex.
    pub mode: i16,
    pub blocking: bool,
    pub keywords: Vec<Keyword>,
}

impl Default for Sri {
    fn default() -> Self {
        Self {
            stream_id: String::new(),
            xstart: 0.0,
            xdelta: 1.0,
            xunits: 1,
            subsize: 0,
            ystart: 0.0,
            ydelta: 0.0,
            yunits: 0,
            mode: 0,
            blocking: false,
            keywords: Vec::new(),
        }
    }
}

impl Sri {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self { stream_id: stream_id.into(), ..Self::default() }
    }

    pub fn keyword(&self, id: &str) -> Option<&KeywordValue> {
        self.keywords.iter().find(|k| k.id == id).map(|k| &k.value)
    }

    /// Payload byte order announced through the `dataRef` keyword, if any.
    pub fn data_ref(&self) -> Option<Endianness> {
        match self.keyword(DATA_REF_KEYWORD)? {
            KeywordValue::Long(v) => Endianness::from_data_ref(*v),
            KeywordValue::Double(v) => Endianness::from_data_ref(*v as i64),
            _ => None,
        }
    }

    pub fn is_complex(&self) -> bool {
        self.mode == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_ref_keyword_selects_endianness() {
        let mut sri = Sri::new("s");
        assert_eq!(sri.data_ref(), None);

        sri.keywords.push(Keyword::new(DATA_REF_KEYWORD, KeywordValue::Long(4660)));
        assert_eq!(sri.data_ref(), Some(Endianness::Little));

        sri.keywords[0].value = KeywordValue::Long(17185);
        assert_eq!(sri.data_ref(), Some(Endianness::Big));

        sri.keywords[0].value = KeywordValue::String("little".into());
        assert_eq!(sri.data_ref(), None);
    }

    #[test]
    fn sri_loads_from_yaml_with_defaults() {
        let yaml = r#"
streamID: radar-1
keywords:
  - id: COL_RF
    value: 155500000.0
  - id: dataRef
    value: 4660
"#;
        let sri: Sri = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(sri.stream_id, "radar-1");
        assert_eq!(sri.xunits, 1);
        assert_eq!(sri.keyword("COL_RF"), Some(&KeywordValue::Double(155_500_000.0)));
        assert_eq!(sri.data_ref(), Some(Endianness::Little));
    }
}
