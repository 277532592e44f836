use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag set attached to a measurement. Ordered so equal sets compare and hash equal.
pub type Tags = BTreeMap<String, String>;

/// A grouped, tagged and timestamped set of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Measurement name (e.g. "interfaces", "ifcounters").
    pub name: String,

    /// Tags identifying the series (host, interface name, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,

    /// Field values keyed by field name.
    pub fields: BTreeMap<String, FieldValue>,

    /// Unix epoch nanoseconds.
    pub timestamp: i64,
}

impl Measurement {
    /// Create an empty measurement.
    pub fn new(name: impl Into<String>, tags: Tags, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            tags,
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    /// Add a field, replacing any previous value under the same key.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Device the measurement was collected from, if tagged.
    pub fn host(&self) -> Option<&str> {
        self.tags.get("host").map(String::as_str)
    }

    /// Render as an InfluxDB line protocol record.
    ///
    /// Returns `None` when the measurement carries no fields, which line
    /// protocol cannot express.
    pub fn to_line_protocol(&self) -> Option<String> {
        if self.fields.is_empty() {
            return None;
        }

        let mut line = escape_measurement(&self.name);
        for (key, value) in &self.tags {
            // Empty tag values are not allowed by the format.
            if value.is_empty() {
                continue;
            }
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape_key(key), value.to_line_protocol()))
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));
        line.push(' ');
        line.push_str(&self.timestamp.to_string());

        Some(line)
    }
}

/// A single decoded field value.
///
/// Serialized adjacently tagged (`{"type": "uint", "value": 10}`) so the
/// integer kind survives a round trip through a published payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl FieldValue {
    fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => format!("{}i", i),
            FieldValue::Uint(u) => format!("{}u", u),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::String(s) => format!("\"{}\"", escape_string(s)),
            FieldValue::Bytes(b) => format!("\"{}\"", escape_string(&String::from_utf8_lossy(b))),
        }
    }
}

/// Textual form used when a value is copied into a tag.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Uint(u) => write!(f, "{}", u),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Bytes(b) => write!(f, "{:?}", b),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Uint(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_builder() {
        let m = Measurement::new("interfaces", Tags::new(), 1_000)
            .with_tag("host", "leaf1.example.com")
            .with_field("in_octets", 42u64);

        assert_eq!(m.host(), Some("leaf1.example.com"));
        assert_eq!(m.fields.get("in_octets"), Some(&FieldValue::Uint(42)));
    }

    #[test]
    fn test_line_protocol() {
        let m = Measurement::new("if counters", Tags::new(), 1_700_000_000_000_000_000)
            .with_tag("host", "leaf1")
            .with_tag("name", "Ethernet1")
            .with_tag("empty", "")
            .with_field("in_octets", 42u64)
            .with_field("oper_status", "UP")
            .with_field("mtu", -1i64)
            .with_field("enabled", true);

        assert_eq!(
            m.to_line_protocol().unwrap(),
            "if\\ counters,host=leaf1,name=Ethernet1 enabled=true,in_octets=42u,mtu=-1i,oper_status=\"UP\" 1700000000000000000"
        );
    }

    #[test]
    fn test_line_protocol_without_fields() {
        let m = Measurement::new("empty", Tags::new(), 0);
        assert!(m.to_line_protocol().is_none());
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::from("Ethernet1").to_string(), "Ethernet1");
        assert_eq!(FieldValue::from(12.5).to_string(), "12.5");
        assert_eq!(FieldValue::from(7u64).to_string(), "7");
        assert_eq!(FieldValue::from(false).to_string(), "false");
    }

    #[test]
    fn test_field_value_keeps_integer_kind() {
        let json = serde_json::to_value(FieldValue::Uint(10)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "uint", "value": 10}));

        let back: FieldValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, FieldValue::Uint(10));

        let back: FieldValue =
            serde_json::from_value(serde_json::json!({"type": "int", "value": 10})).unwrap();
        assert_eq!(back, FieldValue::Int(10));
    }
}
