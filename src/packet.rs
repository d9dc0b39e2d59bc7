//! Packet records and the single coercion boundary for untyped input.
//!
//! Everything that enters the pipeline, whether a JSON object from an HTTP
//! handler or a delimited line from a capture process, is turned into a
//! [`PacketRecord`] here. Downstream code never sees missing fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const NOT_AVAILABLE: &str = "N/A";

/// Number of fields a capture line must carry.
pub const CAPTURE_FIELDS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Capture time, seconds since the epoch.
    pub timestamp: f64,
    pub source: String,
    pub destination: String,
    /// Raw protocol indicator as emitted by the capture process
    /// (`6`, `17,1`, `TCP`, ...). Resolved at extraction time.
    pub protocol: String,
    pub length: u64,
    pub info: String,
}

impl Default for PacketRecord {
    fn default() -> Self {
        PacketRecord {
            timestamp: 0.0,
            source: NOT_AVAILABLE.to_string(),
            destination: NOT_AVAILABLE.to_string(),
            protocol: NOT_AVAILABLE.to_string(),
            length: 0,
            info: NOT_AVAILABLE.to_string(),
        }
    }
}

impl PacketRecord {
    pub fn new(
        timestamp: f64,
        source: &str,
        destination: &str,
        protocol: &str,
        length: u64,
        info: &str,
    ) -> Self {
        PacketRecord {
            timestamp,
            source: source.to_string(),
            destination: destination.to_string(),
            protocol: protocol.to_string(),
            length,
            info: info.to_string(),
        }
    }

    /// Builds a record from an untyped field mapping.
    ///
    /// Keys are matched ignoring ASCII case, so both `time` and `Time` work.
    /// Never fails: a missing or unparsable timestamp becomes `0.0`, a
    /// missing, negative or unparsable length becomes `0`, and missing text
    /// fields become `"N/A"`.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let lookup = |names: &[&str]| -> Option<&Value> {
            fields
                .iter()
                .find(|(key, _)| names.iter().any(|n| key.eq_ignore_ascii_case(n)))
                .map(|(_, value)| value)
        };

        PacketRecord {
            timestamp: lookup(&["time", "timestamp"])
                .and_then(value_as_f64)
                .filter(|t| t.is_finite())
                .unwrap_or(0.0),
            source: lookup(&["source", "src"])
                .map(value_as_text)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            destination: lookup(&["destination", "dst"])
                .map(value_as_text)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            protocol: lookup(&["protocol"])
                .map(value_as_text)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            length: lookup(&["length", "len"])
                .and_then(value_as_f64)
                .map(coerce_length)
                .unwrap_or(0),
            info: lookup(&["info"])
                .map(value_as_text)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        }
    }

    /// Builds a record from the six positional fields of a capture line:
    /// epoch time, source, destination, protocol, length, info.
    ///
    /// Returns `None` for lines that are not well formed: fewer than six
    /// fields or a timestamp that does not parse. Extra fields are assumed to
    /// be part of an info column that contained the delimiter.
    pub fn from_capture_fields<'a, I>(fields: I, delimiter: char) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let parts: Vec<&str> = fields.into_iter().collect();
        if parts.len() < CAPTURE_FIELDS {
            return None;
        }

        let timestamp: f64 = parts[0].trim().parse().ok()?;
        if !timestamp.is_finite() {
            return None;
        }

        let text = |s: &str| {
            let s = s.trim();
            if s.is_empty() {
                NOT_AVAILABLE.to_string()
            } else {
                s.to_string()
            }
        };

        let info = parts[5..].join(&delimiter.to_string());

        Some(PacketRecord {
            timestamp,
            source: text(parts[1]),
            destination: text(parts[2]),
            protocol: text(parts[3]),
            length: parts[4]
                .trim()
                .parse::<f64>()
                .map(coerce_length)
                .unwrap_or(0),
            info: text(&info),
        })
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) if s.trim().is_empty() => NOT_AVAILABLE.to_string(),
        Value::String(s) => s.trim().to_string(),
        Value::Null => NOT_AVAILABLE.to_string(),
        other => other.to_string(),
    }
}

fn coerce_length(raw: f64) -> u64 {
    if raw.is_finite() && raw > 0.0 {
        raw as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected a JSON object"),
        }
    }

    #[test]
    fn test_from_fields_accepts_any_key_case() {
        let record = PacketRecord::from_fields(&fields(json!({
            "Time": 1700000000.25,
            "Source": "10.0.0.1",
            "Destination": "10.0.0.2",
            "Protocol": "6",
            "Length": 60,
            "Info": "443 > 51000 [SYN] Seq=0"
        })));

        assert_eq!(record.timestamp, 1700000000.25);
        assert_eq!(record.source, "10.0.0.1");
        assert_eq!(record.destination, "10.0.0.2");
        assert_eq!(record.protocol, "6");
        assert_eq!(record.length, 60);
        assert!(record.info.contains("[SYN]"));
    }

    #[test]
    fn test_from_fields_coerces_bad_values() {
        let record = PacketRecord::from_fields(&fields(json!({
            "time": "not a time",
            "length": "abc",
            "protocol": 17
        })));

        assert_eq!(record.timestamp, 0.0);
        assert_eq!(record.length, 0);
        assert_eq!(record.protocol, "17");
        assert_eq!(record.source, "N/A");
        assert_eq!(record.info, "N/A");
    }

    #[test]
    fn test_negative_length_becomes_zero() {
        let record = PacketRecord::from_fields(&fields(json!({ "length": -40 })));
        assert_eq!(record.length, 0);

        let record = PacketRecord::from_fields(&fields(json!({ "length": "1514" })));
        assert_eq!(record.length, 1514);
    }

    #[test]
    fn test_capture_line_with_six_fields() {
        let line = "1700000000.5\t192.168.1.10\t192.168.1.1\t17\t512\tSource port: 5000";
        let record = PacketRecord::from_capture_fields(line.split('\t'), '\t').unwrap();

        assert_eq!(record.timestamp, 1700000000.5);
        assert_eq!(record.protocol, "17");
        assert_eq!(record.length, 512);
        assert_eq!(record.info, "Source port: 5000");
    }

    #[test]
    fn test_capture_line_rejoins_extra_fields_into_info() {
        let line = "1.0|a|b|1|98|Echo (ping) request|id=0x0001";
        let record = PacketRecord::from_capture_fields(line.split('|'), '|').unwrap();
        assert_eq!(record.info, "Echo (ping) request|id=0x0001");
    }

    #[test]
    fn test_malformed_capture_lines_are_rejected() {
        assert!(PacketRecord::from_capture_fields("1.0\ta\tb\t6\t60".split('\t'), '\t').is_none());
        assert!(PacketRecord::from_capture_fields("x\ta\tb\t6\t60\tinfo".split('\t'), '\t').is_none());
    }

    #[test]
    fn test_empty_capture_fields_default_to_na() {
        let record = PacketRecord::from_capture_fields("2.0\t\t\t\t\t".split('\t'), '\t').unwrap();
        assert_eq!(record.source, "N/A");
        assert_eq!(record.protocol, "N/A");
        assert_eq!(record.length, 0);
        assert_eq!(record.info, "N/A");
    }
}
