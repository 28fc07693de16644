//! Newline-delimited JSON frame codec (Serial and TCP endpoints)
//!
//! One JSON object per line:
//! `{"sensor_id":1,"sensor_name":"T1","value":45.5,"timestamp":"2025-01-15T12:00:00","status":"OK","unit":"°C"}`
//!
//! Only `sensor_id` and `value` are required. The wire `status` is ignored;
//! status is always recomputed from the value and the current limits.

use bytes::BytesMut;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio_util::codec::Decoder;

use crate::error::{Result, SensorSrvError};

/// Longest accepted line; longer input is discarded up to the next newline
pub const MAX_FRAME_LENGTH: usize = 8 * 1024;

/// A decoded frame before classification
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub sensor_id: u32,
    /// Empty when the device did not send one
    pub sensor_name: String,
    pub value: f64,
    /// Empty when the device did not send one
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

/// Decoder output: a malformed line is an item, not a stream error
#[derive(Debug, Clone, PartialEq)]
pub enum FrameItem {
    Reading(RawReading),
    Malformed(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u32),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    sensor_id: WireId,
    value: f64,
    #[serde(default)]
    sensor_name: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    unit: Option<String>,
}

/// Splits a byte stream on `\n` and decodes each line as a reading
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_length: usize,
    // Resume offset for the newline scan
    next_index: usize,
    discarding: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    /// Decode one line (without its terminator)
    pub fn parse_line(line: &[u8]) -> Result<RawReading> {
        let frame: WireFrame = serde_json::from_slice(line)?;

        let sensor_id = match frame.sensor_id {
            WireId::Number(id) => id,
            WireId::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| SensorSrvError::decode(format!("Invalid sensor_id: {text:?}")))?,
        };

        if !frame.value.is_finite() {
            return Err(SensorSrvError::decode(format!(
                "Sensor {sensor_id}: non-finite value"
            )));
        }

        let timestamp = frame
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        Ok(RawReading {
            sensor_id,
            sensor_name: frame.sensor_name.unwrap_or_default(),
            value: frame.value,
            unit: frame.unit.unwrap_or_default(),
            timestamp,
        })
    }

    fn line_item(line: &[u8]) -> Option<FrameItem> {
        let line = trim_ascii(line);
        if line.is_empty() {
            return None;
        }
        Some(match Self::parse_line(line) {
            Ok(reading) => FrameItem::Reading(reading),
            Err(e) => FrameItem::Malformed(e.to_string()),
        })
    }
}

impl Decoder for FrameCodec {
    type Item = FrameItem;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<FrameItem>, Self::Error> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match newline {
                Some(end) => {
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    if self.discarding {
                        self.discarding = false;
                        return Ok(Some(FrameItem::Malformed(format!(
                            "Frame exceeds {} bytes",
                            self.max_length
                        ))));
                    }
                    match Self::line_item(&line[..end]) {
                        Some(item) => return Ok(Some(item)),
                        // Blank line
                        None => continue,
                    }
                },
                None if buf.len() > self.max_length => {
                    buf.clear();
                    self.next_index = 0;
                    self.discarding = true;
                    return Ok(None);
                },
                None => {
                    self.next_index = buf.len();
                    return Ok(None);
                },
            }
        }
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<FrameItem>, Self::Error> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }
        self.next_index = 0;
        if buf.is_empty() || self.discarding {
            buf.clear();
            self.discarding = false;
            return Ok(None);
        }
        // Unterminated trailing line
        let rest = buf.split_to(buf.len());
        Ok(Self::line_item(&rest))
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// RFC 3339, or naive ISO-8601 taken as local time
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn decode_all(codec: &mut FrameCodec, input: &[u8]) -> Vec<FrameItem> {
        let mut buf = BytesMut::from(input);
        let mut items = Vec::new();
        while let Some(item) = codec.decode(&mut buf).unwrap() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_full_frame() {
        let line = r#"{"sensor_id":1,"sensor_name":"Temperature Sensor 1","value":45.5,"timestamp":"2025-01-15T12:00:00Z","status":"OK","unit":"°C"}"#;
        let reading = FrameCodec::parse_line(line.as_bytes()).unwrap();
        assert_eq!(reading.sensor_id, 1);
        assert_eq!(reading.sensor_name, "Temperature Sensor 1");
        assert_eq!(reading.value, 45.5);
        assert_eq!(reading.unit, "°C");
        assert_eq!(reading.timestamp.to_rfc3339(), "2025-01-15T12:00:00+00:00");
    }

    #[test]
    fn test_optional_fields_default() {
        let before = Utc::now();
        let reading = FrameCodec::parse_line(br#"{"sensor_id":"7","value":-3}"#).unwrap();
        assert_eq!(reading.sensor_id, 7);
        assert_eq!(reading.value, -3.0);
        assert!(reading.sensor_name.is_empty());
        assert!(reading.unit.is_empty());
        assert!(reading.timestamp >= before);
    }

    #[test]
    fn test_naive_timestamp_is_local_time() {
        let reading =
            FrameCodec::parse_line(br#"{"sensor_id":1,"value":1.0,"timestamp":"2025-01-15T12:00:00.250"}"#)
                .unwrap();
        let naive =
            NaiveDateTime::parse_from_str("2025-01-15T12:00:00.250", "%Y-%m-%dT%H:%M:%S%.f").unwrap();
        let expected = Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(reading.timestamp, expected);
    }

    #[test]
    fn test_bad_timestamp_falls_back_to_capture_time() {
        let before = Utc::now();
        let reading =
            FrameCodec::parse_line(br#"{"sensor_id":1,"value":1.0,"timestamp":"yesterday"}"#).unwrap();
        assert!(reading.timestamp >= before);
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        assert!(FrameCodec::parse_line(br#"{"value":1.0}"#).is_err());
        assert!(FrameCodec::parse_line(br#"{"sensor_id":1}"#).is_err());
        assert!(FrameCodec::parse_line(br#"{"sensor_id":"abc","value":1.0}"#).is_err());
        assert!(FrameCodec::parse_line(b"not json").is_err());
    }

    #[test]
    fn test_decoder_splits_lines_and_keeps_partial() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(
            &b"{\"sensor_id\":1,\"value\":1.5}\r\n\n{\"sensor_id\":2,\"value\":2.5}\n{\"sensor_id\":3,"[..],
        );

        let mut ids = Vec::new();
        while let Some(item) = codec.decode(&mut buf).unwrap() {
            match item {
                FrameItem::Reading(r) => ids.push(r.sensor_id),
                FrameItem::Malformed(e) => panic!("unexpected malformed frame: {e}"),
            }
        }
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(&buf[..], b"{\"sensor_id\":3,");

        buf.extend_from_slice(b"\"value\":3.5}\n");
        match codec.decode(&mut buf).unwrap() {
            Some(FrameItem::Reading(r)) => assert_eq!(r.value, 3.5),
            other => panic!("expected reading, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_line_does_not_stop_decoding() {
        let mut codec = FrameCodec::new();
        let items = decode_all(
            &mut codec,
            b"{broken\n{\"sensor_id\":4,\"value\":40.0}\n",
        );
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], FrameItem::Malformed(_)));
        assert!(matches!(&items[1], FrameItem::Reading(r) if r.sensor_id == 4));
    }

    #[test]
    fn test_overlong_line_is_discarded() {
        let mut codec = FrameCodec::with_max_length(16);
        let mut buf = BytesMut::from(&b"0123456789abcdefXYZ"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"tail\n{\"sensor_id\":1,\"value\":0}\n");
        let first = codec.decode(&mut buf).unwrap();
        assert!(matches!(first, Some(FrameItem::Malformed(ref m)) if m.contains("exceeds")));
        let second = codec.decode(&mut buf).unwrap();
        assert!(matches!(second, Some(FrameItem::Reading(_))));
    }

    #[test]
    fn test_decode_eof_flushes_trailing_line() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"{\"sensor_id\":9,\"value\":9.0}"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        let item = codec.decode_eof(&mut buf).unwrap();
        assert!(matches!(item, Some(FrameItem::Reading(ref r)) if r.sensor_id == 9));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
