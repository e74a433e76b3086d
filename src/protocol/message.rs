//! Bus message and its three-part envelope
//!
//! Envelope layout, one part each:
//! 1. channel, raw UTF-8 bytes (the broker filters on this part)
//! 2. timestamp, MessagePack float64 seconds since the Unix epoch
//! 3. payload, any MessagePack value
//!
//! The payload is schemaless at this layer. It is carried as a
//! `serde_json::Value`, so maps need string keys.

use crate::error::{BusError, Result};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of parts in an envelope
pub const ENVELOPE_PARTS: usize = 3;

/// Seconds since the Unix epoch
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One message on the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: String,
    pub timestamp: f64,
    pub payload: Value,
}

impl Message {
    /// Message stamped with the current time
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self::with_timestamp(channel, now(), payload)
    }

    pub fn with_timestamp(channel: impl Into<String>, timestamp: f64, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            timestamp,
            payload,
        }
    }

    /// Serialize into the three envelope parts
    pub fn to_parts(&self) -> Result<[Vec<u8>; ENVELOPE_PARTS]> {
        Ok([
            self.channel.as_bytes().to_vec(),
            rmp_serde::to_vec(&self.timestamp)?,
            rmp_serde::to_vec(&self.payload)?,
        ])
    }

    /// Rebuild a message from envelope parts
    pub fn from_parts<P: AsRef<[u8]>>(parts: &[P]) -> Result<Self> {
        let [channel, timestamp, payload] = parts else {
            return Err(BusError::MalformedFrame(format!(
                "envelope has {} parts, expected {}",
                parts.len(),
                ENVELOPE_PARTS
            )));
        };

        let channel = std::str::from_utf8(channel.as_ref())
            .map_err(|_| BusError::MalformedFrame("channel is not valid UTF-8".to_string()))?;

        Ok(Self {
            channel: channel.to_string(),
            timestamp: rmp_serde::from_slice(timestamp.as_ref())?,
            payload: rmp_serde::from_slice(payload.as_ref())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_parts() {
        let msg = Message::with_timestamp("CAN/Parsley", 1.5, json!({"a": [1, 2.5, null]}));
        let parts = msg.to_parts().unwrap();

        assert_eq!(parts[0], b"CAN/Parsley");
        // float64 marker followed by the IEEE bits
        assert_eq!(parts[1][0], 0xcb);
        assert_eq!(&parts[1][1..], &1.5f64.to_be_bytes());

        assert_eq!(Message::from_parts(&parts).unwrap(), msg);
    }

    #[test]
    fn test_nested_payload_survives() {
        let payload = json!({
            "board": "VENT",
            "data": {"time": 12, "values": [-1, 0, 1], "label": "ok"},
            "flag": true,
            "none": null
        });
        let msg = Message::with_timestamp("", 0.0, payload.clone());
        let back = Message::from_parts(&msg.to_parts().unwrap()).unwrap();
        assert_eq!(back.payload, payload);
    }

    #[test]
    fn test_wrong_part_count() {
        let parts: Vec<Vec<u8>> = vec![b"chan".to_vec()];
        assert!(matches!(
            Message::from_parts(&parts),
            Err(BusError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_bad_channel_and_payload() {
        let good = Message::with_timestamp("x", 1.0, json!(1)).to_parts().unwrap();

        let bad_channel = [vec![0xff, 0xfe], good[1].clone(), good[2].clone()];
        assert!(matches!(
            Message::from_parts(&bad_channel),
            Err(BusError::MalformedFrame(_))
        ));

        let bad_payload = [good[0].clone(), good[1].clone(), vec![0xc1]];
        assert!(matches!(
            Message::from_parts(&bad_payload),
            Err(BusError::Serialization(_))
        ));
    }
}
