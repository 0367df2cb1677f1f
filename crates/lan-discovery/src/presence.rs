//! Presence announcements broadcast by every node.
//!
//! Wire format (UTF-8 JSON in a single datagram):
//! `{"type":"discovery","service":"lanchat","peer_id":"peer_1234","timestamp":1700000000}`
//!
//! `timestamp` is Unix seconds at send time. It is informational only;
//! liveness is always judged by the receiver's own clock.

use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Value of the `type` field on every presence message.
pub const DISCOVERY_MARKER: &str = "discovery";

/// A node's "I am here" broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMessage {
    /// Always "discovery"
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Application tag, so unrelated broadcasts on the same port are ignored
    pub service: String,

    pub peer_id: PeerId,

    pub timestamp: u64,
}

impl PresenceMessage {
    /// Create an announcement for `peer_id`, stamped with the current time.
    pub fn new(service: &str, peer_id: &PeerId) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            msg_type: DISCOVERY_MARKER.to_string(),
            service: service.to_string(),
            peer_id: peer_id.clone(),
            timestamp,
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("PresenceMessage serialization should not fail")
    }

    /// Try to parse an announcement for `service`.
    ///
    /// Returns `None` for non-JSON input, missing fields, an empty peer ID,
    /// or a `type`/`service` that doesn't match.
    pub fn parse(data: &[u8], service: &str) -> Option<Self> {
        let msg: Self = serde_json::from_slice(data).ok()?;
        if msg.msg_type == DISCOVERY_MARKER && msg.service == service {
            Some(msg)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let msg = PresenceMessage::new("lanchat", &PeerId::new("peer_1"));
        let value: serde_json::Value = serde_json::from_slice(&msg.to_json()).unwrap();

        assert_eq!(value["type"], "discovery");
        assert_eq!(value["service"], "lanchat");
        assert_eq!(value["peer_id"], "peer_1");
        assert!(value["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_parse_own_output() {
        let msg = PresenceMessage::new("lanchat", &PeerId::new("peer_1"));
        let parsed = PresenceMessage::parse(&msg.to_json(), "lanchat").unwrap();
        assert_eq!(parsed.peer_id, PeerId::new("peer_1"));
    }

    #[test]
    fn test_parse_accepts_foreign_implementation() {
        // Field order and extra fields don't matter
        let data = br#"{"timestamp":5,"peer_id":"peer_9","extra":true,"service":"lanchat","type":"discovery"}"#;
        let parsed = PresenceMessage::parse(data, "lanchat").unwrap();
        assert_eq!(parsed.peer_id.as_str(), "peer_9");
        assert_eq!(parsed.timestamp, 5);
    }

    #[test]
    fn test_parse_rejects_wrong_type() {
        let data = br#"{"type":"gossip","service":"lanchat","peer_id":"peer_1","timestamp":1}"#;
        assert!(PresenceMessage::parse(data, "lanchat").is_none());
    }

    #[test]
    fn test_parse_rejects_wrong_service() {
        let data = br#"{"type":"discovery","service":"other","peer_id":"peer_1","timestamp":1}"#;
        assert!(PresenceMessage::parse(data, "lanchat").is_none());
    }

    #[test]
    fn test_parse_rejects_missing_peer_id() {
        let data = br#"{"type":"discovery","service":"lanchat","timestamp":1}"#;
        assert!(PresenceMessage::parse(data, "lanchat").is_none());
    }

    #[test]
    fn test_parse_rejects_empty_peer_id() {
        let data = br#"{"type":"discovery","service":"lanchat","peer_id":"","timestamp":1}"#;
        assert!(PresenceMessage::parse(data, "lanchat").is_none());
    }

    #[test]
    fn test_parse_rejects_legacy_colon_format() {
        assert!(PresenceMessage::parse(b"DISCOVER:peer_1:2024-01-01 10:00:00", "lanchat").is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PresenceMessage::parse(&[0xff, 0x00, 0x7b], "lanchat").is_none());
        assert!(PresenceMessage::parse(b"", "lanchat").is_none());
    }
}
