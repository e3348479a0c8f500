// WebSocket message types for the sessionroom collaboration protocol.
//
// Frames are JSON text messages tagged by `type`. Document payloads
// (`sync-init`, `yjs-update`) carry opaque Yjs bytes as JSON number
// arrays, matching what editor clients put on the wire.

use serde::{Deserialize, Serialize};

/// A connected editor's display identity and assigned cursor color.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Presence {
    pub email: String,
    pub name: String,
    pub color: String,
}

/// All message types in the sessionroom WebSocket protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WsMessage {
    /// Server -> Client, on join: full document snapshot.
    SyncInit { data: Vec<u8> },

    /// Server -> Client, on join: everyone currently in the room,
    /// including the recipient.
    PresenceInit { users: Vec<Presence> },

    /// Server -> Client: a new editor joined.
    PresenceJoin { user: Presence },

    /// Server -> Client: an editor left.
    PresenceLeave { user: Presence },

    /// Bidirectional: one incremental Yjs update. The server relays the
    /// sender's frame byte-for-byte to everyone else.
    YjsUpdate { data: Vec<u8> },

    /// Client -> Server: cursor position (opaque to the server).
    /// Server -> others: the same payload wrapped with the sender's
    /// presence, so `user` is only present on relayed frames.
    CursorUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<Presence>,
        cursor: serde_json::Value,
    },

    /// Bidirectional: editor awareness state (selections, focus).
    /// Relayed verbatim and never persisted; the payload shape is
    /// whatever the client library emits.
    AwarenessUpdate {
        #[serde(flatten)]
        payload: serde_json::Value,
    },
}

/// Error decoding an inbound frame. The room drops the frame and keeps
/// the connection open; there is no error-reply channel.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn decode_frame(raw: &str) -> Result<WsMessage, ProtocolError> {
    Ok(serde_json::from_str::<WsMessage>(raw)?)
}

pub fn encode_frame(message: &WsMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yjs_update_bytes_round_trip_as_number_arrays() {
        let encoded = encode_frame(&WsMessage::YjsUpdate { data: vec![1, 2, 255] })
            .expect("frame should encode");
        assert_eq!(encoded, r#"{"type":"yjs-update","data":[1,2,255]}"#);
        let decoded = decode_frame(&encoded).expect("frame should decode");
        assert_eq!(decoded, WsMessage::YjsUpdate { data: vec![1, 2, 255] });
    }

    #[test]
    fn cursor_update_omits_user_until_relayed() {
        let inbound = WsMessage::CursorUpdate {
            user: None,
            cursor: serde_json::json!({ "anchor": 3 }),
        };
        let encoded = encode_frame(&inbound).expect("frame should encode");
        assert!(!encoded.contains("user"));
    }

    #[test]
    fn awareness_update_preserves_unknown_payload_fields() {
        let raw = r#"{"type":"awareness-update","states":{"12":{"cursor":null}}}"#;
        let decoded = decode_frame(raw).expect("frame should decode");
        let WsMessage::AwarenessUpdate { payload } = &decoded else {
            panic!("expected awareness-update, got {decoded:?}");
        };
        assert!(payload.get("states").is_some());
    }

    #[test]
    fn unknown_type_is_a_malformed_frame() {
        assert!(decode_frame(r#"{"type":"shutdown-now"}"#).is_err());
        assert!(decode_frame("not json at all").is_err());
    }
}
