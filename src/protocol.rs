//! # Wire Protocol
//!
//! The messages both binaries exchange over one WebSocket connection.
//!
//! - **Client → Server**: binary frames carrying raw 16-bit LE PCM, no
//!   header; frame boundaries need not align with window boundaries. The
//!   only accepted text frame is the `stop` control message.
//! - **Server → Client**: JSON text frames, tagged with a `type` field.
//!
//! Both sides share these types so the contract cannot drift between the
//! binaries.

use serde::{Deserialize, Serialize};

/// JSON messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Handshake confirmation once the session is registered
    #[serde(rename = "session_started")]
    SessionStarted {
        /// Identifier assigned to this connection
        session_id: String,
    },

    /// One classification outcome for one complete window
    #[serde(rename = "result")]
    Result {
        /// Predicted keyword label
        detected: String,
        /// Model score for the predicted label (0.0 to 1.0)
        confidence: f32,
        /// Measured inference latency in milliseconds
        inference_ms: u64,
        /// Position of the window in this session's stream, starting at 0
        window_index: u64,
    },

    /// Session-level problem report; the session usually closes after this
    #[serde(rename = "error")]
    Error {
        /// Human-readable description
        message: String,
    },
}

/// JSON messages accepted from the client.
///
/// Audio itself always travels as binary frames; this covers the one
/// control message the server understands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Ask the server to close the session politely
    #[serde(rename = "stop")]
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_carries_classification_verbatim() {
        // A window classified as "stop" at confidence 0.92 in 12 ms must
        // reach the wire with exactly those values.
        let message = ServerMessage::Result {
            detected: "stop".to_string(),
            confidence: 0.92,
            inference_ms: 12,
            window_index: 3,
        };

        let json = serde_json::to_string(&message).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["detected"], "stop");
        assert!((value["confidence"].as_f64().unwrap() - 0.92).abs() < 1e-6);
        assert_eq!(value["inference_ms"], 12);
        assert_eq!(value["window_index"], 3);

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn session_started_shape() {
        let json = serde_json::to_string(&ServerMessage::SessionStarted {
            session_id: "abc-123".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "session_started");
        assert_eq!(value["session_id"], "abc-123");
    }

    #[test]
    fn stop_control_message_parses() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Stop);
    }

    #[test]
    fn malformed_payloads_fail_without_panicking() {
        assert!(serde_json::from_str::<ServerMessage>("not json at all").is_err());
        assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"mystery"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"detected":"stop"}"#).is_err());
    }
}
