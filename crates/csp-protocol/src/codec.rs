//! JSON codec for host messages.
//!
//! Every message is one JSON object. Line-oriented transports (the command
//! line session) carry one message per line.

use crate::messages::{EngineMessage, HostRequest};
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("Failed to process message: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// The frame held no message.
    #[error("Empty message")]
    Empty,
}

/// Encode an engine message as a single-line JSON string.
pub fn encode_engine_message(msg: &EngineMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}

/// Decode a host request from one JSON frame.
pub fn decode_host_request(text: &str) -> Result<HostRequest, CodecError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CodecError::Empty);
    }
    serde_json::from_str(text).map_err(CodecError::from)
}

/// Encode a host request (used by drivers and tests).
pub fn encode_host_request(msg: &HostRequest) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AckMessage, GetRequest};

    #[test]
    fn test_encode_ack_is_single_line() {
        let msg = EngineMessage::Ack(AckMessage {
            request_id: Some("1".into()),
            changed: true,
        });
        let json = encode_engine_message(&msg).unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains("\"type\":\"ack\""));
        assert!(json.contains("\"requestId\":\"1\""));
    }

    #[test]
    fn test_decode_get() {
        let msg = decode_host_request(r#"  {"type":"get","path":"gen.hal"}  "#).unwrap();
        assert_eq!(
            msg,
            HostRequest::Get(GetRequest {
                request_id: None,
                path: "gen.hal".into()
            })
        );
    }

    #[test]
    fn test_request_survives_encoding() {
        let msg = HostRequest::Get(GetRequest {
            request_id: Some("9".into()),
            path: "configs.RCM.hse".into(),
        });
        let text = encode_host_request(&msg).unwrap();
        assert_eq!(decode_host_request(&text).unwrap(), msg);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode_host_request("   "), Err(CodecError::Empty)));
        assert!(matches!(
            decode_host_request(r#"{"type":"reboot"}"#),
            Err(CodecError::SerializeError(_))
        ));
        assert!(decode_host_request("{").is_err());
    }
}
