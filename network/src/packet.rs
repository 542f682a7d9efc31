use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NetworkError;

/// Event kinds carried on the wire. The string forms are part of the
/// protocol and must not change: `query`, `response`, `message`,
/// `completionPacket`, `command`, `completionStart`, `completionStop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PacketEvent {
    Query,
    Response,
    Message,
    CompletionPacket,
    // Reserved.
    Command,
    CompletionStart,
    // Terminal packet of a completion relay.
    CompletionStop,
}

/// Wire envelope. Events that expect a reply carry a unique `request_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub event: PacketEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Packet {
    pub fn query(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            event: PacketEvent::Query,
            request_id: Some(request_id.into()),
            data,
        }
    }

    pub fn response(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            event: PacketEvent::Response,
            request_id: Some(request_id.into()),
            data,
        }
    }

    pub fn message(data: Value) -> Self {
        Self {
            event: PacketEvent::Message,
            request_id: None,
            data,
        }
    }

    pub fn completion(data: Value) -> Self {
        Self {
            event: PacketEvent::CompletionPacket,
            request_id: None,
            data,
        }
    }

    pub fn completion_stop(status: StopStatus) -> Self {
        Self {
            event: PacketEvent::CompletionStop,
            request_id: None,
            data: serde_json::to_value(status).unwrap_or(Value::Null),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, NetworkError> {
        serde_json::to_vec(self).map_err(|e| NetworkError::Serialization(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, NetworkError> {
        serde_json::from_slice(bytes).map_err(|e| NetworkError::Framing(e.to_string()))
    }
}

/// Payload of the terminal `completionStop` packet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum StopStatus {
    Done,
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_strings_are_stable() {
        let cases = [
            (PacketEvent::Query, "query"),
            (PacketEvent::Response, "response"),
            (PacketEvent::Message, "message"),
            (PacketEvent::CompletionPacket, "completionPacket"),
            (PacketEvent::Command, "command"),
            (PacketEvent::CompletionStart, "completionStart"),
            (PacketEvent::CompletionStop, "completionStop"),
        ];
        for (event, expected) in cases {
            assert_eq!(serde_json::to_value(event).unwrap(), json!(expected));
        }
    }

    #[test]
    fn request_id_is_omitted_when_absent() {
        let packet = Packet::message(json!({"model": "llama3.2:latest"}));
        let raw = serde_json::to_string(&packet).unwrap();
        assert!(!raw.contains("request_id"));

        let packet = Packet::query("abc", Value::Null);
        let raw = serde_json::to_string(&packet).unwrap();
        assert!(raw.contains("\"request_id\":\"abc\""));
    }

    #[test]
    fn stop_status_wire_shape() {
        let done = serde_json::to_value(StopStatus::Done).unwrap();
        assert_eq!(done, json!({"status": "done"}));

        let err = serde_json::to_value(StopStatus::Error {
            error: "backend unavailable".into(),
        })
        .unwrap();
        assert_eq!(
            err,
            json!({"status": "error", "error": "backend unavailable"})
        );
    }
}
