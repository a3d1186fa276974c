//! DAP message envelopes.
//!
//! Incoming JSON is classified by its `type` field into responses, events,
//! or "other" (requests from the adapter, malformed or unknown kinds). Only
//! the envelope is decoded here; bodies stay as `serde_json::Value` until a
//! typed operation asks for a concrete shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing request.
///
/// `seq` is left at 0 by request builders and stamped by the session actor
/// right before the request is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: i64,
    #[serde(rename = "type")]
    kind: RequestKind,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RequestKind {
    Request,
}

impl Request {
    /// Request without arguments (e.g. `threads`, `configurationDone`).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            seq: 0,
            kind: RequestKind::Request,
            command: command.into(),
            arguments: None,
        }
    }

    /// Request with an arguments object.
    pub fn with_arguments(command: impl Into<String>, arguments: Value) -> Self {
        Self {
            arguments: Some(arguments),
            ..Self::new(command)
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Response from the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default)]
    pub seq: i64,
    #[serde(default, rename = "request_seq")]
    pub request_seq: i64,
    pub command: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

/// Unsolicited event from the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub seq: i64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

/// Classification of one decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Response(Response),
    Event(Event),
    /// Neither response nor event: reverse requests, unknown `type`, or an
    /// envelope missing required fields. Logged and dropped by the read loop.
    Other(Value),
}

impl IncomingMessage {
    /// Classifies a decoded frame by its `type` field.
    pub fn classify(message: Value) -> Self {
        match message.get("type").and_then(Value::as_str) {
            Some("response") => match serde_json::from_value::<Response>(message.clone()) {
                Ok(response) => IncomingMessage::Response(response),
                Err(_) => IncomingMessage::Other(message),
            },
            Some("event") => match serde_json::from_value::<Event>(message.clone()) {
                Ok(event) => IncomingMessage::Event(event),
                Err(_) => IncomingMessage::Other(message),
            },
            _ => IncomingMessage::Other(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_housekeeping_fields() {
        let mut request = Request::with_arguments("next", json!({"threadId": 1}));
        request.seq = 7;

        let value = request.to_json().unwrap();
        assert_eq!(
            value,
            json!({
                "seq": 7,
                "type": "request",
                "command": "next",
                "arguments": {"threadId": 1}
            })
        );
    }

    #[test]
    fn request_without_arguments_omits_field() {
        let value = Request::new("threads").to_json().unwrap();
        assert!(value.get("arguments").is_none());
        assert_eq!(value["type"], "request");
    }

    #[test]
    fn classify_response() {
        let message = json!({
            "seq": 3,
            "type": "response",
            "request_seq": 2,
            "command": "threads",
            "success": true,
            "body": {"threads": []}
        });

        match IncomingMessage::classify(message) {
            IncomingMessage::Response(response) => {
                assert_eq!(response.request_seq, 2);
                assert_eq!(response.command, "threads");
                assert!(response.success);
                assert_eq!(response.body, json!({"threads": []}));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn classify_event() {
        let message = json!({
            "seq": 4,
            "type": "event",
            "event": "stopped",
            "body": {"reason": "breakpoint", "threadId": 1}
        });

        match IncomingMessage::classify(message) {
            IncomingMessage::Event(event) => {
                assert_eq!(event.event, "stopped");
                assert_eq!(event.body["threadId"], 1);
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn classify_reverse_request_as_other() {
        let message = json!({
            "seq": 5,
            "type": "request",
            "command": "runInTerminal"
        });

        assert!(matches!(
            IncomingMessage::classify(message),
            IncomingMessage::Other(_)
        ));
    }

    #[test]
    fn classify_response_missing_command_as_other() {
        let message = json!({"seq": 1, "type": "response", "success": true});

        assert!(matches!(
            IncomingMessage::classify(message),
            IncomingMessage::Other(_)
        ));
    }
}
