//! Wire message shapes.
//!
//! Requests and responses share a JSON-RPC-like envelope. Responses and
//! pushed event frames always carry all three of `id`, `result` and `error`,
//! with absent slots serialized as `null`, so clients can discriminate on a
//! fixed shape.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::Event;

/// Malformed parse error.
pub const CODE_PARSE: i32 = -32700;
/// Unknown method.
pub const CODE_METHOD_NOT_FOUND: i32 = -32601;
/// Missing or invalid params.
pub const CODE_INVALID_PARAMS: i32 = -32602;
/// Method executed but failed.
pub const CODE_APPLICATION: i32 = 0;

/// Protocol-level request rejection, before the method runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("parse error")]
    Parse,
    #[error("method not found")]
    MethodNotFound,
    #[error("invalid params")]
    InvalidParams,
}

impl ProtocolError {
    pub fn code(&self) -> i32 {
        match self {
            ProtocolError::Parse => CODE_PARSE,
            ProtocolError::MethodNotFound => CODE_METHOD_NOT_FOUND,
            ProtocolError::InvalidParams => CODE_INVALID_PARAMS,
        }
    }
}

/// Inbound request envelope. Every field is optional at the JSON level;
/// validation happens during dispatch so the response can echo the id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Error slot of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
}

/// Outbound response envelope, also used for pushed event frames
/// (`id: null`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub id: Option<String>,
    pub result: Option<Value>,
    pub error: Option<ResponseError>,
}

impl ResponseMessage {
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self.error = None;
        self
    }

    pub fn with_error(mut self, code: i32, message: impl Into<String>) -> Self {
        self.result = None;
        self.error = Some(ResponseError {
            code,
            message: message.into(),
        });
        self
    }

    pub fn with_protocol_error(self, err: &ProtocolError) -> Self {
        self.with_error(err.code(), err.to_string())
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// `result` payload of a pushed event frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Highest offset among `events`.
    pub offset: u64,
    pub events: Vec<Event>,
}

/// Encode one pushed event frame carrying `events`, which must be non-empty
/// and offset-ascending.
pub fn new_event_message(events: &[Arc<Event>]) -> Result<String, serde_json::Error> {
    let offset = events.last().map(|event| event.offset).unwrap_or(0);
    let events: Vec<Event> = events.iter().map(|event| (**event).clone()).collect();
    let payload = serde_json::to_value(EventMessage { offset, events })?;
    ResponseMessage::default().with_result(payload).encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_wire_shape() {
        let response = ResponseMessage {
            id: Some("1".into()),
            ..Default::default()
        }
        .with_result(Value::Bool(true));
        assert_eq!(
            response.encode().unwrap(),
            r#"{"id":"1","result":true,"error":null}"#
        );
    }

    #[test]
    fn error_response_wire_shape() {
        let response =
            ResponseMessage::default().with_protocol_error(&ProtocolError::Parse);
        assert_eq!(
            response.encode().unwrap(),
            r#"{"id":null,"result":null,"error":{"code":-32700,"message":"parse error"}}"#
        );
    }

    #[test]
    fn error_codes() {
        assert_eq!(ProtocolError::Parse.code(), -32700);
        assert_eq!(ProtocolError::MethodNotFound.code(), -32601);
        assert_eq!(ProtocolError::InvalidParams.code(), -32602);
    }

    #[test]
    fn event_frame_wire_shape() {
        let events = vec![
            Arc::new(Event {
                offset: 4,
                sender: "a".into(),
                casino_id: 0,
                game_id: 0,
                req_id: 0,
                event_type: 1,
                data: Value::Null,
            }),
            Arc::new(Event {
                offset: 5,
                sender: "b".into(),
                casino_id: 0,
                game_id: 0,
                req_id: 0,
                event_type: 1,
                data: Value::Null,
            }),
        ];
        let frame = new_event_message(&events).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"], Value::Null);
        assert_eq!(value["result"]["offset"], 5);
        assert_eq!(value["result"]["events"].as_array().unwrap().len(), 2);
        assert_eq!(value["result"]["events"][0]["offset"], 4);
    }

    #[test]
    fn request_tolerates_missing_fields() {
        let request: RequestMessage = serde_json::from_str(r#"{"id":"7"}"#).unwrap();
        assert_eq!(request.id.as_deref(), Some("7"));
        assert!(request.method.is_none());
        assert!(request.params.is_none());
    }
}
