//! Application messages exchanged between host and bot.
//!
//! A message is an ordered JSON object. Two shapes are meaningful:
//!
//! ```text
//! host → bot   {"request": "<command>", "run": <bool>}
//! bot  → host  {"response": "<text>"}
//! ```
//!
//! Unknown keys are ignored. Missing or mistyped required keys surface as
//! [`NetError::Protocol`], which both sides turn into a formatted string
//! instead of failing the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NetError, NetResult};

/// An ordered mapping of string keys to JSON values.
pub type Message = serde_json::Map<String, Value>;

/// A command request sent from the host to a bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Command text: Lua code when `run` is set, otherwise a shell command.
    pub request: String,
    /// Execute `request` as embedded code instead of a shell command.
    pub run: bool,
}

impl Request {
    /// Build a request.
    pub fn new(request: impl Into<String>, run: bool) -> Self {
        Self {
            request: request.into(),
            run,
        }
    }

    /// Extract a request from a received message.
    pub fn from_message(message: &Message) -> NetResult<Self> {
        let request = match message.get("request") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(NetError::protocol(format!(
                    "field `request` must be a string, got {}",
                    type_name(other)
                )))
            }
            None => return Err(NetError::protocol("missing field `request`")),
        };
        let run = match message.get("run") {
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(NetError::protocol(format!(
                    "field `run` must be a boolean, got {}",
                    type_name(other)
                )))
            }
            None => return Err(NetError::protocol("missing field `run`")),
        };
        Ok(Self { request, run })
    }
}

/// A command response sent from a bot back to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Captured output, resulting path, or formatted error string.
    pub response: String,
}

impl Response {
    /// Build a response.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }

    /// Extract a response from a received message.
    pub fn from_message(message: &Message) -> NetResult<Self> {
        match message.get("response") {
            Some(Value::String(s)) => Ok(Self::new(s.clone())),
            Some(other) => Err(NetError::protocol(format!(
                "field `response` must be a string, got {}",
                type_name(other)
            ))),
            None => Err(NetError::protocol("missing field `response`")),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_message(value: Value) -> Message {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_request_from_message() {
        let msg = as_message(json!({"request": "ls", "run": false, "extra": 1}));
        let req = Request::from_message(&msg).unwrap();
        assert_eq!(req, Request::new("ls", false));
    }

    #[test]
    fn test_request_missing_command() {
        let msg = as_message(json!({"run": true}));
        let err = Request::from_message(&msg).unwrap_err();
        assert!(matches!(err, NetError::Protocol(_)));
        assert!(err.to_string().contains("request"));
    }

    #[test]
    fn test_request_run_must_be_bool() {
        let msg = as_message(json!({"request": "ls", "run": "yes"}));
        let err = Request::from_message(&msg).unwrap_err();
        assert!(err.to_string().contains("boolean"));
    }

    #[test]
    fn test_response_missing_field() {
        let msg = as_message(json!({"other": "x"}));
        assert!(Response::from_message(&msg).is_err());
    }

    #[test]
    fn test_key_order_preserved() {
        let msg: Message = serde_json::from_str(r#"{"z": 1, "a": 2, "m": 3}"#).unwrap();
        let keys: Vec<_> = msg.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
