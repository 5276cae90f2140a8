//! Frame codec and response classification
//!
//! Two jobs live here:
//!
//! - **Framing**: encoding [`RequestFrame`]s and decoding [`ServerFrame`]s
//!   for the WebSocket channel.
//! - **Classification**: deciding whether a [`RawResponse`] is a success.
//!   A response fails when its status code is 400 or above, or when its body
//!   is an error object (`error`, `model`, `summary` and `status` all set).
//!   Failures carrying field-level details become [`Error::Validation`],
//!   everything else [`Error::Server`].
//!
//! # Examples
//!
//! ```rust
//! use entsync_core::{codec, Error, RawResponse};
//! use serde_json::json;
//!
//! let ok = codec::classify(RawResponse::ok(json!({"id": 1})));
//! assert_eq!(ok.unwrap(), json!({"id": 1}));
//!
//! let rejected = codec::classify(RawResponse::new(
//!     400,
//!     json!({"invalidAttributes": {"name": [{"rule": "required", "message": "name is required"}]}}),
//! ));
//! match rejected {
//!     Err(Error::Validation(errors)) => assert_eq!(errors.messages("name"), ["name is required"]),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use crate::error::{Error, Result, ValidationErrors};
use crate::types::{RawResponse, RequestFrame, ServerFrame};
use serde::Serialize;
use serde_json::Value;

/// Encode any serializable message to a JSON string
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode an outbound request frame
pub fn encode_request(frame: &RequestFrame) -> Result<String> {
    encode(frame)
}

/// Decode an inbound frame
pub fn decode(data: &str) -> Result<ServerFrame> {
    serde_json::from_str(data).map_err(|e| Error::Serialization(e.to_string()))
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(_) => true,
    }
}

/// Whether `body` is the server's error envelope
pub fn is_error_object(body: &Value) -> bool {
    ["error", "model", "summary", "status"]
        .iter()
        .all(|key| truthy(body.get(*key)))
}

fn message_of(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Extract field-level validation messages from an error body
///
/// Reads `invalidAttributes` (`{field: [{message}, ...]}`) and falls back to
/// an `errors` object of the same shape. Returns `None` when neither is
/// present.
pub fn validation_errors(body: &Value) -> Option<ValidationErrors> {
    let attributes = body
        .get("invalidAttributes")
        .and_then(Value::as_object)
        .or_else(|| body.get("errors").and_then(Value::as_object))?;

    let mut errors = ValidationErrors::new();
    for (field, entries) in attributes {
        match entries {
            Value::Array(items) => {
                for message in items.iter().filter_map(message_of) {
                    errors.add(field.clone(), message);
                }
            }
            other => {
                if let Some(message) = message_of(other) {
                    errors.add(field.clone(), message);
                }
            }
        }
    }
    Some(errors)
}

/// Decide whether a raw response is a success
///
/// Returns the body on success.
pub fn classify(response: RawResponse) -> Result<Value> {
    let RawResponse { status, body } = response;
    if status < 400 && !is_error_object(&body) {
        return Ok(body);
    }

    if let Some(errors) = validation_errors(&body) {
        return Err(Error::Validation(errors));
    }

    // An error envelope inside a 2xx frame carries its own status.
    let status = if status < 400 {
        body.get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(status)
    } else {
        status
    };
    Err(Error::Server { status, body })
}
