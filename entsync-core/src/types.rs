//! Core data types shared by every entsync layer
//!
//! # Entities
//!
//! An entity is a plain JSON object carrying an `id` field. Identities may be
//! strings or integers on the wire; inside entsync they are always compared
//! as strings (see [`entity_id`]).
//!
//! # Frames
//!
//! [`RequestFrame`] and [`ServerFrame`] describe the JSON frames exchanged
//! with the upstream service when the WebSocket channel is used:
//!
//! ```text
//! client → server   {"id": 7, "method": "post", "url": "/widgets", "data": {...}}
//! server → client   {"id": 7, "statusCode": 201, "body": {...}}
//! server → client   {"event": "widget", "message": {"verb": "created", ...}}
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A single entity record
pub type Entity = serde_json::Map<String, Value>;

/// Name of the identity field on every entity
pub const ID_FIELD: &str = "id";

/// Extract a usable identity from a JSON value
///
/// Strings must be non-empty; integers are rendered in decimal. Null,
/// booleans, empty strings, floats, arrays and objects carry no identity.
/// Note that `0` is a valid identity.
///
/// # Examples
///
/// ```rust
/// use entsync_core::types::entity_id;
/// use serde_json::json;
///
/// assert_eq!(entity_id(&json!("7")), Some("7".to_string()));
/// assert_eq!(entity_id(&json!(7)), Some("7".to_string()));
/// assert_eq!(entity_id(&json!("")), None);
/// assert_eq!(entity_id(&json!(null)), None);
/// ```
pub fn entity_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Identity of a record, if it has one
pub fn record_id(record: &Entity) -> Option<String> {
    record.get(ID_FIELD).and_then(entity_id)
}

/// HTTP-style verb of a channel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Post => "post",
            Verb::Put => "put",
            Verb::Delete => "delete",
        }
    }

    /// Every verb but GET changes server state and needs the security token.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Verb::Get)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Verb::Get),
            "post" => Ok(Verb::Post),
            "put" => Ok(Verb::Put),
            "delete" => Ok(Verb::Delete),
            other => Err(Error::InvalidRequest(format!("unsupported verb `{}`", other))),
        }
    }
}

/// Verbs the upstream service uses for model push messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushVerb {
    Created,
    Updated,
    Destroyed,
}

impl PushVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushVerb::Created => "created",
            PushVerb::Updated => "updated",
            PushVerb::Destroyed => "destroyed",
        }
    }

    pub const ALL: [PushVerb; 3] = [PushVerb::Created, PushVerb::Updated, PushVerb::Destroyed];
}

/// A server-initiated change notification
///
/// The verb is kept as a string so that verbs entsync does not act on are
/// still dispatched to user handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub verb: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PushMessage {
    pub fn new(verb: impl Into<String>, id: Option<Value>, data: Option<Value>) -> Self {
        Self {
            verb: verb.into(),
            id,
            data,
        }
    }

    /// The verb, if it is one of the model verbs
    pub fn push_verb(&self) -> Option<PushVerb> {
        PushVerb::ALL
            .into_iter()
            .find(|verb| verb.as_str() == self.verb)
    }

    /// Identity of the entity the message is about, as a string
    pub fn entity_id(&self) -> Option<String> {
        self.id.as_ref().and_then(entity_id)
    }
}

/// The channel-level reply to a request, before classification
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

impl RawResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }
}

/// Outbound request frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub method: Verb,
    pub url: String,
    #[serde(default)]
    pub data: Value,
}

fn default_status() -> u16 {
    200
}

/// Inbound frame: either a correlated response or a pushed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Response {
        id: u64,
        #[serde(rename = "statusCode", default = "default_status")]
        status: u16,
        #[serde(default)]
        body: Value,
    },
    Event {
        event: String,
        #[serde(default)]
        message: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_id_forms() {
        assert_eq!(entity_id(&json!("abc")), Some("abc".into()));
        assert_eq!(entity_id(&json!(42)), Some("42".into()));
        assert_eq!(entity_id(&json!(0)), Some("0".into()));
        assert_eq!(entity_id(&json!("")), None);
        assert_eq!(entity_id(&json!(false)), None);
        assert_eq!(entity_id(&json!(1.5)), None);
        assert_eq!(entity_id(&json!({"id": 1})), None);
    }

    #[test]
    fn test_verb_parsing() {
        assert_eq!("GET".parse::<Verb>().unwrap(), Verb::Get);
        assert_eq!("delete".parse::<Verb>().unwrap(), Verb::Delete);
        assert!("patch".parse::<Verb>().is_err());
        assert!(!Verb::Get.is_mutating());
        assert!(Verb::Put.is_mutating());
        assert_eq!(serde_json::to_value(Verb::Post).unwrap(), json!("post"));
    }

    #[test]
    fn test_push_message_decoding() {
        let msg: PushMessage =
            serde_json::from_value(json!({"verb": "created", "id": 7, "data": {"name": "x"}}))
                .unwrap();
        assert_eq!(msg.push_verb(), Some(PushVerb::Created));
        assert_eq!(msg.entity_id(), Some("7".into()));

        let other: PushMessage =
            serde_json::from_value(json!({"verb": "addedTo", "id": "1"})).unwrap();
        assert_eq!(other.push_verb(), None);
        assert!(other.data.is_none());
    }

    #[test]
    fn test_server_frame_variants() {
        let response: ServerFrame =
            serde_json::from_value(json!({"id": 3, "statusCode": 404, "body": {"error": "nope"}}))
                .unwrap();
        assert_eq!(
            response,
            ServerFrame::Response {
                id: 3,
                status: 404,
                body: json!({"error": "nope"})
            }
        );

        let event: ServerFrame =
            serde_json::from_value(json!({"event": "widget", "message": {"verb": "destroyed"}}))
                .unwrap();
        assert!(matches!(event, ServerFrame::Event { ref event, .. } if event == "widget"));
    }

    #[test]
    fn test_response_status_defaults_to_ok() {
        let frame: ServerFrame = serde_json::from_value(json!({"id": 1, "body": []})).unwrap();
        assert!(matches!(frame, ServerFrame::Response { status: 200, .. }));
    }
}
