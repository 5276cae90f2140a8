//! Error types for entsync
//!
//! Every fallible operation in the workspace returns [`Result<T>`]. The
//! single [`Error`] enum is `Clone` so that one outcome can be handed to many
//! waiters at once (a shared token fetch, for instance, resolves every caller
//! with the same value or the same error).
//!
//! # Error Taxonomy
//!
//! Callers branch on [`Error::kind`]:
//!
//! - **Protocol**: the server or the caller broke the data contract (an empty
//!   security token, a record without identity, an unknown relationship
//!   kind). Never retried.
//! - **Transport**: the channel failed or timed out. The connection layer
//!   recovers from these by reconnecting and re-attaching listeners.
//! - **Validation**: the server rejected a mutation with field-level
//!   messages ([`ValidationErrors`]).
//! - **Server**: any other error-shaped response.
//! - **Lifecycle**: the session was torn down while the operation waited.
//!
//! # Examples
//!
//! ```rust
//! use entsync_core::{Error, ErrorKind};
//!
//! let error = Error::MissingIdentity("widgets".into());
//! assert_eq!(error.kind(), ErrorKind::Protocol);
//! assert!(!error.is_retryable());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type for entsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for entsync operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Serialization or deserialization error
    ///
    /// Occurs when a frame or a body cannot be converted between JSON and
    /// Rust types.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebSocket transport layer error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Failure reported by a channel that is not WebSocket based
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request could not be built (bad verb, body that is not an object)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Request operation timeout
    #[error("Request timeout")]
    Timeout,

    /// Connection was closed while the request was in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// The sync session was destroyed while the operation was waiting
    #[error("Sync session destroyed")]
    Destroyed,

    /// The token endpoint answered with a falsy token value
    #[error("Server returned an empty security token")]
    EmptyToken,

    /// A mutating request needs a token but none has been fetched yet
    #[error("Security token has not been fetched")]
    TokenMissing,

    /// A record reached the normalizer without an identity
    ///
    /// Carries the type key of the bucket the record was headed for.
    #[error("Record for `{0}` has no id")]
    MissingIdentity(String),

    /// The schema declared a relationship kind that is neither to-one nor
    /// to-many
    #[error("Unknown relationship kind `{kind}` for `{entity_type}.{key}`")]
    UnknownRelationshipKind {
        entity_type: String,
        key: String,
        kind: String,
    },

    /// A record or relationship value does not have the expected shape
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// The server rejected the request with field-level messages
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// The server answered with an error-shaped body
    #[error("Server error {status}: {body}")]
    Server {
        status: u16,
        body: serde_json::Value,
    },

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Protocol,
    Transport,
    Validation,
    Server,
    Lifecycle,
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Serialization(_)
            | Error::InvalidRequest(_)
            | Error::EmptyToken
            | Error::TokenMissing
            | Error::MissingIdentity(_)
            | Error::UnknownRelationshipKind { .. }
            | Error::MalformedRecord(_) => ErrorKind::Protocol,
            Error::WebSocket(_) | Error::Transport(_) | Error::Timeout | Error::ConnectionClosed => {
                ErrorKind::Transport
            }
            Error::Validation(_) => ErrorKind::Validation,
            Error::Server { .. } => ErrorKind::Server,
            Error::Destroyed => ErrorKind::Lifecycle,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Short label used as a metrics attribute
    pub fn label(&self) -> &'static str {
        match self {
            Error::Serialization(_) => "serialization",
            Error::WebSocket(_) => "websocket",
            Error::Transport(_) => "transport",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Timeout => "timeout",
            Error::ConnectionClosed => "connection_closed",
            Error::Destroyed => "destroyed",
            Error::EmptyToken => "empty_token",
            Error::TokenMissing => "token_missing",
            Error::MissingIdentity(_) => "missing_identity",
            Error::UnknownRelationshipKind { .. } => "unknown_relationship_kind",
            Error::MalformedRecord(_) => "malformed_record",
            Error::Validation(_) => "validation",
            Error::Server { .. } => "server",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Field-level validation messages returned by the server
///
/// Maps each rejected attribute to the list of messages the server gave for
/// it. Fields are kept sorted so the `Display` output is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message for `field`
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Messages recorded for `field`
    pub fn messages(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::EmptyToken.kind(), ErrorKind::Protocol);
        assert_eq!(Error::TokenMissing.kind(), ErrorKind::Protocol);
        assert_eq!(Error::Timeout.kind(), ErrorKind::Transport);
        assert_eq!(Error::ConnectionClosed.kind(), ErrorKind::Transport);
        assert_eq!(Error::Destroyed.kind(), ErrorKind::Lifecycle);
        assert_eq!(
            Error::Validation(ValidationErrors::new()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::Server {
                status: 500,
                body: json!({})
            }
            .kind(),
            ErrorKind::Server
        );
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(Error::WebSocket("reset".into()).is_retryable());
        assert!(Error::Timeout.is_retryable());
        assert!(!Error::EmptyToken.is_retryable());
        assert!(!Error::Destroyed.is_retryable());
        assert!(!Error::MalformedRecord("x".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::UnknownRelationshipKind {
            entity_type: "widget".into(),
            key: "parts".into(),
            kind: "manyToMany".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown relationship kind `manyToMany` for `widget.parts`"
        );
        assert_eq!(
            Error::MissingIdentity("widgets".into()).to_string(),
            "Record for `widgets` has no id"
        );
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_validation_errors() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "is required");
        errors.add("email", "is invalid");
        errors.add("name", "is too short");

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.messages("name"), ["is required", "is too short"]);
        assert!(errors.messages("missing").is_empty());
        assert_eq!(
            errors.to_string(),
            "email: is invalid; name: is required, is too short"
        );
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            json!({"email": ["is invalid"], "name": ["is required", "is too short"]})
        );
    }
}
