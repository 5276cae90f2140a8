//! Core types, codec and payload normalizer for entsync
//!
//! This crate holds everything in entsync that does not depend on a running
//! connection:
//!
//! - **Types**: entities, verbs, push messages, wire frames
//! - **Codec**: frame encoding and response classification
//! - **Schema**: relationship metadata consumed by the normalizer
//! - **Normalizer**: flattening of nested payloads into deduplicated buckets
//! - **Inflection**: type name → bucket key, URL path and event name
//! - **Error handling**: the shared [`Error`] type and its taxonomy
//! - **Logging and observability**: injectable [`Logger`] and OpenTelemetry
//!   setup
//!
//! The `entsync-client` crate builds the connection session, request
//! correlation and subscription batching on top of it.
//!
//! # Example
//!
//! ```rust
//! use entsync_core::{Normalizer, SchemaRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let schema = SchemaRegistry::new().has_many("post", "comments", "comment");
//! let normalizer = Normalizer::new(Arc::new(schema));
//!
//! let payload = normalizer
//!     .payload("post", json!([{"id": 1, "comments": [{"id": 10}, {"id": 11}]}]))
//!     .unwrap();
//!
//! assert_eq!(payload.ids("comments"), ["10", "11"]);
//! assert_eq!(payload.records("posts")[0]["comments"], json!([10, 11]));
//! ```

pub mod codec;
pub mod error;
pub mod inflect;
pub mod logger;
pub mod normalize;
pub mod observability;
pub mod schema;
pub mod types;

pub use error::{Error, ErrorKind, Result, ValidationErrors};
pub use logger::Logger;
pub use normalize::{Normalizer, Payload};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use schema::{Relationship, RelationshipKind, Schema, SchemaRegistry};
pub use types::{Entity, PushMessage, PushVerb, RawResponse, RequestFrame, ServerFrame, Verb};
