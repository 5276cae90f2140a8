//! entsync - entity cache sync over a persistent socket channel
//!
//! This is the main convenience crate that re-exports the entsync sub-crates.
//! Use this crate if you want a single dependency for the whole stack.
//!
//! # Architecture
//!
//! entsync is organized into two crates:
//!
//! - **entsync-core**: types, codec, normalizer, schema, error handling,
//!   logging and observability
//! - **entsync-client**: connection session, listeners, request correlation,
//!   security token, subscription batching, the adapter facade and the
//!   WebSocket channel
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use entsync::{AdapterBuilder, SchemaRegistry, WsChannel};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = SchemaRegistry::new()
//!         .belongs_to("comment", "author", "person")
//!         .has_many("post", "comments", "comment");
//!
//!     let adapter = AdapterBuilder::new(
//!         Arc::new(WsChannel::new("ws://localhost:1337/socket")),
//!         Arc::new(schema),
//!     )
//!     .build()?;
//!
//!     let posts = adapter.find_all("post").await?;
//!     println!("{} posts, {} comments", posts.records("posts").len(), posts.records("comments").len());
//!
//!     adapter.create_record("post", json!({"title": "hello"})).await?;
//!     adapter.destroy().await;
//!     Ok(())
//! }
//! ```

pub use entsync_client as client;
pub use entsync_core as core;

pub use entsync_client::{
    AdapterBuilder, Backoff, Channel, ChannelEvent, ConnectionState, EntityCache, MemoryStore,
    SyncAdapter, SyncConfig, WsChannel,
};
pub use entsync_core::{Error, Normalizer, ObservabilityConfig, Payload, Result, SchemaRegistry};
