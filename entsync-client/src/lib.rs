//! Connection session, request correlation and cache sync for entsync
//!
//! This crate keeps a local entity cache in sync with a server over one
//! persistent bidirectional channel. It provides:
//!
//! - **Connection management**: one session state machine that owns the
//!   channel and shares reconnect attempts between waiters
//! - **Listeners**: durable push-message listeners re-attached after every
//!   reconnect and dispatched as `"<event>.<verb>"`
//! - **Requests**: correlated request/response with a pending count,
//!   timeouts and error classification
//! - **Security token**: single-flight fetch and attachment of the
//!   anti-forgery token on mutating requests
//! - **Subscriptions**: debounced, deduplicated subscribe batches
//! - **Adapter**: CRUD facade that normalizes responses into the cache
//! - **WebSocket channel**: the bundled transport, with backoff
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use entsync_client::{AdapterBuilder, WsChannel};
//! use entsync_core::SchemaRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> entsync_core::Result<()> {
//!     let schema = SchemaRegistry::new().belongs_to("widget", "owner", "person");
//!     let adapter = AdapterBuilder::new(
//!         Arc::new(WsChannel::new("ws://localhost:1337/socket")),
//!         Arc::new(schema),
//!     )
//!     .build()?;
//!
//!     let widgets = adapter.find_all("widget").await?;
//!     println!("{} widgets, {} owners", widgets.records("widgets").len(), widgets.records("people").len());
//!
//!     adapter.destroy().await;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod batch;
pub mod builder;
pub mod channel;
pub mod config;
pub mod connection_state;
pub mod correlator;
pub mod listener;
pub mod metrics;
pub mod reconnect;
pub mod request;
pub mod store;
pub mod token;
pub mod ws;

pub use adapter::SyncAdapter;
pub use batch::{PendingSubscriptions, SubscribePredicate, SubscriptionBatcher};
pub use builder::AdapterBuilder;
pub use channel::{listener_hook, Channel, ChannelEvent, ListenerHook};
pub use config::SyncConfig;
pub use connection_state::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use correlator::RequestCorrelator;
pub use listener::{EventDispatcher, EventHandlerFn, ListenerRegistry};
pub use metrics::ClientMetrics;
pub use reconnect::Backoff;
pub use request::PendingRequests;
pub use store::{EntityCache, MemoryStore};
pub use token::TokenGuard;
pub use ws::WsChannel;
