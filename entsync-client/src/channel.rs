//! Persistent channel contract
//!
//! A [`Channel`] is the one upstream connection of a sync session. entsync
//! never opens or closes it behind the connection manager's back: the
//! manager calls `connect`, `reconnect` and `disconnect`, and learns about
//! the outcome through [`Channel::events`].
//!
//! Listener hooks are attached per event name. The channel invokes the hook
//! attached to an event with the raw message the server sent; at most one
//! hook is attached per event.
//!
//! [`WsChannel`](crate::WsChannel) is the WebSocket implementation.

use async_trait::async_trait;
use entsync_core::{RawResponse, Result, Verb};
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Callback invoked with the raw message of an attached event
pub type ListenerHook = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into a [`ListenerHook`]
pub fn listener_hook<F, Fut>(f: F) -> ListenerHook
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Transport lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
}

#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Resolves once the channel object exists and accepts hooks
    async fn ready(&self);

    /// Start connecting; no-op while connecting or connected
    fn connect(&self);

    /// Start a reconnection attempt; no-op while connecting or connected
    fn reconnect(&self);

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn is_connecting(&self) -> bool;

    /// Subscribe to lifecycle notifications
    fn events(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Attach `hook` to `event`, replacing any hook already attached
    fn add_listener(&self, event: &str, hook: ListenerHook);

    fn remove_listener(&self, event: &str);

    /// Send one request and wait for its raw response
    ///
    /// Only transport failures are errors here; error-shaped responses come
    /// back as `Ok` and are classified by the caller.
    async fn request(&self, verb: Verb, url: &str, data: Value) -> Result<RawResponse>;
}
