//! Listener registry and push-message dispatch
//!
//! The registry remembers which server events the session cares about and
//! keeps their hooks attached to the channel across reconnections:
//!
//! - a listener requested while disconnected is recorded and attached on the
//!   next `Connected` transition;
//! - every `Disconnected` transition detaches the hooks but keeps the
//!   descriptors;
//! - only an explicit `listen_for(event, false)` forgets a listener.
//!
//! Each hook decodes the raw message as a [`PushMessage`] and hands it to the
//! registry's [`EventDispatcher`], which re-emits it as `"<event>.<verb>"` to
//! handlers registered for that name.
//!
//! # Examples
//!
//! ```rust,no_run
//! use entsync_client::ListenerRegistry;
//!
//! # async fn example(registry: &ListenerRegistry) {
//! registry
//!     .dispatcher()
//!     .register("widget.created", |message| async move {
//!         println!("new widget {:?}", message.id);
//!     })
//!     .await;
//!
//! registry.listen_for("widget", true).await;
//! # }
//! ```

use crate::channel::{Channel, ListenerHook};
use crate::metrics::ClientMetrics;
use entsync_core::{Logger, PushMessage};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Handler for a dispatched `"<event>.<verb>"` message
pub type EventHandlerFn = Arc<dyn Fn(PushMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Routes push messages to handlers by `"<event>.<verb>"`
#[derive(Clone)]
pub struct EventDispatcher {
    handlers: Arc<Mutex<HashMap<String, Vec<EventHandlerFn>>>>,
    log: Logger,
    metrics: Option<Arc<ClientMetrics>>,
}

impl EventDispatcher {
    pub fn new(log: Logger, metrics: Option<Arc<ClientMetrics>>) -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            log,
            metrics,
        }
    }

    /// Add a handler for `name`; several handlers may share a name
    pub async fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(PushMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: EventHandlerFn = Arc::new(move |message| Box::pin(handler(message)));
        self.handlers
            .lock()
            .await
            .entry(name.into())
            .or_default()
            .push(handler);
    }

    /// Remove every handler for `name`
    pub async fn unregister(&self, name: &str) -> bool {
        self.handlers.lock().await.remove(name).is_some()
    }

    pub async fn has_handler(&self, name: &str) -> bool {
        self.handlers.lock().await.contains_key(name)
    }

    /// Names with at least one handler
    pub async fn names(&self) -> Vec<String> {
        self.handlers.lock().await.keys().cloned().collect()
    }

    /// Deliver `message` for `event`; returns whether any handler ran
    pub async fn dispatch(&self, event: &str, message: PushMessage) -> bool {
        let name = format!("{}.{}", event, message.verb);
        if let Some(metrics) = &self.metrics {
            metrics.record_push(&name);
        }

        let handlers = {
            let handlers = self.handlers.lock().await;
            handlers.get(&name).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            self.log
                .debug(format_args!("nothing handles `{}`, message dropped", name));
            return false;
        }

        self.log.debug(format_args!("dispatching `{}`", name));
        for handler in handlers {
            handler(message.clone()).await;
        }
        true
    }

    /// Decode a raw channel message and dispatch it
    pub async fn dispatch_raw(&self, event: &str, raw: Value) -> bool {
        match serde_json::from_value::<PushMessage>(raw) {
            Ok(message) => self.dispatch(event, message).await,
            Err(err) => {
                self.log
                    .warn(format_args!("ignoring malformed `{}` message: {}", event, err));
                false
            }
        }
    }
}

struct ListenerDescriptor {
    hook: ListenerHook,
    attached: bool,
}

#[derive(Default)]
struct RegistryState {
    descriptors: HashMap<String, ListenerDescriptor>,
    connected: bool,
}

/// Durable set of channel listeners
#[derive(Clone)]
pub struct ListenerRegistry {
    state: Arc<Mutex<RegistryState>>,
    channel: Arc<dyn Channel>,
    dispatcher: EventDispatcher,
    log: Logger,
}

impl ListenerRegistry {
    pub fn new(channel: Arc<dyn Channel>, log: Logger, metrics: Option<Arc<ClientMetrics>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            channel,
            dispatcher: EventDispatcher::new(log.child("dispatch"), metrics),
            log,
        }
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    // Holds the dispatcher, never the registry.
    fn hook_for(&self, event: &str) -> ListenerHook {
        let dispatcher = self.dispatcher.clone();
        let event = event.to_string();
        Arc::new(move |raw| {
            let dispatcher = dispatcher.clone();
            let event = event.clone();
            Box::pin(async move {
                dispatcher.dispatch_raw(&event, raw).await;
            })
        })
    }

    /// Start (`enable = true`) or stop listening for `event`
    ///
    /// Returns whether anything changed.
    pub async fn listen_for(&self, event: &str, enable: bool) -> bool {
        let mut state = self.state.lock().await;

        if !enable {
            return match state.descriptors.remove(event) {
                Some(descriptor) => {
                    if descriptor.attached {
                        self.channel.remove_listener(event);
                    }
                    self.log
                        .debug(format_args!("stopped listening for `{}`", event));
                    true
                }
                None => false,
            };
        }

        if state.descriptors.contains_key(event) {
            return false;
        }

        let hook = self.hook_for(event);
        let attached = state.connected;
        if attached {
            self.channel.add_listener(event, hook.clone());
        }
        state
            .descriptors
            .insert(event.to_string(), ListenerDescriptor { hook, attached });
        self.log.debug(format_args!(
            "listening for `{}` ({})",
            event,
            if attached { "attached" } else { "deferred" }
        ));
        true
    }

    pub async fn is_listening(&self, event: &str) -> bool {
        self.state.lock().await.descriptors.contains_key(event)
    }

    /// `Some(attached)` for a known listener, `None` otherwise
    pub async fn is_attached(&self, event: &str) -> Option<bool> {
        self.state
            .lock()
            .await
            .descriptors
            .get(event)
            .map(|descriptor| descriptor.attached)
    }

    pub async fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.state.lock().await.descriptors.keys().cloned().collect();
        events.sort();
        events
    }

    /// Attach every detached hook; called on each `Connected` transition
    pub(crate) async fn attach_all(&self) -> usize {
        let mut state = self.state.lock().await;
        state.connected = true;

        let mut attached = 0;
        for (event, descriptor) in state.descriptors.iter_mut() {
            if descriptor.attached {
                continue;
            }
            // A reconnecting transport may still hold the hook from the
            // previous session.
            self.channel.remove_listener(event);
            self.channel.add_listener(event, descriptor.hook.clone());
            descriptor.attached = true;
            attached += 1;
        }

        if attached > 0 {
            self.log
                .debug(format_args!("re-attached {} listeners", attached));
        }
        attached
    }

    /// Detach every hook but keep the descriptors
    pub(crate) async fn detach_all(&self) -> usize {
        let mut state = self.state.lock().await;
        state.connected = false;

        let mut detached = 0;
        for (event, descriptor) in state.descriptors.iter_mut() {
            if descriptor.attached {
                self.channel.remove_listener(event);
                descriptor.attached = false;
                detached += 1;
            }
        }
        detached
    }

    /// Detach and forget everything
    pub(crate) async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.connected = false;
        for (event, descriptor) in state.descriptors.drain() {
            if descriptor.attached {
                self.channel.remove_listener(&event);
            }
        }
    }
}
