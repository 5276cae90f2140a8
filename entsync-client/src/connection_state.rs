//! Connection session state machine
//!
//! The [`ConnectionManager`] owns the session's single [`Channel`] and is the
//! only component that asks it to connect, reconnect or disconnect.
//!
//! # Connection States
//!
//! - **Uninitialized**: created, loading not started
//! - **Connecting**: waiting for the channel to become ready and connect
//! - **Connected**: operational, listeners attached
//! - **Disconnected**: dropped, listeners detached but remembered
//! - **Reconnecting**: a reconnect was requested by a consumer
//! - **Destroyed**: torn down for good
//!
//! # State Transitions
//!
//! ```text
//! Uninitialized ──start──▶ Connecting ──ready──▶ (connect)
//!                                                   │
//!        ┌────────────── channel Connected ◀────────┘
//!        ▼
//!    Connected ──channel Disconnected──▶ Disconnected
//!        ▲                                   │ consumer needs a channel
//!        └──────── channel Connected ◀── Reconnecting
//!
//! any state ──destroy──▶ Destroyed
//! ```
//!
//! # Waiting for a Channel
//!
//! [`ConnectionManager::connected_channel`] is how every other component
//! reaches the channel. Concurrent callers that find the session
//! disconnected share a single reconnect attempt; `destroy()` wakes all of
//! them with [`Error::Destroyed`].

use crate::channel::{Channel, ChannelEvent};
use crate::listener::ListenerRegistry;
use crate::metrics::ClientMetrics;
use entsync_core::{Error, Logger, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Destroyed,
}

impl ConnectionState {
    pub(crate) fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Uninitialized => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Disconnected => 3,
            ConnectionState::Reconnecting => 4,
            ConnectionState::Destroyed => 5,
        }
    }
}

/// Session lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The channel became ready; fired once per session
    Initialized,
    Connected,
    Disconnected,
    Destroyed,
}

struct Inner {
    channel: Arc<dyn Channel>,
    listeners: ListenerRegistry,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    initialized: AtomicBool,
    reconnects: AtomicU64,
    driver: Mutex<Option<JoinHandle<()>>>,
    log: Logger,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let driver = self.driver.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(driver) = driver.take() {
            driver.abort();
        }
    }
}

/// Manages the session state and the channel lifecycle
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(channel: Arc<dyn Channel>, log: Logger, metrics: Option<Arc<ClientMetrics>>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Uninitialized);
        let (events, _) = broadcast::channel(64);
        let listeners = ListenerRegistry::new(channel.clone(), log.child("listeners"), metrics.clone());

        Self {
            inner: Arc::new(Inner {
                channel,
                listeners,
                state,
                events,
                initialized: AtomicBool::new(false),
                reconnects: AtomicU64::new(0),
                driver: Mutex::new(None),
                log,
                metrics,
            }),
        }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.inner.channel
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == ConnectionState::Destroyed
    }

    /// Reconnects this session has asked the channel for
    pub fn reconnect_attempts(&self) -> u64 {
        self.inner.reconnects.load(Ordering::SeqCst)
    }

    /// Begin loading the channel
    ///
    /// Spawns the task that waits for the channel to become ready and then
    /// follows its lifecycle events. Returns false if loading already
    /// started or the session is destroyed. Must be called inside a Tokio
    /// runtime.
    pub fn start(&self) -> bool {
        let mut driver = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if driver.is_some() {
            return false;
        }

        let started = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Uninitialized {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return false;
        }
        self.record_state(ConnectionState::Connecting);

        // Subscribe before the task runs so no lifecycle event is missed.
        let events = self.inner.channel.events();
        *driver = Some(tokio::spawn(drive(
            Arc::downgrade(&self.inner),
            self.inner.channel.clone(),
            events,
        )));
        self.inner.log.debug("loading channel");
        true
    }

    /// Wait until the session is connected and return the channel
    ///
    /// Already connected: yields to the scheduler once and returns. An
    /// initialized but disconnected session triggers one reconnect attempt,
    /// shared with every other waiter. An unstarted session starts loading.
    pub async fn connected_channel(&self) -> Result<Arc<dyn Channel>> {
        let mut state = self.inner.state.subscribe();
        let mut first_look = true;

        loop {
            let current = *state.borrow_and_update();
            match current {
                ConnectionState::Connected => {
                    if first_look {
                        tokio::task::yield_now().await;
                    }
                    return Ok(self.inner.channel.clone());
                }
                ConnectionState::Destroyed => return Err(Error::Destroyed),
                ConnectionState::Uninitialized => {
                    self.start();
                }
                ConnectionState::Disconnected => {
                    self.request_reconnect();
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            }
            first_look = false;

            if state.changed().await.is_err() {
                return Err(Error::Destroyed);
            }
        }
    }

    /// Run `f` with a connected channel
    ///
    /// After `destroy()` the callback is not invoked; the `Destroyed` error
    /// is returned to the caller instead.
    pub async fn with_connected_channel<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Channel>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let channel = self.connected_channel().await?;
        f(channel).await
    }

    /// Ask the channel to reconnect unless an attempt is already under way
    ///
    /// Returns whether this call started the attempt. Does nothing before
    /// the channel is initialized, while connected, or while the channel is
    /// already connecting.
    pub fn request_reconnect(&self) -> bool {
        if !self.is_initialized() {
            return false;
        }

        let channel = &self.inner.channel;
        let triggered = self.inner.state.send_if_modified(|state| {
            if *state != ConnectionState::Disconnected
                || channel.is_connected()
                || channel.is_connecting()
            {
                return false;
            }
            *state = ConnectionState::Reconnecting;
            true
        });

        if triggered {
            let attempt = self.inner.reconnects.fetch_add(1, Ordering::SeqCst) + 1;
            self.record_state(ConnectionState::Reconnecting);
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_reconnection_attempt();
            }
            self.inner
                .log
                .info(format_args!("reconnecting (attempt {})", attempt));
            channel.reconnect();
        }
        triggered
    }

    /// Tear the session down
    ///
    /// Disconnects the channel, forgets every listener and resolves all
    /// waiters with [`Error::Destroyed`]. Calling it again does nothing.
    pub async fn destroy(&self) {
        let destroyed = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Destroyed {
                false
            } else {
                *state = ConnectionState::Destroyed;
                true
            }
        });
        if !destroyed {
            return;
        }
        self.record_state(ConnectionState::Destroyed);

        let driver = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.abort();
        }

        self.inner.listeners.clear().await;

        let channel = &self.inner.channel;
        if channel.is_connected() || channel.is_connecting() {
            channel.disconnect();
        }

        let _ = self.inner.events.send(ConnectionEvent::Destroyed);
        self.inner.log.info("session destroyed");
    }

    fn record_state(&self, state: ConnectionState) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.update_connection_state(state);
        }
    }

    /// Move to `to` unless already there or destroyed.
    fn transition(&self, to: ConnectionState) -> bool {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == to || *state == ConnectionState::Destroyed {
                false
            } else {
                *state = to;
                true
            }
        });
        if changed {
            self.record_state(to);
        }
        changed
    }

    async fn on_ready(&self) {
        if self.is_destroyed() {
            return;
        }
        if !self.inner.initialized.swap(true, Ordering::SeqCst) {
            self.inner.log.debug("channel ready");
            let _ = self.inner.events.send(ConnectionEvent::Initialized);
        }

        if self.inner.channel.is_connected() {
            self.on_connected().await;
        } else {
            self.inner.channel.connect();
        }
    }

    async fn on_connected(&self) {
        if self.is_destroyed() {
            return;
        }
        let reattached = self.inner.listeners.attach_all().await;
        if self.transition(ConnectionState::Connected) {
            self.inner.log.info(format_args!(
                "connected, {} listeners attached",
                reattached
            ));
            let _ = self.inner.events.send(ConnectionEvent::Connected);
        }
    }

    async fn on_disconnected(&self) {
        if self.is_destroyed() {
            return;
        }
        self.inner.listeners.detach_all().await;
        if self.transition(ConnectionState::Disconnected) {
            self.inner.log.warn("disconnected");
            let _ = self.inner.events.send(ConnectionEvent::Disconnected);
        } else {
            // The channel gave up a retry cycle of its own; waiters have to
            // look again and ask for a new attempt.
            self.inner.state.send_modify(|_| {});
        }
    }
}

fn upgrade(inner: &Weak<Inner>) -> Option<ConnectionManager> {
    inner.upgrade().map(|inner| ConnectionManager { inner })
}

/// Follows the channel for the lifetime of the session. Holds only a weak
/// reference between events so dropping every manager ends the session.
async fn drive(
    inner: Weak<Inner>,
    channel: Arc<dyn Channel>,
    mut events: broadcast::Receiver<ChannelEvent>,
) {
    channel.ready().await;
    match upgrade(&inner) {
        Some(manager) => manager.on_ready().await,
        None => return,
    }

    loop {
        let event = events.recv().await;
        let Some(manager) = upgrade(&inner) else {
            break;
        };

        match event {
            Ok(ChannelEvent::Connected) => manager.on_connected().await,
            Ok(ChannelEvent::Disconnected) => manager.on_disconnected().await,
            Err(RecvError::Lagged(skipped)) => {
                manager.inner.log.warn(format_args!(
                    "missed {} channel events, resyncing",
                    skipped
                ));
                if channel.is_connected() {
                    manager.on_connected().await;
                } else {
                    manager.on_disconnected().await;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}
