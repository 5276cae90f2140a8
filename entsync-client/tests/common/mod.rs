//! Common test utilities for entsync-client integration tests
//!
//! This module provides a scriptable in-process channel and a mock WebSocket
//! server speaking the entsync frame format, so sessions can be tested
//! without a real backend.

#![allow(dead_code)]

use async_trait::async_trait;
use entsync_client::{
    Channel, ChannelEvent, ConnectionManager, ListenerHook, RequestCorrelator, TokenGuard,
};
use entsync_core::{Error, Logger, RawResponse, RequestFrame, Result, Verb};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::Level;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init();
}

pub fn test_logger() -> Logger {
    Logger::new("test", Level::DEBUG)
}

/// Poll `condition` every 5ms for up to two seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// What the mock channel does with one request
pub enum Reply {
    Respond(RawResponse),
    Fail(Error),
    After(Duration, RawResponse),
    Hang,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply::Respond(RawResponse::ok(body))
    }

    pub fn status(status: u16, body: Value) -> Self {
        Reply::Respond(RawResponse::new(status, body))
    }
}

type Responder = Arc<dyn Fn(Verb, &str, &Value) -> Reply + Send + Sync>;

/// One request as the channel saw it
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub verb: Verb,
    pub url: String,
    pub data: Value,
}

#[derive(Default)]
struct Link {
    connected: bool,
    connecting: bool,
}

struct MockInner {
    link: Mutex<Link>,
    hooks: Mutex<HashMap<String, ListenerHook>>,
    requests: Mutex<Vec<Recorded>>,
    responder: Mutex<Responder>,
    events: broadcast::Sender<ChannelEvent>,
    connect_delay: Mutex<Duration>,
    refuse: AtomicBool,
    connects: AtomicUsize,
    reconnects: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Scriptable in-process [`Channel`]
///
/// Connects after `connect_delay` (immediately by default) unless told to
/// refuse, and answers requests through a responder closure.
#[derive(Clone)]
pub struct MockChannel {
    inner: Arc<MockInner>,
}

impl MockChannel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MockInner {
                link: Mutex::new(Link::default()),
                hooks: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
                responder: Mutex::new(Arc::new(|_, _, _| Reply::ok(json!({})))),
                events,
                connect_delay: Mutex::new(Duration::ZERO),
                refuse: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                reconnects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            }),
        }
    }

    pub fn arc(&self) -> Arc<dyn Channel> {
        Arc::new(self.clone())
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(Verb, &str, &Value) -> Reply + Send + Sync + 'static,
    {
        *self.inner.responder.lock().unwrap() = Arc::new(responder);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.inner.connect_delay.lock().unwrap() = delay;
    }

    /// Make connection attempts fail (or succeed again)
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.inner.reconnects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|request| request.url == url)
            .collect()
    }

    pub fn attached_events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.inner.hooks.lock().unwrap().keys().cloned().collect();
        events.sort();
        events
    }

    /// Simulate the server going away
    pub fn drop_connection(&self) {
        {
            let mut link = self.inner.link.lock().unwrap();
            link.connected = false;
            link.connecting = false;
        }
        let _ = self.inner.events.send(ChannelEvent::Disconnected);
    }

    /// Deliver a push message to the hook attached for `event`
    ///
    /// Returns false when no hook is attached.
    pub async fn push(&self, event: &str, message: Value) -> bool {
        let hook = self.inner.hooks.lock().unwrap().get(event).cloned();
        match hook {
            Some(hook) => {
                hook(message).await;
                true
            }
            None => false,
        }
    }

    fn begin_connect(&self) {
        {
            let mut link = self.inner.link.lock().unwrap();
            if link.connected || link.connecting {
                return;
            }
            link.connecting = true;
        }

        let inner = self.inner.clone();
        let delay = *inner.connect_delay.lock().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let refused = inner.refuse.load(Ordering::SeqCst);
            {
                let mut link = inner.link.lock().unwrap();
                link.connecting = false;
                link.connected = !refused;
            }
            let event = if refused {
                ChannelEvent::Disconnected
            } else {
                ChannelEvent::Connected
            };
            let _ = inner.events.send(event);
        });
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn ready(&self) {}

    fn connect(&self) {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.begin_connect();
    }

    fn reconnect(&self) {
        self.inner.reconnects.fetch_add(1, Ordering::SeqCst);
        self.begin_connect();
    }

    fn disconnect(&self) {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.drop_connection();
    }

    fn is_connected(&self) -> bool {
        self.inner.link.lock().unwrap().connected
    }

    fn is_connecting(&self) -> bool {
        self.inner.link.lock().unwrap().connecting
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    fn add_listener(&self, event: &str, hook: ListenerHook) {
        self.inner
            .hooks
            .lock()
            .unwrap()
            .insert(event.to_string(), hook);
    }

    fn remove_listener(&self, event: &str) {
        self.inner.hooks.lock().unwrap().remove(event);
    }

    async fn request(&self, verb: Verb, url: &str, data: Value) -> Result<RawResponse> {
        if !self.is_connected() {
            return Err(Error::ConnectionClosed);
        }
        let reply = {
            let responder = self.inner.responder.lock().unwrap().clone();
            responder(verb, url, &data)
        };
        self.inner.requests.lock().unwrap().push(Recorded {
            verb,
            url: url.to_string(),
            data,
        });

        match reply {
            Reply::Respond(response) => Ok(response),
            Reply::Fail(err) => Err(err),
            Reply::After(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Reply::Hang => futures::future::pending().await,
        }
    }
}

/// Session pieces wired the way the adapter builder wires them
pub struct Session {
    pub channel: MockChannel,
    pub connection: ConnectionManager,
    pub correlator: RequestCorrelator,
}

impl Session {
    pub fn new(channel: MockChannel) -> Self {
        Self::with_timeout(channel, Some(Duration::from_secs(5)))
    }

    pub fn with_timeout(channel: MockChannel, timeout: Option<Duration>) -> Self {
        let log = test_logger();
        let connection = ConnectionManager::new(channel.arc(), log.child("connection"), None);
        let correlator =
            RequestCorrelator::new(connection.clone(), timeout, log.child("correlator"), None);
        Self {
            channel,
            connection,
            correlator,
        }
    }

    pub fn token(&self) -> TokenGuard {
        TokenGuard::new(
            self.correlator.clone(),
            "/csrfToken",
            "_csrf",
            test_logger().child("token"),
            None,
        )
    }

    /// Start the session and wait until it is connected
    pub async fn connected(self) -> Self {
        self.connection.start();
        let mut state = self.connection.watch_state();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == entsync_client::ConnectionState::Connected),
        )
        .await
        .expect("session did not connect")
        .expect("state channel closed");
        drop(state);
        self
    }
}

enum ServerCommand {
    Push(String),
    Close,
}

/// Mock WebSocket server speaking entsync frames
///
/// Every request frame is answered by the handler with
/// `(statusCode, body)`; a `None` leaves the request unanswered.
pub struct MockWsServer {
    addr: SocketAddr,
    commands: broadcast::Sender<Arc<ServerCommand>>,
    frames: mpsc::UnboundedReceiver<RequestFrame>,
    connections: Arc<AtomicUsize>,
    shutdown: mpsc::Sender<()>,
}

impl MockWsServer {
    /// Server answering every request with `200 {}`
    pub async fn new() -> Self {
        Self::with_handler(|_| Some((200, json!({})))).await
    }

    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&RequestFrame) -> Option<(u16, Value)> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handler = Arc::new(handler);
        let (commands, _) = broadcast::channel::<Arc<ServerCommand>>(64);
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (shutdown, mut shutdown_rx) = mpsc::channel::<()>(1);
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_commands = commands.clone();
        let accepted = connections.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accept_result = listener.accept() => {
                        let Ok((stream, _)) = accept_result else { continue };
                        let handler = handler.clone();
                        let frame_tx = frame_tx.clone();
                        let mut commands = accept_commands.subscribe();
                        accepted.fetch_add(1, Ordering::SeqCst);

                        tokio::spawn(async move {
                            let Ok(ws_stream) = accept_async(stream).await else { return };
                            let (mut write, mut read) = ws_stream.split();

                            loop {
                                tokio::select! {
                                    incoming = read.next() => {
                                        let Some(Ok(Message::Text(text))) = incoming else { break };
                                        let Ok(frame) = serde_json::from_str::<RequestFrame>(&text) else { continue };
                                        let reply = handler(&frame);
                                        let id = frame.id;
                                        let _ = frame_tx.send(frame);
                                        if let Some((status, body)) = reply {
                                            let response = json!({"id": id, "statusCode": status, "body": body});
                                            let _ = write.send(Message::Text(response.to_string())).await;
                                        }
                                    }
                                    command = commands.recv() => {
                                        match command.as_deref() {
                                            Ok(ServerCommand::Push(text)) => {
                                                let _ = write.send(Message::Text(text.clone())).await;
                                            }
                                            Ok(ServerCommand::Close) | Err(_) => {
                                                let _ = write.close().await;
                                                break;
                                            }
                                        }
                                    }
                                }
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            commands,
            frames,
            connections,
            shutdown,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send an event frame to every open connection
    pub fn push(&self, event: &str, message: Value) {
        let text = json!({"event": event, "message": message}).to_string();
        let _ = self.commands.send(Arc::new(ServerCommand::Push(text)));
    }

    /// Close every open connection; the listener keeps accepting
    pub fn close_connections(&self) {
        let _ = self.commands.send(Arc::new(ServerCommand::Close));
    }

    /// Next request frame the server received
    pub async fn next_frame(&mut self) -> Option<RequestFrame> {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn shutdown(self) {
        self.close_connections();
        let _ = self.shutdown.send(()).await;
    }
}
