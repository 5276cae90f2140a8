//! WebSocket channel
//!
//! [`WsChannel`] implements [`Channel`] over `tokio-tungstenite`.
//!
//! # Wire Format
//!
//! Every frame is a JSON text message.
//!
//! ```text
//! client → server   {"id": 4, "method": "post", "url": "/widgets", "data": {...}}
//! server → client   {"id": 4, "statusCode": 201, "body": {...}}
//! server → client   {"event": "widget", "message": {"verb": "created", ...}}
//! ```
//!
//! Responses are matched to requests by `id` through [`PendingRequests`].
//! Event frames go to the hook attached for the event; hooks run one after
//! another on a separate task, so a hook may issue requests of its own
//! without stalling the reader.
//!
//! # Reconnection
//!
//! Connection attempts follow the channel's [`Backoff`]. An unexpected drop
//! fails every pending request with [`Error::ConnectionClosed`], reports
//! [`ChannelEvent::Disconnected`], and starts a new attempt cycle unless the
//! policy is [`Backoff::Never`]. `disconnect()` never reconnects.

use crate::channel::{Channel, ChannelEvent, ListenerHook};
use crate::reconnect::Backoff;
use crate::request::PendingRequests;
use async_trait::async_trait;
use entsync_core::{codec, Error, Logger, RawResponse, RequestFrame, Result, ServerFrame, Verb};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type Delivery = (ListenerHook, Value);

#[derive(Default)]
struct Link {
    connected: bool,
    connecting: bool,
    manual_close: bool,
}

struct Shared {
    url: String,
    backoff: Backoff,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    pending: PendingRequests,
    hooks: Mutex<HashMap<String, ListenerHook>>,
    events: broadcast::Sender<ChannelEvent>,
    link: Mutex<Link>,
    task: Mutex<Option<JoinHandle<()>>>,
    log: Logger,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hooks(&self) -> MutexGuard<'_, HashMap<String, ListenerHook>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }
}

/// [`Channel`] over a WebSocket connection
pub struct WsChannel {
    shared: Arc<Shared>,
}

impl WsChannel {
    /// Channel to `url` with the default [`Backoff`]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_backoff(url, Backoff::default())
    }

    pub fn with_backoff(url: impl Into<String>, backoff: Backoff) -> Self {
        Self::with_logger(url, backoff, Logger::default().child("ws"))
    }

    pub fn with_logger(url: impl Into<String>, backoff: Backoff, log: Logger) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                backoff,
                sink: tokio::sync::Mutex::new(None),
                pending: PendingRequests::new(),
                hooks: Mutex::new(HashMap::new()),
                events,
                link: Mutex::new(Link::default()),
                task: Mutex::new(None),
                log,
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn backoff(&self) -> &Backoff {
        &self.shared.backoff
    }

    /// Requests waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    fn start(&self) {
        {
            let mut link = self.shared.link();
            if link.connected || link.connecting {
                return;
            }
            link.connecting = true;
            link.manual_close = false;
        }
        // A previous run has already cleared the link flags and is exiting
        // on its own.
        let run = tokio::spawn(run(self.shared.clone()));
        *self.shared.task() = Some(run);
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        if let Some(run) = self.shared.task().take() {
            run.abort();
        }
    }
}

#[async_trait]
impl Channel for WsChannel {
    async fn ready(&self) {}

    fn connect(&self) {
        self.start();
    }

    fn reconnect(&self) {
        self.start();
    }

    fn disconnect(&self) {
        let was_up = {
            let mut link = self.shared.link();
            link.manual_close = true;
            let was_up = link.connected || link.connecting;
            link.connected = false;
            link.connecting = false;
            was_up
        };

        if let Some(run) = self.shared.task().take() {
            run.abort();
        }
        let failed = self.shared.pending.fail_all(Error::ConnectionClosed);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let shared = self.shared.clone();
            runtime.spawn(async move {
                if let Some(mut sink) = shared.sink.lock().await.take() {
                    let _ = sink.close().await;
                }
            });
        }

        if was_up {
            self.shared.log.info(format_args!(
                "disconnected from {} ({} requests failed)",
                self.shared.url, failed
            ));
            self.shared.emit(ChannelEvent::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.link().connected
    }

    fn is_connecting(&self) -> bool {
        self.shared.link().connecting
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    fn add_listener(&self, event: &str, hook: ListenerHook) {
        self.shared.hooks().insert(event.to_string(), hook);
    }

    fn remove_listener(&self, event: &str) {
        self.shared.hooks().remove(event);
    }

    async fn request(&self, verb: Verb, url: &str, data: Value) -> Result<RawResponse> {
        if !self.is_connected() {
            return Err(Error::ConnectionClosed);
        }

        let pending = &self.shared.pending;
        let id = pending.next_id();
        let text = codec::encode_request(&RequestFrame {
            id,
            method: verb,
            url: url.to_string(),
            data,
        })?;

        let rx = pending.register(id);
        let _forget = ForgetOnDrop { pending, id };

        {
            let mut sink = self.shared.sink.lock().await;
            let sink = sink.as_mut().ok_or(Error::ConnectionClosed)?;
            sink.send(Message::Text(text))
                .await
                .map_err(|e| Error::WebSocket(e.to_string()))?;
        }

        rx.await.map_err(|_| Error::ConnectionClosed)?
    }
}

/// Removes an abandoned waiter, e.g. after the caller timed out.
struct ForgetOnDrop<'a> {
    pending: &'a PendingRequests,
    id: u64,
}

impl Drop for ForgetOnDrop<'_> {
    fn drop(&mut self) {
        self.pending.forget(self.id);
    }
}

async fn run(shared: Arc<Shared>) {
    let mut after_drop = false;

    loop {
        let Some(stream) = establish(&shared, after_drop).await else {
            shared.link().connecting = false;
            shared
                .log
                .error(format_args!("giving up connecting to {}", shared.url));
            shared.emit(ChannelEvent::Disconnected);
            return;
        };

        let (sink, source) = stream.split();
        *shared.sink.lock().await = Some(sink);
        {
            let mut link = shared.link();
            link.connected = true;
            link.connecting = false;
        }
        shared.log.info(format_args!("connected to {}", shared.url));
        shared.emit(ChannelEvent::Connected);

        let (deliveries, queue) = mpsc::unbounded_channel();
        tokio::spawn(pump(queue));
        read(&shared, source, deliveries).await;

        shared.sink.lock().await.take();
        let failed = shared.pending.fail_all(Error::ConnectionClosed);
        let again = {
            let mut link = shared.link();
            link.connected = false;
            let again = !link.manual_close && shared.backoff.retries();
            link.connecting = again;
            again
        };
        shared.log.warn(format_args!(
            "connection to {} lost ({} requests failed)",
            shared.url, failed
        ));
        shared.emit(ChannelEvent::Disconnected);

        if !again {
            return;
        }
        after_drop = true;
    }
}

async fn establish(shared: &Shared, after_drop: bool) -> Option<WsStream> {
    let mut attempt = 0;
    loop {
        let delay = shared.backoff.delay_for(attempt)?;
        if attempt > 0 || after_drop {
            tokio::time::sleep(delay).await;
        }

        match connect_async(shared.url.as_str()).await {
            Ok((stream, _)) => return Some(stream),
            Err(e) => shared.log.warn(format_args!(
                "connect attempt {} to {} failed: {}",
                attempt + 1,
                shared.url,
                e
            )),
        }
        attempt += 1;
    }
}

async fn read(shared: &Shared, mut source: WsSource, deliveries: mpsc::UnboundedSender<Delivery>) {
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                shared.log.debug("connection closed by server");
                break;
            }
            Err(e) => {
                shared.log.warn(format_args!("websocket error: {}", e));
                break;
            }
            Ok(_) => continue,
        };

        match codec::decode(&text) {
            Ok(ServerFrame::Response { id, status, body }) => {
                if !shared.pending.complete(id, RawResponse::new(status, body)) {
                    shared
                        .log
                        .debug(format_args!("response {} has no waiter", id));
                }
            }
            Ok(ServerFrame::Event { event, message }) => {
                let hook = shared.hooks().get(&event).cloned();
                match hook {
                    Some(hook) => {
                        let _ = deliveries.send((hook, message));
                    }
                    None => shared
                        .log
                        .debug(format_args!("no listener for `{}`", event)),
                }
            }
            Err(e) => shared.log.warn(format_args!("ignoring frame: {}", e)),
        }
    }
}

async fn pump(mut queue: mpsc::UnboundedReceiver<Delivery>) {
    while let Some((hook, message)) = queue.recv().await {
        hook(message).await;
    }
}
