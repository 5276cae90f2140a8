//! In-process channel example
//!
//! Implements the `Channel` trait on top of a small in-memory backend, then
//! drives an adapter against it: nested responses are normalized into the
//! cache, and a server push updates a cached record.
//!
//! Run with: cargo run --example in_process

use async_trait::async_trait;
use entsync::client::{listener_hook, ListenerHook};
use entsync::core::{RawResponse, Verb};
use entsync::{AdapterBuilder, Channel, ChannelEvent, MemoryStore, SchemaRegistry, SyncConfig};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Backend living in the same process
struct LocalChannel {
    connected: AtomicBool,
    events: broadcast::Sender<ChannelEvent>,
    hooks: Mutex<HashMap<String, ListenerHook>>,
}

impl LocalChannel {
    fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            connected: AtomicBool::new(false),
            events,
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// Play the server pushing a change
    async fn push(&self, event: &str, message: Value) {
        let hook = self.hooks.lock().unwrap().get(event).cloned();
        if let Some(hook) = hook {
            hook(message).await;
        }
    }

    fn answer(verb: Verb, url: &str, data: &Value) -> RawResponse {
        match (verb, url) {
            (Verb::Get, "/csrfToken") => RawResponse::ok(json!({"_csrf": "local-token"})),
            (Verb::Get, "/posts") => RawResponse::ok(json!([{
                "id": 1,
                "title": "hello",
                "author": {"id": "ada", "name": "Ada"},
                "comments": [
                    {"id": 10, "body": "first", "author": {"id": "bob", "name": "Bob"}},
                    {"id": 11, "body": "second", "author": "ada"}
                ]
            }])),
            (Verb::Post, "/posts") => {
                let mut record = data.clone();
                record["id"] = json!(2);
                RawResponse::new(201, record)
            }
            _ => RawResponse::ok(json!({})),
        }
    }
}

#[async_trait]
impl Channel for LocalChannel {
    async fn ready(&self) {}

    fn connect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ChannelEvent::Connected);
        }
    }

    fn reconnect(&self) {
        self.connect();
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(ChannelEvent::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_connecting(&self) -> bool {
        false
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn add_listener(&self, event: &str, hook: ListenerHook) {
        self.hooks.lock().unwrap().insert(event.to_string(), hook);
    }

    fn remove_listener(&self, event: &str) {
        self.hooks.lock().unwrap().remove(event);
    }

    async fn request(&self, verb: Verb, url: &str, data: Value) -> entsync::Result<RawResponse> {
        tracing::info!(%verb, url, "local request");
        Ok(Self::answer(verb, url, &data))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let schema = SchemaRegistry::new()
        .belongs_to("post", "author", "person")
        .has_many("post", "comments", "comment")
        .belongs_to("comment", "author", "person");

    let channel = Arc::new(LocalChannel::new());
    let store = MemoryStore::new();
    let adapter = AdapterBuilder::new(channel.clone(), Arc::new(schema))
        .config(SyncConfig::default().with_debounce(Duration::from_millis(10)))
        .cache(Arc::new(store.clone()))
        .build()?;

    let posts = adapter.find_all("post").await?;
    println!("Normalized payload:\n{}\n", serde_json::to_string_pretty(&posts)?);
    println!("People in cache: {}", store.all("person").len());

    let created = adapter
        .create_record("post", json!({"title": "second post"}))
        .await?;
    println!("Created post ids: {:?}", created.ids("posts"));

    // A push for a type the adapter listens to lands in the cache.
    channel
        .push(
            "post",
            json!({"verb": "updated", "id": 1, "data": {"title": "hello, edited"}}),
        )
        .await;
    println!("Post 1 after push: {:?}", store.get("post", "1"));

    // Hooks can also be attached by hand for events nothing else handles.
    channel.add_listener(
        "announcement",
        listener_hook(|message| async move {
            println!("Announcement: {}", message);
        }),
    );
    channel
        .push("announcement", json!({"verb": "created", "data": "maintenance at 5pm"}))
        .await;

    adapter.destroy().await;
    Ok(())
}
