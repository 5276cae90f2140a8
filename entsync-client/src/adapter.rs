//! Adapter facade
//!
//! [`SyncAdapter`] is what an application's data layer talks to. It turns
//! CRUD calls into channel requests, normalizes every response into a
//! [`Payload`], feeds the local cache, and keeps the cache current by
//! listening for the server's push messages on every type it has touched.
//!
//! # Examples
//!
//! ```rust,no_run
//! use entsync_client::{AdapterBuilder, SyncConfig, WsChannel};
//! use entsync_core::SchemaRegistry;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> entsync_core::Result<()> {
//! let schema = SchemaRegistry::new().has_many("widget", "parts", "part");
//! let adapter = AdapterBuilder::new(
//!     Arc::new(WsChannel::new("ws://localhost:1337/socket")),
//!     Arc::new(schema),
//! )
//! .config(SyncConfig::default().with_namespace("/api"))
//! .build()?;
//!
//! let created = adapter.create_record("widget", json!({"name": "gear"})).await?;
//! println!("{:?}", created.ids("widgets"));
//!
//! adapter.destroy().await;
//! # Ok(())
//! # }
//! ```

use crate::batch::SubscriptionBatcher;
use crate::config::SyncConfig;
use crate::connection_state::{ConnectionEvent, ConnectionManager};
use crate::correlator::RequestCorrelator;
use crate::listener::ListenerRegistry;
use crate::store::EntityCache;
use crate::token::TokenGuard;
use entsync_core::types::entity_id;
use entsync_core::{inflect, Logger, Normalizer, Payload, PushMessage, PushVerb, Result, Verb};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast::error::RecvError;

pub(crate) struct AdapterParts {
    pub config: SyncConfig,
    pub connection: ConnectionManager,
    pub correlator: RequestCorrelator,
    pub token: TokenGuard,
    pub batcher: SubscriptionBatcher,
    pub normalizer: Normalizer,
    pub cache: Arc<dyn EntityCache>,
    pub log: Logger,
}

struct Inner {
    config: SyncConfig,
    connection: ConnectionManager,
    correlator: RequestCorrelator,
    token: TokenGuard,
    batcher: SubscriptionBatcher,
    normalizer: Normalizer,
    cache: Arc<dyn EntityCache>,
    watched: Mutex<HashSet<String>>,
    log: Logger,
}

#[derive(Clone)]
pub struct SyncAdapter {
    inner: Arc<Inner>,
}

impl SyncAdapter {
    /// Assemble the adapter and start following the connection
    ///
    /// Must be called inside a Tokio runtime.
    pub(crate) fn from_parts(parts: AdapterParts) -> Self {
        let adapter = Self {
            inner: Arc::new(Inner {
                config: parts.config,
                connection: parts.connection,
                correlator: parts.correlator,
                token: parts.token,
                batcher: parts.batcher,
                normalizer: parts.normalizer,
                cache: parts.cache,
                watched: Mutex::new(HashSet::new()),
                log: parts.log,
            }),
        };
        adapter.watch_connection();
        adapter
    }

    // A dropped connection may come back as a new server session whose
    // token differs, so the cached one is discarded.
    fn watch_connection(&self) {
        let mut events = self.inner.connection.subscribe();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConnectionEvent::Disconnected) => match weak.upgrade() {
                        Some(inner) => inner.token.invalidate(),
                        None => break,
                    },
                    Ok(ConnectionEvent::Destroyed) | Err(RecvError::Closed) => break,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                }
            }
        });
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        self.inner.connection.listeners()
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.inner.correlator
    }

    pub fn token(&self) -> &TokenGuard {
        &self.inner.token
    }

    pub fn batcher(&self) -> &SubscriptionBatcher {
        &self.inner.batcher
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.inner.normalizer
    }

    pub fn cache(&self) -> &Arc<dyn EntityCache> {
        &self.inner.cache
    }

    /// True until the channel is initialized and while any request is pending
    pub fn is_busy(&self) -> bool {
        self.inner.correlator.is_busy()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.connection.is_destroyed()
    }

    /// Tear the session down; every pending and future request fails with
    /// `Destroyed`
    pub async fn destroy(&self) {
        self.inner.connection.destroy().await;
        self.inner.log.debug("adapter destroyed");
    }

    /// URL of a type's collection, or of one record when `id` is given
    pub fn url_for(&self, entity_type: &str, id: Option<&str>) -> String {
        let config = &self.inner.config;
        let mut url = format!(
            "{}{}/{}",
            config.host,
            config.namespace,
            inflect::type_key(entity_type)
        );
        if let Some(id) = id {
            url.push('/');
            url.push_str(id);
        }
        url
    }

    /// Like [`url_for`](Self::url_for), and starts listening for the
    /// type's push messages
    pub async fn build_url(&self, entity_type: &str, id: Option<&str>) -> String {
        self.listen_to(entity_type).await;
        self.url_for(entity_type, id)
    }

    /// Keep the cache in sync with server pushes for `entity_type`
    ///
    /// Returns false if the type was already watched.
    pub async fn listen_to(&self, entity_type: &str) -> bool {
        let first = self
            .inner
            .watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type.to_string());
        if !first {
            return false;
        }

        let event = inflect::event_name(entity_type);
        let dispatcher = self.listeners().dispatcher();
        for verb in PushVerb::ALL {
            let weak = Arc::downgrade(&self.inner);
            let entity_type = entity_type.to_string();
            dispatcher
                .register(format!("{}.{}", event, verb.as_str()), move |message| {
                    on_push(weak.clone(), entity_type.clone(), verb, message)
                })
                .await;
        }

        self.listeners().listen_for(&event, true).await;
        self.inner
            .log
            .debug(format_args!("watching `{}` as `{}`", entity_type, event));
        true
    }

    /// Send a raw request, attaching the security token to mutating verbs
    pub async fn request(&self, verb: Verb, url: &str, data: Value) -> Result<Value> {
        let data = if verb.is_mutating() && self.inner.config.use_csrf {
            self.inner.token.attach_fresh(data).await?
        } else {
            data
        };
        self.inner.correlator.call(verb, url, data).await
    }

    pub async fn find(&self, entity_type: &str, id: &str) -> Result<Payload> {
        let url = self.build_url(entity_type, Some(id)).await;
        self.load(entity_type, Verb::Get, &url, json!({})).await
    }

    pub async fn find_all(&self, entity_type: &str) -> Result<Payload> {
        let url = self.build_url(entity_type, None).await;
        self.load(entity_type, Verb::Get, &url, json!({})).await
    }

    pub async fn find_query(&self, entity_type: &str, query: Value) -> Result<Payload> {
        let url = self.build_url(entity_type, None).await;
        self.load(entity_type, Verb::Get, &url, query).await
    }

    pub async fn find_many(&self, entity_type: &str, ids: &[String]) -> Result<Payload> {
        self.find_query(entity_type, json!({"where": {"id": ids}}))
            .await
    }

    pub async fn create_record(&self, entity_type: &str, data: Value) -> Result<Payload> {
        let url = self.build_url(entity_type, None).await;
        self.load(entity_type, Verb::Post, &url, data).await
    }

    pub async fn update_record(&self, entity_type: &str, id: &str, data: Value) -> Result<Payload> {
        let url = self.build_url(entity_type, Some(id)).await;
        self.load(entity_type, Verb::Put, &url, data).await
    }

    /// Delete a record on the server and unload it locally
    ///
    /// The server may answer with the deleted record or with nothing.
    pub async fn delete_record(&self, entity_type: &str, id: &str) -> Result<Payload> {
        let url = self.build_url(entity_type, Some(id)).await;
        let body = self.request(Verb::Delete, &url, json!({})).await?;
        let body = match body.get("id").and_then(entity_id) {
            Some(_) => body,
            None => Value::Null,
        };

        let payload = self.inner.normalizer.payload(entity_type, body)?;
        self.inner.cache.push_payload(&payload, true);
        self.inner.cache.unload(entity_type, id);
        Ok(payload)
    }

    async fn load(&self, entity_type: &str, verb: Verb, url: &str, data: Value) -> Result<Payload> {
        let body = self.request(verb, url, data).await?;
        let payload = self.inner.normalizer.payload(entity_type, body)?;
        self.inner.cache.push_payload(&payload, true);
        Ok(payload)
    }
}

async fn on_push(inner: Weak<Inner>, entity_type: String, verb: PushVerb, message: PushMessage) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    match verb {
        PushVerb::Created | PushVerb::Updated => {
            let Some(Value::Object(mut data)) = message.data else {
                inner.log.debug(format_args!(
                    "`{}` {} push without data ignored",
                    entity_type,
                    verb.as_str()
                ));
                return;
            };
            let has_id = data.get("id").and_then(entity_id).is_some();
            if !has_id {
                if let Some(id) = message.id {
                    data.insert("id".to_string(), id);
                }
            }

            match inner.normalizer.payload(&entity_type, Value::Object(data)) {
                Ok(payload) => inner.cache.push_payload(&payload, false),
                Err(err) => inner.log.warn(format_args!(
                    "cannot apply `{}` {} push: {}",
                    entity_type,
                    verb.as_str(),
                    err
                )),
            }
        }
        PushVerb::Destroyed => {
            if let Some(id) = message.entity_id() {
                inner.cache.unload(&entity_type, &id);
            }
        }
    }
}
