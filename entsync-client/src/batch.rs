//! Debounced subscription batching
//!
//! Every record that lands in the local cache should be subscribed to on the
//! server, but one request per record would flood the channel. The batcher
//! collects ids per entity type and, once no new id has arrived for the
//! debounce window, sends them all in a single request:
//!
//! ```json
//! { "widgets": ["1", "2"], "people": ["7"] }
//! ```
//!
//! A failed flush is logged and dropped. The ids are not re-queued.

use crate::correlator::RequestCorrelator;
use crate::metrics::ClientMetrics;
use crate::token::TokenGuard;
use entsync_core::{inflect, Logger, Result, Verb};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Decides whether a record of `(entity_type, id)` gets subscribed
pub type SubscribePredicate = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Ids waiting to be subscribed, grouped by entity type
///
/// Each group keeps first-seen order and holds every id at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSubscriptions {
    groups: BTreeMap<String, Vec<String>>,
}

impl PendingSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already pending
    pub fn insert(&mut self, entity_type: &str, id: &str) -> bool {
        let ids = self.groups.entry(entity_type.to_string()).or_default();
        if ids.iter().any(|pending| pending == id) {
            return false;
        }
        ids.push(id.to_string());
        true
    }

    pub fn ids(&self, entity_type: &str) -> &[String] {
        self.groups
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Total number of pending ids
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Vec::is_empty)
    }

    /// Request body: type key → ids
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        for (entity_type, ids) in &self.groups {
            if ids.is_empty() {
                continue;
            }
            let ids = ids.iter().cloned().map(Value::String).collect();
            body.insert(inflect::type_key(entity_type), Value::Array(ids));
        }
        Value::Object(body)
    }
}

struct Inner {
    correlator: RequestCorrelator,
    token: TokenGuard,
    use_token: bool,
    endpoint: Option<(Verb, String)>,
    window: Duration,
    predicate: Option<SubscribePredicate>,
    pending: Mutex<PendingSubscriptions>,
    timer: Mutex<Option<JoinHandle<()>>>,
    log: Logger,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, PendingSubscriptions> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = timer.take() {
            timer.abort();
        }
    }
}

/// Collects subscription ids and flushes them in debounced batches
#[derive(Clone)]
pub struct SubscriptionBatcher {
    inner: Arc<Inner>,
}

impl SubscriptionBatcher {
    /// `endpoint` of `None` disables subscriptions entirely
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        correlator: RequestCorrelator,
        token: TokenGuard,
        use_token: bool,
        endpoint: Option<(Verb, String)>,
        window: Duration,
        predicate: Option<SubscribePredicate>,
        log: Logger,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                correlator,
                token,
                use_token,
                endpoint,
                window,
                predicate,
                pending: Mutex::new(PendingSubscriptions::new()),
                timer: Mutex::new(None),
                log,
                metrics,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.endpoint.is_some()
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Snapshot of the ids waiting for the next flush
    pub fn pending(&self) -> PendingSubscriptions {
        self.inner.pending().clone()
    }

    /// Queue `id` and re-arm the debounce timer
    ///
    /// Returns false when the id is ignored: empty, subscriptions disabled,
    /// or rejected by the predicate. Must be called inside a Tokio runtime.
    pub fn schedule_subscribe(&self, entity_type: &str, id: &str) -> bool {
        if id.is_empty() || !self.is_enabled() {
            return false;
        }
        if let Some(predicate) = &self.inner.predicate {
            if !predicate(entity_type, id) {
                return false;
            }
        }

        if self.inner.pending().insert(entity_type, id) {
            self.inner
                .log
                .debug(format_args!("queued subscription {}#{}", entity_type, id));
        }
        self.arm();
        true
    }

    fn arm(&self) {
        let weak = Arc::downgrade(&self.inner);
        let window = self.inner.window;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            fire(weak);
        });

        let previous = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Send everything pending now; returns how many ids were sent
    ///
    /// The pending set is swapped out before the request, so ids queued
    /// while it is in flight go into the next batch.
    pub async fn flush(&self) -> Result<usize> {
        let batch = std::mem::take(&mut *self.inner.pending());
        let Some((verb, url)) = &self.inner.endpoint else {
            return Ok(0);
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        let outcome = self.send(*verb, url, batch.to_body()).await;
        match &outcome {
            Ok(()) => {
                self.inner
                    .log
                    .debug(format_args!("subscribed to {} records", count));
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_subscription_batch(count as u64);
                }
            }
            Err(err) => {
                self.inner.log.warn(format_args!(
                    "dropping subscription batch of {} records: {}",
                    count, err
                ));
            }
        }
        outcome.map(|()| count)
    }

    async fn send(&self, verb: Verb, url: &str, body: Value) -> Result<()> {
        let body = if self.inner.use_token {
            self.inner.token.attach_fresh(body).await?
        } else {
            body
        };
        self.inner.correlator.call(verb, url, body).await?;
        Ok(())
    }
}

// The flush runs on its own task so re-arming the timer cannot abort it.
fn fire(inner: Weak<Inner>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let batcher = SubscriptionBatcher { inner };
    tokio::spawn(async move {
        let _ = batcher.flush().await;
    });
}
