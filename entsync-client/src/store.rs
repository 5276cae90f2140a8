//! Local entity cache
//!
//! The adapter hands every normalized [`Payload`] to an [`EntityCache`].
//! [`MemoryStore`] is the in-process implementation used unless the
//! application provides its own.

use crate::batch::SubscriptionBatcher;
use entsync_core::types::record_id;
use entsync_core::{Entity, Payload};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Destination of normalized server data
pub trait EntityCache: Send + Sync + 'static {
    /// Merge every record of `payload`; with `subscribe`, each record is
    /// also queued for a server subscription
    fn push_payload(&self, payload: &Payload, subscribe: bool);

    /// Drop one record; returns whether it was present
    fn unload(&self, entity_type: &str, id: &str) -> bool;
}

type Records = HashMap<String, BTreeMap<String, Entity>>;

/// Records held in memory, per entity type and id
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<Records>>,
    subscriber: Option<SubscriptionBatcher>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that schedules subscriptions through `batcher`
    pub fn with_subscriptions(batcher: SubscriptionBatcher) -> Self {
        Self {
            records: Arc::default(),
            subscriber: Some(batcher),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Records> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Records> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, entity_type: &str, id: &str) -> Option<Entity> {
        self.read()
            .get(entity_type)
            .and_then(|records| records.get(id))
            .cloned()
    }

    /// Every record of `entity_type`, ordered by id
    pub fn all(&self, entity_type: &str) -> Vec<Entity> {
        self.read()
            .get(entity_type)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of records across all types
    pub fn len(&self) -> usize {
        self.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue subscriptions for `ids`; returns how many were accepted
    pub fn subscribe<'a>(&self, entity_type: &str, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let Some(batcher) = &self.subscriber else {
            return 0;
        };
        ids.into_iter()
            .filter(|id| batcher.schedule_subscribe(entity_type, id))
            .count()
    }
}

impl EntityCache for MemoryStore {
    fn push_payload(&self, payload: &Payload, subscribe: bool) {
        let mut pushed: Vec<(String, String)> = Vec::new();
        {
            let mut store = self.write();
            for (entity_type, records) in payload.buckets() {
                let bucket = store.entry(entity_type.to_string()).or_default();
                for record in records {
                    let Some(id) = record_id(record) else {
                        continue;
                    };
                    let stored = bucket.entry(id.clone()).or_default();
                    for (field, value) in record {
                        stored.insert(field.clone(), value.clone());
                    }
                    pushed.push((entity_type.to_string(), id));
                }
            }
        }

        if subscribe {
            for (entity_type, id) in &pushed {
                self.subscribe(entity_type, [id.as_str()]);
            }
        }
    }

    fn unload(&self, entity_type: &str, id: &str) -> bool {
        self.write()
            .get_mut(entity_type)
            .and_then(|records| records.remove(id))
            .is_some()
    }
}
