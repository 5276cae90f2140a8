//! Entity graph normalizer
//!
//! Turns nested server payloads into a flat [`Payload`]: one bucket per
//! entity type, keyed by the pluralized type name, holding records with
//! unique ids. Embedded related entities are pulled out into their own
//! buckets and replaced by their ids.
//!
//! # Rules
//!
//! - A record without identity fails the whole injection; the payload passed
//!   in is left exactly as it was.
//! - The first record seen for an id wins. Later sightings are not inserted,
//!   but their relationships are still walked, so entities embedded only in a
//!   later sighting still surface.
//! - `ToOne` values that are objects are extracted; `ToMany` values must be
//!   lists and every object element is extracted. Plain ids pass through.
//! - The bucket for the injected type exists afterwards even when no records
//!   were given.
//!
//! # Termination
//!
//! The walk takes ownership of each embedded value as it descends, so every
//! node of the input tree is visited once. Owned JSON cannot form reference
//! cycles; self-similar nesting (a widget embedding a part embedding a copy
//! of the widget) ends at the duplicate-id check.
//!
//! # Examples
//!
//! ```rust
//! use entsync_core::normalize::Normalizer;
//! use entsync_core::schema::SchemaRegistry;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let schema = SchemaRegistry::new().belongs_to("widget", "owner", "user");
//! let normalizer = Normalizer::new(Arc::new(schema));
//!
//! let payload = normalizer
//!     .payload("widget", json!({"id": 1, "owner": {"id": "u1", "name": "Ada"}}))
//!     .unwrap();
//!
//! assert_eq!(
//!     payload.to_value(),
//!     json!({"widgets": [{"id": 1, "owner": "u1"}], "users": [{"id": "u1", "name": "Ada"}]})
//! );
//! ```

use crate::error::{Error, Result};
use crate::inflect::type_key;
use crate::logger::Logger;
use crate::schema::{Relationship, RelationshipKind, Schema};
use crate::types::{entity_id, record_id, Entity, ID_FIELD};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
struct Bucket {
    entity_type: String,
    records: Vec<Entity>,
    positions: HashMap<String, usize>,
}

/// Flat, deduplicated set of entities grouped by type key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    buckets: BTreeMap<String, Bucket>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records stored under `type_key`, in first-seen order
    pub fn records(&self, type_key: &str) -> &[Entity] {
        self.buckets
            .get(type_key)
            .map(|bucket| bucket.records.as_slice())
            .unwrap_or(&[])
    }

    /// Whether a bucket exists for `type_key`, even an empty one
    pub fn has_type(&self, type_key: &str) -> bool {
        self.buckets.contains_key(type_key)
    }

    pub fn get(&self, type_key: &str, id: &str) -> Option<&Entity> {
        let bucket = self.buckets.get(type_key)?;
        bucket
            .positions
            .get(id)
            .and_then(|&pos| bucket.records.get(pos))
    }

    pub fn contains(&self, type_key: &str, id: &str) -> bool {
        self.buckets
            .get(type_key)
            .map(|bucket| bucket.positions.contains_key(id))
            .unwrap_or(false)
    }

    /// Ids stored under `type_key`, in first-seen order
    pub fn ids(&self, type_key: &str) -> Vec<String> {
        self.records(type_key).iter().filter_map(record_id).collect()
    }

    pub fn type_keys(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    /// Entity type name behind a bucket key (`widgets` → `widget`)
    pub fn entity_type(&self, type_key: &str) -> Option<&str> {
        self.buckets
            .get(type_key)
            .map(|bucket| bucket.entity_type.as_str())
    }

    /// Iterate `(entity_type, records)` for every bucket
    pub fn buckets(&self) -> impl Iterator<Item = (&str, &[Entity])> {
        self.buckets
            .values()
            .map(|bucket| (bucket.entity_type.as_str(), bucket.records.as_slice()))
    }

    /// Total number of records across all buckets
    pub fn len(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `{typeKey: [record, ...], ...}`
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.buckets
                .iter()
                .map(|(key, bucket)| {
                    let records = bucket.records.iter().cloned().map(Value::Object).collect();
                    (key.clone(), Value::Array(records))
                })
                .collect(),
        )
    }

    fn ensure_bucket(&mut self, type_key: &str, entity_type: &str) {
        self.buckets
            .entry(type_key.to_string())
            .or_insert_with(|| Bucket {
                entity_type: entity_type.to_string(),
                ..Bucket::default()
            });
    }

    fn insert(&mut self, type_key: &str, id: String, record: Entity) -> Option<usize> {
        let bucket = self.buckets.get_mut(type_key)?;
        let pos = bucket.records.len();
        bucket.records.push(record);
        bucket.positions.insert(id, pos);
        Some(pos)
    }

    /// Lend a stored record out; its id stays indexed while it is away.
    fn take_record(&mut self, type_key: &str, pos: usize) -> Entity {
        self.buckets
            .get_mut(type_key)
            .and_then(|bucket| bucket.records.get_mut(pos))
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn restore_record(&mut self, type_key: &str, pos: usize, record: Entity) {
        if let Some(slot) = self
            .buckets
            .get_mut(type_key)
            .and_then(|bucket| bucket.records.get_mut(pos))
        {
            *slot = record;
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.buckets
                .iter()
                .map(|(key, bucket)| (key, &bucket.records)),
        )
    }
}

/// Flattens nested records into a [`Payload`] using a [`Schema`]
#[derive(Clone)]
pub struct Normalizer {
    schema: Arc<dyn Schema>,
    log: Logger,
}

impl Normalizer {
    pub fn new(schema: Arc<dyn Schema>) -> Self {
        Self::with_logger(schema, Logger::default().child("normalize"))
    }

    pub fn with_logger(schema: Arc<dyn Schema>, log: Logger) -> Self {
        Self { schema, log }
    }

    pub fn schema(&self) -> &Arc<dyn Schema> {
        &self.schema
    }

    /// Normalize `records` of `entity_type` into a fresh payload
    pub fn payload(&self, entity_type: &str, records: Value) -> Result<Payload> {
        let mut payload = Payload::new();
        self.inject(&mut payload, entity_type, records)?;
        Ok(payload)
    }

    /// Merge `records` of `entity_type` into `payload`
    ///
    /// `records` may be a single object, a list of objects, or null. On error
    /// `payload` is unchanged.
    pub fn inject(&self, payload: &mut Payload, entity_type: &str, records: Value) -> Result<()> {
        let mut scratch = payload.clone();
        match self.inject_records(&mut scratch, entity_type, records) {
            Ok(()) => {
                self.log.debug(format_args!(
                    "normalized `{}`: {} records in {} buckets",
                    entity_type,
                    scratch.len(),
                    scratch.buckets.len()
                ));
                *payload = scratch;
                Ok(())
            }
            Err(err) => {
                self.log
                    .warn(format_args!("failed to normalize `{}`: {}", entity_type, err));
                Err(err)
            }
        }
    }

    fn inject_records(&self, payload: &mut Payload, entity_type: &str, records: Value) -> Result<()> {
        let key = type_key(entity_type);
        payload.ensure_bucket(&key, entity_type);

        let records = match records {
            Value::Null => return Ok(()),
            Value::Array(items) => items,
            other => vec![other],
        };
        if records.is_empty() {
            return Ok(());
        }

        let relationships = self.schema.relationships(entity_type)?;
        let mut inserted = Vec::new();
        let mut repeated = Vec::new();

        for value in records {
            let record = match value {
                Value::Object(map) => map,
                other => {
                    return Err(Error::MalformedRecord(format!(
                        "expected a `{}` record, got {}",
                        key, other
                    )))
                }
            };
            let id = record_id(&record).ok_or_else(|| Error::MissingIdentity(key.clone()))?;

            if payload.contains(&key, &id) {
                repeated.push(record);
            } else if let Some(pos) = payload.insert(&key, id, record) {
                inserted.push(pos);
            }
        }

        if relationships.is_empty() {
            return Ok(());
        }

        for pos in inserted {
            let mut record = payload.take_record(&key, pos);
            let outcome =
                self.extract_embedded(payload, entity_type, &key, &mut record, &relationships);
            payload.restore_record(&key, pos, record);
            outcome?;
        }

        // Dropped after the walk: first write wins.
        for mut record in repeated {
            self.extract_embedded(payload, entity_type, &key, &mut record, &relationships)?;
        }

        Ok(())
    }

    fn extract_embedded(
        &self,
        payload: &mut Payload,
        entity_type: &str,
        key: &str,
        record: &mut Entity,
        relationships: &[Relationship],
    ) -> Result<()> {
        for relationship in relationships {
            let Some(value) = record.get_mut(&relationship.key) else {
                continue;
            };

            match &relationship.kind {
                RelationshipKind::Unknown(_) if value.is_null() => {}
                RelationshipKind::Unknown(kind) => {
                    return Err(Error::UnknownRelationshipKind {
                        entity_type: entity_type.to_string(),
                        key: relationship.key.clone(),
                        kind: kind.clone(),
                    })
                }
                RelationshipKind::ToOne => {
                    if value.is_object() {
                        let embedded = value.take();
                        *value = self.embed(payload, &relationship.target_type, embedded)?;
                    }
                }
                RelationshipKind::ToMany => match value {
                    Value::Null => {}
                    Value::Array(items) => {
                        for item in items.iter_mut().filter(|item| item.is_object()) {
                            let embedded = item.take();
                            *item = self.embed(payload, &relationship.target_type, embedded)?;
                        }
                    }
                    other => {
                        return Err(Error::MalformedRecord(format!(
                            "`{}.{}` must be a list, got {}",
                            key, relationship.key, other
                        )))
                    }
                },
            }
        }
        Ok(())
    }

    /// Inject one embedded record and return the id that replaces it.
    fn embed(&self, payload: &mut Payload, target_type: &str, embedded: Value) -> Result<Value> {
        let id = embedded
            .get(ID_FIELD)
            .filter(|id| entity_id(id).is_some())
            .cloned()
            .ok_or_else(|| Error::MissingIdentity(type_key(target_type)))?;
        self.inject_records(payload, target_type, embedded)?;
        Ok(id)
    }
}
