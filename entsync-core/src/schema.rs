//! Entity type schema
//!
//! The normalizer never owns type definitions; it asks a [`Schema`] for the
//! relationships of a type each time it visits a record of that type.
//! [`SchemaRegistry`] is the in-memory implementation, loadable from code or
//! from a JSON document:
//!
//! ```rust
//! use entsync_core::schema::{RelationshipKind, Schema, SchemaRegistry};
//! use serde_json::json;
//!
//! let schema = SchemaRegistry::from_json(json!({
//!     "widget": [
//!         {"key": "owner", "kind": "belongsTo", "type": "user"},
//!         {"key": "parts", "kind": "hasMany", "type": "part"}
//!     ],
//!     "part": []
//! }))
//! .unwrap();
//!
//! let relationships = schema.relationships("widget").unwrap();
//! assert_eq!(relationships[1].kind, RelationshipKind::ToMany);
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Cardinality of a relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    ToOne,
    ToMany,
    /// A declared kind that is neither; only an error once a record carries
    /// the field
    Unknown(String),
}

impl RelationshipKind {
    /// Resolve a declared kind name
    pub fn parse(kind: &str) -> Self {
        match kind {
            "toOne" | "belongsTo" => RelationshipKind::ToOne,
            "toMany" | "hasMany" => RelationshipKind::ToMany,
            other => RelationshipKind::Unknown(other.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, RelationshipKind::Unknown(_))
    }
}

/// A resolved relationship of an entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub key: String,
    pub kind: RelationshipKind,
    pub target_type: String,
}

/// Source of relationship metadata
pub trait Schema: Send + Sync {
    /// Relationships of `entity_type`, in declaration order
    ///
    /// Types the schema does not know have no relationships. Kinds are
    /// reported as declared; [`RelationshipKind::Unknown`] is left to the
    /// caller.
    fn relationships(&self, entity_type: &str) -> Result<Vec<Relationship>>;
}

/// A relationship as declared, before its kind is resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDecl {
    pub key: String,
    pub kind: String,
    #[serde(rename = "type")]
    pub target_type: String,
}

/// In-memory schema
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, Vec<RelationshipDecl>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an entity type with no relationships (yet)
    pub fn entity(mut self, entity_type: impl Into<String>) -> Self {
        self.types.entry(entity_type.into()).or_default();
        self
    }

    /// Declare a relationship on `entity_type`
    pub fn relationship(
        mut self,
        entity_type: impl Into<String>,
        key: impl Into<String>,
        kind: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        self.types
            .entry(entity_type.into())
            .or_default()
            .push(RelationshipDecl {
                key: key.into(),
                kind: kind.into(),
                target_type: target_type.into(),
            });
        self
    }

    /// Shorthand for a `belongsTo` relationship
    pub fn belongs_to(
        self,
        entity_type: impl Into<String>,
        key: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        self.relationship(entity_type, key, "belongsTo", target_type)
    }

    /// Shorthand for a `hasMany` relationship
    pub fn has_many(
        self,
        entity_type: impl Into<String>,
        key: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        self.relationship(entity_type, key, "hasMany", target_type)
    }

    /// Load from `{"type": [{"key", "kind", "type"}, ...], ...}`
    pub fn from_json(value: Value) -> Result<Self> {
        let types: HashMap<String, Vec<RelationshipDecl>> = serde_json::from_value(value)?;
        Ok(Self { types })
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.types.contains_key(entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl Schema for SchemaRegistry {
    fn relationships(&self, entity_type: &str) -> Result<Vec<Relationship>> {
        let Some(decls) = self.types.get(entity_type) else {
            return Ok(Vec::new());
        };

        Ok(decls
            .iter()
            .map(|decl| Relationship {
                key: decl.key.clone(),
                kind: RelationshipKind::parse(&decl.kind),
                target_type: decl.target_type.clone(),
            })
            .collect())
    }
}
