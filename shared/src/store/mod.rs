//! Storage seam over the single application table.
//!
//! Every entity is a JSON document carrying its own `PK`/`SK` strings and,
//! for entities with an alternate lookup, a `GSI1PK` attribute. Handlers only
//! talk to [`Store`]; [`DynamoStore`] backs it with DynamoDB and
//! [`MemoryStore`] keeps the same semantics in process.

mod dynamo;
mod memory;

pub use dynamo::DynamoStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Document = serde_json::Map<String, Value>;

pub const PK: &str = "PK";
pub const SK: &str = "SK";
pub const GSI1PK: &str = "GSI1PK";
pub const GSI1_NAME: &str = "GSI1";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conditional check failed")]
    ConditionFailed,
    #[error("item is missing its key attributes")]
    MissingKey,
    #[error("DynamoDB request failed: {0}")]
    Backend(String),
    #[error("failed to convert item: {0}")]
    Codec(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    pub fn of(doc: &Document) -> Result<Self, StoreError> {
        let pk = doc.get(PK).and_then(Value::as_str).ok_or(StoreError::MissingKey)?;
        let sk = doc.get(SK).and_then(Value::as_str).ok_or(StoreError::MissingKey)?;
        Ok(Key::new(pk, sk))
    }
}

/// Precondition on the existence of the addressed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    NotExists,
    Exists,
}

/// A single-item update: SET, atomic increments and REMOVE on document paths.
///
/// Paths are dot separated (`authentication.loginAttempts`); each segment is
/// an attribute name, never an expression.
#[derive(Debug, Clone)]
pub struct Update {
    pub key: Key,
    pub sets: Vec<(String, Value)>,
    pub increments: Vec<(String, i64)>,
    pub removes: Vec<String>,
    pub condition: Condition,
}

impl Update {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            sets: Vec::new(),
            increments: Vec::new(),
            removes: Vec::new(),
            condition: Condition::Always,
        }
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sets.push((path.into(), value.into()));
        self
    }

    pub fn increment(mut self, path: impl Into<String>, delta: i64) -> Self {
        self.increments.push((path.into(), delta));
        self
    }

    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.removes.push(path.into());
        self
    }

    /// SET every non-null top-level field of a serialized patch
    pub fn set_fields<T: Serialize>(mut self, patch: &T) -> Result<Self, StoreError> {
        let value = serde_json::to_value(patch).map_err(|e| StoreError::Codec(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(StoreError::Codec("patch is not a JSON object".to_string()));
        };
        self.sets.extend(fields.into_iter().filter(|(_, v)| !v.is_null()));
        Ok(self)
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.increments.is_empty() && self.removes.is_empty()
    }
}

/// One page of a scan; `last_key` is set when more items remain
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Document>,
    pub last_key: Option<Key>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Document>, StoreError>;

    async fn put(&self, item: Document, condition: Condition) -> Result<(), StoreError>;

    /// Write all items or none of them
    async fn put_all(&self, items: Vec<(Document, Condition)>) -> Result<(), StoreError>;

    /// Items of one partition, optionally restricted to a sort key prefix,
    /// in ascending sort key order
    async fn query(&self, pk: &str, sk_prefix: Option<&str>) -> Result<Vec<Document>, StoreError>;

    /// Items whose `GSI1PK` equals `value`
    async fn query_index(&self, value: &str) -> Result<Vec<Document>, StoreError>;

    /// Evaluate up to `limit` items in key order starting after `start`,
    /// keeping those whose partition key starts with `pk_prefix`
    async fn scan(
        &self,
        pk_prefix: &str,
        limit: i32,
        start: Option<Key>,
    ) -> Result<Page, StoreError>;

    /// Apply the update and return the item as it is afterwards
    async fn update(&self, update: Update) -> Result<Document, StoreError>;

    async fn delete(&self, key: &Key, condition: Condition) -> Result<(), StoreError>;
}

/// Serialize an entity into a document and attach its keys
pub fn to_document<T: Serialize>(entity: &T, key: &Key) -> Result<Document, StoreError> {
    let value = serde_json::to_value(entity).map_err(|e| StoreError::Codec(e.to_string()))?;
    let Value::Object(mut doc) = value else {
        return Err(StoreError::Codec("entity is not a JSON object".to_string()));
    };
    doc.insert(PK.to_string(), Value::String(key.pk.clone()));
    doc.insert(SK.to_string(), Value::String(key.sk.clone()));
    Ok(doc)
}

pub fn from_document<T: serde::de::DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| StoreError::Codec(e.to_string()))
}
