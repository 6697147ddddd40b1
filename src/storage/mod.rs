//! Storage module for owner-scoped record persistence.
//!
//! Two interchangeable backends implement the same contract:
//! - Guest scope: every (collection, owner) pair is one JSON array stored
//!   under a single key in the Sled embedded database, newest first
//! - Cloud scope: every record is an independent document in a remote
//!   document store, queried by owner and sorted by creation time
//!
//! Both backends speak in terms of [`Record`], which carries the three
//! fields the storage layer owns (`id`, `ownerId`, `createdAt`) plus a
//! free-form payload the storage layer never inspects.

mod cloud_store;
mod guest_store;
mod memory;
mod remote;

pub use cloud_store::{CloudStore, DocumentClient};
pub use guest_store::GuestStore;
pub use memory::MemoryDocumentClient;
pub use remote::HttpDocumentClient;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Free-form record fields
pub type Payload = Map<String, Value>;

/// Field names owned by the storage layer
pub const FIELD_ID: &str = "id";
pub const FIELD_OWNER_ID: &str = "ownerId";
pub const FIELD_CREATED_AT: &str = "createdAt";

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Item not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),
}

impl StorageError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        StorageError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A persisted item: storage-owned identity fields plus an opaque payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub owner_id: String,
    /// RFC 3339 timestamp, set once at creation
    pub created_at: String,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        created_at: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            created_at: created_at.into(),
            payload: strip_reserved(payload),
        }
    }

    /// Shallow merge: top-level fields in `patch` replace existing ones.
    /// Identity fields are immutable and ignored.
    pub fn merge(&mut self, patch: &Payload) {
        for (key, value) in patch {
            if is_reserved(key) {
                continue;
            }
            self.payload.insert(key.clone(), value.clone());
        }
    }

    /// Build a record from a remote document body and its assigned id
    pub fn from_document(id: impl Into<String>, mut fields: Payload) -> StorageResult<Self> {
        fields.insert(FIELD_ID.to_string(), Value::String(id.into()));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    /// Document body as the remote store sees it: payload plus owner and timestamp
    pub fn to_document(&self) -> Payload {
        let mut fields = self.payload.clone();
        fields.insert(
            FIELD_OWNER_ID.to_string(),
            Value::String(self.owner_id.clone()),
        );
        fields.insert(
            FIELD_CREATED_AT.to_string(),
            Value::String(self.created_at.clone()),
        );
        fields
    }
}

fn is_reserved(key: &str) -> bool {
    key == FIELD_ID || key == FIELD_OWNER_ID || key == FIELD_CREATED_AT
}

fn strip_reserved(mut payload: Payload) -> Payload {
    payload.retain(|key, _| !is_reserved(key));
    payload
}

/// Current time in the record timestamp format
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Guest-scope key for a (collection, owner) pair
pub fn guest_key(collection: &str, owner_id: &str) -> String {
    format!("guest_{}_{}", collection, owner_id)
}

/// The four-operation record contract shared by both scopes, plus a
/// single-record read.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// All records of `owner_id` in `collection`, newest first
    async fn list(&self, collection: &str, owner_id: &str) -> StorageResult<Vec<Record>>;

    /// One record, or `None` when absent from the owner's scope
    async fn get(&self, collection: &str, id: &str, owner_id: &str)
        -> StorageResult<Option<Record>>;

    /// Create a record, assigning id, owner and creation time
    async fn create(
        &self,
        collection: &str,
        owner_id: &str,
        payload: Payload,
    ) -> StorageResult<Record>;

    /// Merge `patch` into an existing record; `NotFound` when it is absent
    async fn update(
        &self,
        collection: &str,
        id: &str,
        owner_id: &str,
        patch: Payload,
    ) -> StorageResult<Record>;

    /// Remove a record; absent ids are a no-op. Returns the id.
    async fn delete(&self, collection: &str, id: &str, owner_id: &str) -> StorageResult<String>;
}

/// Configuration for the guest storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the Sled database directory
    pub path: String,
    /// Cache size in bytes (default: 64MB)
    pub cache_size: u64,
    /// Flush interval in milliseconds (0 disables periodic flushing)
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/mindcycle.sled".to_string(),
            cache_size: 64 * 1024 * 1024,
            flush_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_flush_interval(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }
}
