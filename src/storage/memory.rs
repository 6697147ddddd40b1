//! In-process document store with the remote store's query semantics.
//!
//! Used when no remote document store is configured, and in tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::cloud_store::DocumentClient;
use super::{Payload, Record, StorageError, StorageResult, FIELD_CREATED_AT, FIELD_OWNER_ID};

struct StoredDocument {
    /// Insertion sequence, breaks `createdAt` ties
    seq: u64,
    fields: Payload,
}

/// Documents grouped by collection, keyed by id
#[derive(Default)]
pub struct MemoryDocumentClient {
    collections: DashMap<String, HashMap<String, StoredDocument>>,
    next_seq: AtomicU64,
}

impl MemoryDocumentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection, across all owners
    #[cfg(test)]
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}

fn field_str<'a>(fields: &'a Payload, key: &str) -> &'a str {
    fields.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

#[async_trait]
impl DocumentClient for MemoryDocumentClient {
    async fn query_by_owner(&self, collection: &str, owner_id: &str) -> StorageResult<Vec<Record>> {
        let Some(docs) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<(&String, &StoredDocument)> = docs
            .iter()
            .filter(|(_, doc)| field_str(&doc.fields, FIELD_OWNER_ID) == owner_id)
            .collect();
        matching.sort_by(|(_, a), (_, b)| {
            field_str(&b.fields, FIELD_CREATED_AT)
                .cmp(field_str(&a.fields, FIELD_CREATED_AT))
                .then(b.seq.cmp(&a.seq))
        });

        matching
            .into_iter()
            .map(|(id, doc)| Record::from_document(id.clone(), doc.fields.clone()))
            .collect()
    }

    async fn get_document(&self, collection: &str, id: &str) -> StorageResult<Option<Record>> {
        let Some(docs) = self.collections.get(collection) else {
            return Ok(None);
        };
        docs.get(id)
            .map(|doc| Record::from_document(id, doc.fields.clone()))
            .transpose()
    }

    async fn add_document(&self, collection: &str, fields: Payload) -> StorageResult<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), StoredDocument { seq, fields });
        Ok(id)
    }

    async fn patch_document(
        &self,
        collection: &str,
        id: &str,
        fields: Payload,
    ) -> StorageResult<()> {
        let mut docs = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| StorageError::not_found(collection, id))?;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found(collection, id))?;
        doc.fields.extend(fields);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> StorageResult<()> {
        if let Some(mut docs) = self.collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(owner: &str, created_at: &str) -> Payload {
        json!({ "ownerId": owner, "createdAt": created_at })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_query_filters_owner_and_sorts_descending() {
        let client = MemoryDocumentClient::new();
        let old = client
            .add_document("posts", document("u1", "2024-01-01T00:00:00.000Z"))
            .await
            .unwrap();
        client
            .add_document("posts", document("u2", "2024-01-02T00:00:00.000Z"))
            .await
            .unwrap();
        let new = client
            .add_document("posts", document("u1", "2024-01-03T00:00:00.000Z"))
            .await
            .unwrap();

        let ids: Vec<_> = client
            .query_by_owner("posts", "u1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![new, old]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_list_latest_insert_first() {
        let client = MemoryDocumentClient::new();
        let first = client
            .add_document("posts", document("u1", "2024-01-01T00:00:00.000Z"))
            .await
            .unwrap();
        let second = client
            .add_document("posts", document("u1", "2024-01-01T00:00:00.000Z"))
            .await
            .unwrap();

        let ids: Vec<_> = client
            .query_by_owner("posts", "u1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn test_patch_missing_document_fails() {
        let client = MemoryDocumentClient::new();
        let result = client.patch_document("posts", "x", Payload::new()).await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_missing_document_is_ok() {
        let client = MemoryDocumentClient::new();
        assert!(client.delete_document("posts", "x").await.is_ok());
    }
}
