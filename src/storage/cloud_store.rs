//! Cloud-scope storage over a remote document store.
//!
//! Every record is one document addressed by (collection, id). Documents
//! carry `ownerId` and `createdAt` alongside the payload; listing filters on
//! `ownerId` and sorts by `createdAt` descending. The store assigns ids.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{
    strip_reserved, timestamp_now, Payload, Record, RecordBackend, StorageError, StorageResult,
};

/// Boundary to a remote document database
#[async_trait]
pub trait DocumentClient: Send + Sync {
    /// Documents with `ownerId == owner_id`, ordered by `createdAt` descending
    async fn query_by_owner(&self, collection: &str, owner_id: &str) -> StorageResult<Vec<Record>>;

    /// One document by id, regardless of owner
    async fn get_document(&self, collection: &str, id: &str) -> StorageResult<Option<Record>>;

    /// Store a new document body and return the id the store assigned
    async fn add_document(&self, collection: &str, fields: Payload) -> StorageResult<String>;

    /// Apply a top-level field patch to an existing document
    async fn patch_document(&self, collection: &str, id: &str, fields: Payload)
        -> StorageResult<()>;

    /// Remove a document; absent ids are not an error
    async fn delete_document(&self, collection: &str, id: &str) -> StorageResult<()>;
}

/// Cloud-scope record store
#[derive(Clone)]
pub struct CloudStore {
    client: Arc<dyn DocumentClient>,
}

impl CloudStore {
    pub fn new(client: Arc<dyn DocumentClient>) -> Self {
        Self { client }
    }

    /// Load a document and confirm it belongs to `owner_id`
    async fn owned(
        &self,
        collection: &str,
        id: &str,
        owner_id: &str,
    ) -> StorageResult<Option<Record>> {
        let record = self.client.get_document(collection, id).await?;
        Ok(record.filter(|r| r.owner_id == owner_id))
    }
}

#[async_trait]
impl RecordBackend for CloudStore {
    async fn list(&self, collection: &str, owner_id: &str) -> StorageResult<Vec<Record>> {
        self.client.query_by_owner(collection, owner_id).await
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
        owner_id: &str,
    ) -> StorageResult<Option<Record>> {
        self.owned(collection, id, owner_id).await
    }

    async fn create(
        &self,
        collection: &str,
        owner_id: &str,
        payload: Payload,
    ) -> StorageResult<Record> {
        let draft = Record::new(String::new(), owner_id, timestamp_now(), payload);
        let id = self.client.add_document(collection, draft.to_document()).await?;
        debug!("Cloud create {}/{}", collection, id);
        Ok(Record { id, ..draft })
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        owner_id: &str,
        patch: Payload,
    ) -> StorageResult<Record> {
        // Check before patching so both scopes report missing records alike
        let Some(mut record) = self.owned(collection, id, owner_id).await? else {
            return Err(StorageError::not_found(collection, id));
        };
        record.merge(&patch);
        self.client
            .patch_document(collection, id, strip_reserved(patch))
            .await?;
        debug!("Cloud update {}/{}", collection, id);
        Ok(record)
    }

    async fn delete(&self, collection: &str, id: &str, owner_id: &str) -> StorageResult<String> {
        if self.owned(collection, id, owner_id).await?.is_some() {
            self.client.delete_document(collection, id).await?;
            debug!("Cloud delete {}/{}", collection, id);
        }
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDocumentClient;
    use serde_json::{json, Value};

    fn test_store() -> (CloudStore, Arc<MemoryDocumentClient>) {
        let client = Arc::new(MemoryDocumentClient::new());
        (CloudStore::new(client.clone()), client)
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_server_id() {
        let (store, _) = test_store();
        let record = store
            .create("habits", "u1", payload(json!({"name": "Run"})))
            .await
            .unwrap();

        assert!(!record.id.is_empty());
        assert_eq!(record.owner_id, "u1");

        let listed = store.list("habits", "u1").await.unwrap();
        assert_eq!(listed, vec![record]);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let (store, _) = test_store();
        for name in ["A", "B", "C"] {
            store
                .create("habits", "u1", payload(json!({ "name": name })))
                .await
                .unwrap();
        }

        let names: Vec<_> = store
            .list("habits", "u1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.payload["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("C"), json!("B"), json!("A")]);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (store, client) = test_store();
        let result = store
            .update("habits", "nope", "u1", payload(json!({"name": "x"})))
            .await;

        assert!(matches!(result, Err(StorageError::NotFound { .. })));
        assert_eq!(client.document_count("habits"), 0);
    }

    #[tokio::test]
    async fn test_update_other_owner_is_not_found() {
        let (store, _) = test_store();
        let record = store
            .create("habits", "u1", payload(json!({"name": "Run"})))
            .await
            .unwrap();

        let result = store
            .update("habits", &record.id, "u2", payload(json!({"name": "Hijack"})))
            .await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));

        let read = store.get("habits", &record.id, "u1").await.unwrap().unwrap();
        assert_eq!(read.payload["name"], json!("Run"));
    }

    #[tokio::test]
    async fn test_update_round_trip() {
        let (store, _) = test_store();
        let record = store
            .create("habits", "u1", payload(json!({"name": "Run", "streak": 1})))
            .await
            .unwrap();

        let updated = store
            .update("habits", &record.id, "u1", payload(json!({"streak": 2})))
            .await
            .unwrap();
        let read = store.get("habits", &record.id, "u1").await.unwrap().unwrap();

        assert_eq!(updated, read);
        assert_eq!(read.payload["streak"], json!(2));
        assert_eq!(read.payload["name"], json!("Run"));
        assert_eq!(read.created_at, record.created_at);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _) = test_store();
        let record = store.create("habits", "u1", Payload::new()).await.unwrap();

        store.delete("habits", &record.id, "u1").await.unwrap();
        store.delete("habits", &record.id, "u1").await.unwrap();
        assert!(store.list("habits", "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_ignores_other_owner() {
        let (store, _) = test_store();
        let record = store.create("habits", "u1", Payload::new()).await.unwrap();

        store.delete("habits", &record.id, "u2").await.unwrap();
        assert_eq!(store.list("habits", "u1").await.unwrap().len(), 1);
    }
}
