//! Generic record CRUD service.
//!
//! The single entry point domain slices use for persistence. The session's
//! guest flag picks the backend; every backend failure is folded into the
//! two-variant [`RecordError`] contract. One attempt per call: no retries,
//! no timeouts.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::storage::{Payload, Record, RecordBackend, StorageError};

/// Who is calling and which scope their data lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub owner_id: String,
    pub is_guest: bool,
}

impl Session {
    pub fn guest(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            is_guest: true,
        }
    }

    pub fn cloud(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            is_guest: false,
        }
    }

    /// Same scope kind, different owner
    pub fn with_owner(&self, owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            is_guest: self.is_guest,
        }
    }
}

/// Errors surfaced by the record service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Item not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("{0}")]
    Backend(String),
}

impl From<StorageError> for RecordError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { collection, id } => RecordError::NotFound { collection, id },
            other => RecordError::Backend(other.to_string()),
        }
    }
}

/// Result type for record operations
pub type RecordResult<T> = Result<T, RecordError>;

/// Routes record operations to the guest or cloud backend
#[derive(Clone)]
pub struct RecordService {
    guest: Arc<dyn RecordBackend>,
    cloud: Arc<dyn RecordBackend>,
    /// Per-record locks held across read-modify-write cycles
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RecordService {
    pub fn new(guest: Arc<dyn RecordBackend>, cloud: Arc<dyn RecordBackend>) -> Self {
        Self {
            guest,
            cloud,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_key(collection: &str, id: &str, session: &Session) -> String {
        let scope = if session.is_guest { "guest" } else { "cloud" };
        format!("{}/{}/{}/{}", scope, collection, session.owner_id, id)
    }

    /// Run `op` while holding the lock for one record. The lock entry is
    /// dropped again once nobody else is waiting on it.
    async fn with_record_lock<T, F>(&self, key: String, op: F) -> RecordResult<T>
    where
        F: std::future::Future<Output = RecordResult<T>>,
    {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            op.await
        };
        drop(lock);
        self.locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    fn backend(&self, session: &Session) -> &dyn RecordBackend {
        if session.is_guest {
            self.guest.as_ref()
        } else {
            self.cloud.as_ref()
        }
    }

    /// All records in the session's scope, newest first
    pub async fn fetch(&self, collection: &str, session: &Session) -> RecordResult<Vec<Record>> {
        debug!("fetch {} for {}", collection, session.owner_id);
        self.backend(session)
            .list(collection, &session.owner_id)
            .await
            .map_err(|e| surface(collection, e))
    }

    /// One record, or `None` when it is not in the session's scope
    pub async fn get(
        &self,
        collection: &str,
        id: &str,
        session: &Session,
    ) -> RecordResult<Option<Record>> {
        self.backend(session)
            .get(collection, id, &session.owner_id)
            .await
            .map_err(|e| surface(collection, e))
    }

    pub async fn add(
        &self,
        collection: &str,
        session: &Session,
        payload: Payload,
    ) -> RecordResult<Record> {
        debug!("add to {} for {}", collection, session.owner_id);
        self.backend(session)
            .create(collection, &session.owner_id, payload)
            .await
            .map_err(|e| surface(collection, e))
    }

    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        session: &Session,
        patch: Payload,
    ) -> RecordResult<Record> {
        debug!("update {}/{} for {}", collection, id, session.owner_id);
        let key = Self::lock_key(collection, id, session);
        self.with_record_lock(key, async {
            self.backend(session)
                .update(collection, id, &session.owner_id, patch)
                .await
                .map_err(|e| surface(collection, e))
        })
        .await
    }

    /// Read-modify-write of one record. `change` sees the current record and
    /// returns the fields to patch, or `None` to leave it as it is. No other
    /// update or modify of the same record in this process interleaves.
    pub async fn modify<F>(
        &self,
        collection: &str,
        id: &str,
        session: &Session,
        change: F,
    ) -> RecordResult<Record>
    where
        F: FnOnce(&Record) -> RecordResult<Option<Payload>>,
    {
        debug!("modify {}/{} for {}", collection, id, session.owner_id);
        let key = Self::lock_key(collection, id, session);
        self.with_record_lock(key, async {
            let backend = self.backend(session);
            let current = backend
                .get(collection, id, &session.owner_id)
                .await
                .map_err(|e| surface(collection, e))?
                .ok_or_else(|| RecordError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            match change(&current)? {
                Some(patch) => backend
                    .update(collection, id, &session.owner_id, patch)
                    .await
                    .map_err(|e| surface(collection, e)),
                None => Ok(current),
            }
        })
        .await
    }

    pub async fn delete(
        &self,
        collection: &str,
        id: &str,
        session: &Session,
    ) -> RecordResult<String> {
        debug!("delete {}/{} for {}", collection, id, session.owner_id);
        self.backend(session)
            .delete(collection, id, &session.owner_id)
            .await
            .map_err(|e| surface(collection, e))
    }
}

fn surface(collection: &str, err: StorageError) -> RecordError {
    if !matches!(err, StorageError::NotFound { .. }) {
        warn!("Storage failure in {}: {}", collection, err);
    }
    err.into()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::{
        CloudStore, DocumentClient, GuestStore, MemoryDocumentClient, StorageConfig,
        StorageResult,
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tempfile::{tempdir, TempDir};

    /// A backend whose every call fails
    pub(crate) struct FailingBackend;

    #[async_trait]
    impl RecordBackend for FailingBackend {
        async fn list(&self, _: &str, _: &str) -> StorageResult<Vec<Record>> {
            Err(StorageError::Remote("store offline".to_string()))
        }
        async fn get(&self, _: &str, _: &str, _: &str) -> StorageResult<Option<Record>> {
            Err(StorageError::Remote("store offline".to_string()))
        }
        async fn create(&self, _: &str, _: &str, _: Payload) -> StorageResult<Record> {
            Err(StorageError::Remote("store offline".to_string()))
        }
        async fn update(&self, _: &str, _: &str, _: &str, _: Payload) -> StorageResult<Record> {
            Err(StorageError::Remote("store offline".to_string()))
        }
        async fn delete(&self, _: &str, _: &str, _: &str) -> StorageResult<String> {
            Err(StorageError::Remote("store offline".to_string()))
        }
    }

    /// Service over a temp guest store and an in-memory cloud store
    pub(crate) fn test_service() -> (RecordService, TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("guest.sled").to_string_lossy().to_string())
            .with_flush_interval(0);
        let guest = GuestStore::open(config).unwrap();
        let cloud = CloudStore::new(Arc::new(MemoryDocumentClient::new()));
        (RecordService::new(Arc::new(guest), Arc::new(cloud)), dir)
    }

    /// In-memory documents that yield to the scheduler before every call, so
    /// concurrent operations interleave between their reads and writes
    pub(crate) struct SlowDocuments(MemoryDocumentClient);

    #[async_trait]
    impl DocumentClient for SlowDocuments {
        async fn query_by_owner(&self, collection: &str, owner_id: &str) -> StorageResult<Vec<Record>> {
            tokio::task::yield_now().await;
            self.0.query_by_owner(collection, owner_id).await
        }
        async fn get_document(&self, collection: &str, id: &str) -> StorageResult<Option<Record>> {
            tokio::task::yield_now().await;
            self.0.get_document(collection, id).await
        }
        async fn add_document(&self, collection: &str, fields: Payload) -> StorageResult<String> {
            tokio::task::yield_now().await;
            self.0.add_document(collection, fields).await
        }
        async fn patch_document(&self, collection: &str, id: &str, fields: Payload) -> StorageResult<()> {
            tokio::task::yield_now().await;
            self.0.patch_document(collection, id, fields).await
        }
        async fn delete_document(&self, collection: &str, id: &str) -> StorageResult<()> {
            tokio::task::yield_now().await;
            self.0.delete_document(collection, id).await
        }
    }

    /// Service whose cloud scope yields inside every document call
    pub(crate) fn slow_cloud_service() -> (RecordService, TempDir) {
        let (service, dir) = test_service();
        let cloud = CloudStore::new(Arc::new(SlowDocuments(MemoryDocumentClient::new())));
        (RecordService::new(service.guest.clone(), Arc::new(cloud)), dir)
    }

    /// Service whose cloud scope always fails
    pub(crate) fn failing_cloud_service() -> (RecordService, TempDir) {
        let (service, dir) = test_service();
        (RecordService::new(service.guest.clone(), Arc::new(FailingBackend)), dir)
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn sessions() -> [Session; 2] {
        [Session::guest("u1"), Session::cloud("u1")]
    }

    #[tokio::test]
    async fn test_create_appears_once_with_owner_and_timestamp() {
        let (service, _dir) = test_service();
        for session in sessions() {
            let created = service
                .add("habits", &session, payload(json!({"name": "Run"})))
                .await
                .unwrap();
            let listed = service.fetch("habits", &session).await.unwrap();

            assert_eq!(listed.iter().filter(|r| r.id == created.id).count(), 1);
            assert_eq!(listed[0].owner_id, "u1");
            assert!(!listed[0].created_at.is_empty());
            assert_eq!(listed[0].payload["name"], json!("Run"));
            assert!(listed[0].payload.get("streak").is_none());
        }
    }

    #[tokio::test]
    async fn test_both_scopes_order_newest_first() {
        let (service, _dir) = test_service();
        for session in sessions() {
            for name in ["A", "B", "C"] {
                service
                    .add("habits", &session, payload(json!({ "name": name })))
                    .await
                    .unwrap();
            }
            let names: Vec<_> = service
                .fetch("habits", &session)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.payload["name"].clone())
                .collect();
            assert_eq!(names, vec![json!("C"), json!("B"), json!("A")]);
        }
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found_in_both_scopes() {
        let (service, _dir) = test_service();
        for session in sessions() {
            let err = service
                .update("habits", "missing", &session, payload(json!({"x": 1})))
                .await
                .unwrap_err();
            assert_eq!(
                err,
                RecordError::NotFound {
                    collection: "habits".to_string(),
                    id: "missing".to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn test_update_then_read_round_trip() {
        let (service, _dir) = test_service();
        for session in sessions() {
            let created = service
                .add("habits", &session, payload(json!({"name": "Run", "streak": 0})))
                .await
                .unwrap();
            service
                .update("habits", &created.id, &session, payload(json!({"streak": 7})))
                .await
                .unwrap();

            let read = service
                .get("habits", &created.id, &session)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(read.payload["streak"], json!(7));
            assert_eq!(read.payload["name"], json!("Run"));
            assert_eq!(read.owner_id, created.owner_id);
            assert_eq!(read.created_at, created.created_at);
        }
    }

    #[tokio::test]
    async fn test_delete_twice_never_raises() {
        let (service, _dir) = test_service();
        for session in sessions() {
            let created = service
                .add("habits", &session, Payload::new())
                .await
                .unwrap();
            service.delete("habits", &created.id, &session).await.unwrap();
            service.delete("habits", &created.id, &session).await.unwrap();
            assert!(service.fetch("habits", &session).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_guest_flag_selects_backend() {
        let (service, _dir) = test_service();
        service
            .add("habits", &Session::guest("u1"), Payload::new())
            .await
            .unwrap();

        assert_eq!(service.fetch("habits", &Session::guest("u1")).await.unwrap().len(), 1);
        assert!(service.fetch("habits", &Session::cloud("u1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_carries_message() {
        let (service, _dir) = failing_cloud_service();
        let err = service
            .fetch("habits", &Session::cloud("u1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RecordError::Backend("Remote store error: store offline".to_string())
        );
    }

    #[tokio::test]
    async fn test_modify_skips_write_when_unchanged() {
        let (service, _dir) = test_service();
        for session in sessions() {
            let created = service
                .add("habits", &session, payload(json!({"name": "Run"})))
                .await
                .unwrap();

            let same = service
                .modify("habits", &created.id, &session, |_| Ok(None))
                .await
                .unwrap();
            assert_eq!(same, created);

            let err = service
                .modify("habits", "missing", &session, |_| Ok(None))
                .await
                .unwrap_err();
            assert!(matches!(err, RecordError::NotFound { .. }));
        }
        assert!(service.locks.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_modify_keeps_every_change() {
        let (service, _dir) = slow_cloud_service();
        let session = Session::cloud("u1");
        let created = service
            .add("habits", &session, payload(json!({"count": 0})))
            .await
            .unwrap();

        let bump = || {
            service.modify("habits", &created.id, &session, |current| {
                let count = current.payload["count"].as_i64().unwrap_or(0);
                Ok(Some(payload(json!({ "count": count + 1 }))))
            })
        };
        let (a, b, c) = tokio::join!(bump(), bump(), bump());
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let stored = service
            .get("habits", &created.id, &session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.payload["count"], json!(3));
        assert!(service.locks.is_empty());
    }

    #[tokio::test]
    async fn test_modify_on_unreadable_guest_scope_is_backend_error() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("guest.sled").to_string_lossy().to_string())
            .with_flush_interval(0);
        let guest = GuestStore::open(config).unwrap();
        guest.put_raw_scope("posts", "community", b"not json");
        let service = RecordService::new(
            Arc::new(guest),
            Arc::new(CloudStore::new(Arc::new(MemoryDocumentClient::new()))),
        );

        let err = service
            .modify("posts", "1", &Session::guest("community"), |_| Ok(None))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::Backend(_)));
    }

    #[test]
    fn test_session_serde_shape() {
        let session: Session =
            serde_json::from_value(json!({"ownerId": "u1", "isGuest": true})).unwrap();
        assert_eq!(session, Session::guest("u1"));
        assert_eq!(session.with_owner("community"), Session::guest("community"));
    }
}
