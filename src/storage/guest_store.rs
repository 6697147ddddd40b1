//! Sled-based storage for guest-scope records.
//!
//! Each (collection, owner) scope is a single value under the key
//! `guest_{collection}_{ownerId}` holding a JSON array of records, newest
//! first. Every mutation reads the array, changes it in memory and writes
//! the whole array back.

use async_trait::async_trait;
use parking_lot::Mutex;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    guest_key, timestamp_now, Payload, Record, RecordBackend, StorageConfig, StorageError,
    StorageResult,
};

/// Tree holding one JSON array per guest scope
const TREE_GUEST_SCOPES: &str = "guest_scopes";

/// Guest-scope record store
#[derive(Clone)]
pub struct GuestStore {
    db: Arc<Db>,
    scopes: Tree,
    /// Serialises read-modify-write cycles within this process
    write_lock: Arc<Mutex<()>>,
    /// Last issued id, in epoch milliseconds
    last_id: Arc<AtomicI64>,
}

impl GuestStore {
    /// Open or create a guest store at the configured path
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let path = Path::new(&config.path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        let scopes = db.open_tree(TREE_GUEST_SCOPES)?;

        Ok(Self {
            db: Arc::new(db),
            scopes,
            write_lock: Arc::new(Mutex::new(())),
            last_id: Arc::new(AtomicI64::new(0)),
        })
    }

    /// Raw stored bytes for a scope
    #[cfg(test)]
    fn raw_scope(&self, collection: &str, owner_id: &str) -> StorageResult<Option<Vec<u8>>> {
        let key = guest_key(collection, owner_id);
        Ok(self.scopes.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    /// Overwrite a scope with arbitrary bytes
    #[cfg(test)]
    pub(crate) fn put_raw_scope(&self, collection: &str, owner_id: &str, bytes: &[u8]) {
        let key = guest_key(collection, owner_id);
        self.scopes.insert(key.as_bytes(), bytes).unwrap();
    }

    /// Force flush all pending writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Number of stored scopes
    #[cfg(test)]
    fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Next id: current epoch milliseconds, bumped past the last issued id
    fn next_id(&self) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let mut current = self.last_id.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(current + 1);
            match self.last_id.compare_exchange(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate.to_string(),
                Err(actual) => current = actual,
            }
        }
    }

    /// Read a scope for mutation. Unparseable values are an error here so a
    /// write never replaces data it could not read.
    fn load_for_write(&self, key: &str) -> StorageResult<Vec<Record>> {
        match self.scopes.get(key.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn store(&self, key: &str, records: &[Record]) -> StorageResult<()> {
        let bytes = serde_json::to_vec(records)?;
        self.scopes.insert(key.as_bytes(), bytes)?;
        Ok(())
    }
}

#[async_trait]
impl RecordBackend for GuestStore {
    async fn list(&self, collection: &str, owner_id: &str) -> StorageResult<Vec<Record>> {
        let key = guest_key(collection, owner_id);
        let Some(bytes) = self.scopes.get(key.as_bytes())? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice(&bytes) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!("Unreadable guest scope {}: {}", key, e);
                Ok(Vec::new())
            }
        }
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
        owner_id: &str,
    ) -> StorageResult<Option<Record>> {
        // Single reads feed mutations, so an unreadable scope is an error here
        let records = self.load_for_write(&guest_key(collection, owner_id))?;
        Ok(records.into_iter().find(|r| r.id == id))
    }

    async fn create(
        &self,
        collection: &str,
        owner_id: &str,
        payload: Payload,
    ) -> StorageResult<Record> {
        let key = guest_key(collection, owner_id);
        let _guard = self.write_lock.lock();

        let mut records = self.load_for_write(&key)?;
        let record = Record::new(self.next_id(), owner_id, timestamp_now(), payload);
        records.insert(0, record.clone());
        self.store(&key, &records)?;

        debug!("Guest create {} in {}", record.id, key);
        Ok(record)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        owner_id: &str,
        patch: Payload,
    ) -> StorageResult<Record> {
        let key = guest_key(collection, owner_id);
        let _guard = self.write_lock.lock();

        let mut records = self.load_for_write(&key)?;
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Err(StorageError::not_found(collection, id));
        };
        record.merge(&patch);
        let updated = record.clone();
        self.store(&key, &records)?;

        debug!("Guest update {} in {}", id, key);
        Ok(updated)
    }

    async fn delete(&self, collection: &str, id: &str, owner_id: &str) -> StorageResult<String> {
        let key = guest_key(collection, owner_id);
        let _guard = self.write_lock.lock();

        let mut records = self.load_for_write(&key)?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() != before {
            self.store(&key, &records)?;
        }

        debug!("Guest delete {} in {}", id, key);
        Ok(id.to_string())
    }
}

impl Drop for GuestStore {
    fn drop(&mut self) {
        // Only the last handle flushes
        if Arc::strong_count(&self.db) == 1 {
            let _ = self.flush();
        }
    }
}
