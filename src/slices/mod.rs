//! Domain state slices.
//!
//! Each slice owns one collection's in-memory view for one session:
//! `{ items, loading, error }`. Operations call the record service, and the
//! in-memory items change only after the backend call succeeds. A failed
//! call records its message in `error` and leaves `items` untouched.
//!
//! [`AppStore`] bundles the three slices for a session and is constructed
//! explicitly; [`SessionRegistry`] tracks the live stores.

pub mod community;
pub mod habits;
pub mod journal;

pub use community::CommunitySlice;
pub use habits::HabitsSlice;
pub use journal::JournalSlice;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::advisory::Advisor;
use crate::models::{CollectionItem, Stored};
use crate::records::{RecordResult, RecordService, Session};

/// Snapshot of a slice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceState<T> {
    pub items: Vec<Stored<T>>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for SliceState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

struct Inner<T> {
    state: SliceState<T>,
    /// Operations started but not yet settled
    in_flight: usize,
}

/// In-memory collection view with loading/error bookkeeping
pub struct Slice<T> {
    inner: RwLock<Inner<T>>,
}

impl<T: CollectionItem> Default for Slice<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CollectionItem> Slice<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: SliceState::default(),
                in_flight: 0,
            }),
        }
    }

    pub fn snapshot(&self) -> SliceState<T> {
        self.inner.read().state.clone()
    }

    #[cfg(test)]
    pub fn items(&self) -> Vec<Stored<T>> {
        self.inner.read().state.items.clone()
    }

    pub fn clear_error(&self) {
        self.inner.write().state.error = None;
    }

    /// Drop all in-memory state
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = SliceState::default();
        inner.in_flight = 0;
    }

    /// Run one backend operation: mark pending, await it, then either fold
    /// the result into the items or record the error.
    pub async fn dispatch<R, Fut, F>(&self, op: Fut, fold: F) -> RecordResult<R>
    where
        Fut: Future<Output = RecordResult<R>>,
        F: FnOnce(&mut Vec<Stored<T>>, &R),
    {
        {
            let mut inner = self.inner.write();
            inner.in_flight += 1;
            inner.state.loading = true;
            inner.state.error = None;
        }

        let result = op.await;

        let mut inner = self.inner.write();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.state.loading = inner.in_flight > 0;
        match &result {
            Ok(value) => fold(&mut inner.state.items, value),
            Err(e) => inner.state.error = Some(e.to_string()),
        }
        result
    }
}

/// Replace the item with the same id, if present
pub(crate) fn replace_item<T: Clone>(items: &mut Vec<Stored<T>>, updated: &Stored<T>) {
    if let Some(slot) = items.iter_mut().find(|item| item.id == updated.id) {
        *slot = updated.clone();
    }
}

/// Decode a batch of raw records
pub(crate) fn decode_all<T: CollectionItem>(
    records: Vec<crate::storage::Record>,
) -> RecordResult<Vec<Stored<T>>> {
    records.into_iter().map(Stored::from_record).collect()
}

// ============================================================================
// APPLICATION STORE
// ============================================================================

/// All slices for one session
pub struct AppStore {
    session: Session,
    pub habits: HabitsSlice,
    pub journal: JournalSlice,
    pub community: CommunitySlice,
}

impl AppStore {
    pub fn new(session: Session, records: RecordService, advisor: Advisor) -> Self {
        Self {
            habits: HabitsSlice::new(session.clone(), records.clone()),
            journal: JournalSlice::new(session.clone(), records.clone(), advisor),
            community: CommunitySlice::new(session.clone(), records),
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Load every slice. Failures are kept in each slice's `error`.
    pub async fn init(&self) {
        let (habits, journal, posts) = tokio::join!(
            self.habits.fetch(),
            self.journal.fetch(),
            self.community.fetch_posts()
        );
        for (name, failed) in [
            ("habits", habits.err()),
            ("journal", journal.err()),
            ("community", posts.err()),
        ] {
            if let Some(e) = failed {
                warn!("Initial {} load failed for {}: {}", name, self.session.owner_id, e);
            }
        }
    }

    /// Drop all in-memory state
    pub fn teardown(&self) {
        self.habits.state().reset();
        self.journal.state().reset();
        self.community.state().reset();
    }
}

/// Live application stores keyed by owner id
pub struct SessionRegistry {
    stores: DashMap<String, Arc<AppStore>>,
    records: RecordService,
    advisor: Advisor,
}

impl SessionRegistry {
    pub fn new(records: RecordService, advisor: Advisor) -> Self {
        Self {
            stores: DashMap::new(),
            records,
            advisor,
        }
    }

    /// Create and load a store for `session`, tearing down any previous
    /// store for the same owner
    pub async fn open(&self, session: Session) -> Arc<AppStore> {
        let store = Arc::new(AppStore::new(
            session.clone(),
            self.records.clone(),
            self.advisor.clone(),
        ));
        if let Some(previous) = self.stores.insert(session.owner_id.clone(), store.clone()) {
            previous.teardown();
        }
        store.init().await;
        info!(
            "Session opened: {} (guest: {})",
            session.owner_id, session.is_guest
        );
        store
    }

    /// The open store for `session`. A store opened for the same owner in the
    /// other scope does not match.
    pub fn store_for(&self, session: &Session) -> Option<Arc<AppStore>> {
        self.stores
            .get(&session.owner_id)
            .filter(|store| store.session() == session)
            .map(|store| store.clone())
    }

    pub fn get(&self, owner_id: &str) -> Option<Arc<AppStore>> {
        self.stores.get(owner_id).map(|s| s.clone())
    }

    /// Tear down and forget a session. Returns false if it was not open.
    pub fn close(&self, owner_id: &str) -> bool {
        match self.stores.remove(owner_id) {
            Some((_, store)) => {
                store.teardown();
                info!("Session closed: {}", owner_id);
                true
            }
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.stores.len()
    }
}
