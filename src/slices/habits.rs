//! Habits slice: habit records, their logs and streaks.

use serde_json::json;

use super::{decode_all, replace_item, Slice};
use crate::models::{to_payload, CollectionItem, Habit, LogKind, Stored};
use crate::records::{RecordError, RecordResult, RecordService, Session};
use crate::storage::{timestamp_now, Payload};

pub struct HabitsSlice {
    session: Session,
    records: RecordService,
    state: Slice<Habit>,
}

impl HabitsSlice {
    pub fn new(session: Session, records: RecordService) -> Self {
        Self {
            session,
            records,
            state: Slice::new(),
        }
    }

    pub fn state(&self) -> &Slice<Habit> {
        &self.state
    }

    fn collection(&self) -> &'static str {
        Habit::COLLECTION.as_str()
    }

    pub async fn fetch(&self) -> RecordResult<Vec<Stored<Habit>>> {
        let op = async {
            let records = self.records.fetch(self.collection(), &self.session).await?;
            decode_all(records)
        };
        self.state
            .dispatch(op, |items, fetched| *items = fetched.clone())
            .await
    }

    /// Add a habit with a zero streak and an empty log
    pub async fn add(&self, habit: Habit) -> RecordResult<Stored<Habit>> {
        let op = async {
            let payload = to_payload(&habit.fresh())?;
            let record = self
                .records
                .add(self.collection(), &self.session, payload)
                .await?;
            Stored::from_record(record)
        };
        self.state
            .dispatch(op, |items, added| items.insert(0, added.clone()))
            .await
    }

    pub async fn update(&self, id: &str, patch: Payload) -> RecordResult<Stored<Habit>> {
        let op = async {
            let record = self
                .records
                .update(self.collection(), id, &self.session, patch)
                .await?;
            Stored::from_record(record)
        };
        self.state.dispatch(op, replace_item).await
    }

    pub async fn delete(&self, id: &str) -> RecordResult<String> {
        let op = self.records.delete(self.collection(), id, &self.session);
        self.state
            .dispatch(op, |items, deleted| items.retain(|h| &h.id != deleted))
            .await
    }

    /// Append a log entry, recompute the streak and persist the result.
    /// Concurrent logs on one habit apply one after another. The in-memory
    /// habit changes only once the write is confirmed.
    pub async fn log(
        &self,
        id: &str,
        kind: LogKind,
        notes: Option<String>,
    ) -> RecordResult<Stored<Habit>> {
        let op = async {
            let record = self
                .records
                .modify(self.collection(), id, &self.session, |current| {
                    let mut habit: Stored<Habit> = Stored::from_record(current.clone())?;
                    habit.data.record_log(kind, notes, timestamp_now());
                    log_patch(&habit.data).map(Some)
                })
                .await?;
            Stored::from_record(record)
        };
        self.state.dispatch(op, replace_item).await
    }
}

fn log_patch(habit: &Habit) -> RecordResult<Payload> {
    let logs = serde_json::to_value(&habit.logs).map_err(|e| RecordError::Backend(e.to_string()))?;
    let patch = json!({
        "logs": logs,
        "streak": habit.streak,
        "lastCompleted": habit.last_completed,
    });
    Ok(patch.as_object().cloned().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::tests::{failing_cloud_service, slow_cloud_service, test_service};

    fn run_habit() -> Habit {
        Habit {
            name: "Run".to_string(),
            ..Default::default()
        }
    }

    fn sessions() -> [Session; 2] {
        [Session::guest("u1"), Session::cloud("u1")]
    }

    #[tokio::test]
    async fn test_add_sets_defaults_and_prepends() {
        let (records, _dir) = test_service();
        for session in sessions() {
            let slice = HabitsSlice::new(session, records.clone());
            slice.add(run_habit()).await.unwrap();
            let second = slice
                .add(Habit {
                    name: "Read".into(),
                    streak: 10,
                    ..Default::default()
                })
                .await
                .unwrap();

            assert_eq!(second.data.streak, 0);
            assert!(second.data.logs.is_empty());
            assert!(second.data.last_completed.is_none());
            let items = slice.state().items();
            assert_eq!(items[0].data.name, "Read");
            assert_eq!(items[1].data.name, "Run");
        }
    }

    #[tokio::test]
    async fn test_streak_law_in_both_scopes() {
        let (records, _dir) = test_service();
        for session in sessions() {
            let slice = HabitsSlice::new(session, records.clone());
            let habit = slice.add(run_habit()).await.unwrap();

            for kind in [
                LogKind::Success,
                LogKind::Success,
                LogKind::Relapse,
                LogKind::Success,
            ] {
                slice.log(&habit.id, kind, None).await.unwrap();
            }

            let fetched = slice.fetch().await.unwrap();
            assert_eq!(fetched[0].data.streak, 1);
            assert_eq!(fetched[0].data.logs.len(), 4);
            assert_eq!(slice.state().items()[0].data.streak, 1);
        }
    }

    #[tokio::test]
    async fn test_concurrent_logs_all_count() {
        let (records, _dir) = slow_cloud_service();
        let slice = HabitsSlice::new(Session::cloud("u1"), records);
        let habit = slice.add(run_habit()).await.unwrap();

        let (a, b) = tokio::join!(
            slice.log(&habit.id, LogKind::Success, None),
            slice.log(&habit.id, LogKind::Success, Some("evening".into()))
        );
        a.unwrap();
        b.unwrap();

        let fetched = slice.fetch().await.unwrap();
        assert_eq!(fetched[0].data.streak, 2);
        assert_eq!(fetched[0].data.logs.len(), 2);
    }

    #[tokio::test]
    async fn test_log_missing_habit_records_error() {
        let (records, _dir) = test_service();
        for session in sessions() {
            let slice = HabitsSlice::new(session, records.clone());
            slice.add(run_habit()).await.unwrap();
            let before = slice.state().items();

            let err = slice
                .log("missing", LogKind::Success, None)
                .await
                .unwrap_err();
            assert!(matches!(err, RecordError::NotFound { .. }));

            let state = slice.state().snapshot();
            assert_eq!(state.items, before);
            assert!(state.error.unwrap().contains("not found"));
            assert!(!state.loading);
        }
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (records, _dir) = test_service();
        for session in sessions() {
            let slice = HabitsSlice::new(session, records.clone());
            let habit = slice.add(run_habit()).await.unwrap();

            let patch = json!({"description": "5k"}).as_object().cloned().unwrap();
            let updated = slice.update(&habit.id, patch).await.unwrap();
            assert_eq!(updated.data.description.as_deref(), Some("5k"));
            assert_eq!(updated.data.name, "Run");
            assert_eq!(slice.state().items()[0], updated);

            slice.delete(&habit.id).await.unwrap();
            slice.delete(&habit.id).await.unwrap();
            assert!(slice.state().items().is_empty());
            assert!(slice.fetch().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_backend_failure_leaves_items_intact() {
        let (records, _dir) = failing_cloud_service();
        let slice = HabitsSlice::new(Session::cloud("u1"), records);

        let err = slice.add(run_habit()).await.unwrap_err();
        assert!(matches!(err, RecordError::Backend(_)));

        let state = slice.state().snapshot();
        assert!(state.items.is_empty());
        assert_eq!(
            state.error.as_deref(),
            Some("Remote store error: store offline")
        );
    }
}
