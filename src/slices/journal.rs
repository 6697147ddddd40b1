//! Journal slice. New entries are enriched with model insights when the
//! advisor is available; otherwise they carry the neutral placeholder.

use tracing::warn;

use super::{decode_all, replace_item, Slice};
use crate::advisory::{Advisor, Insight};
use crate::models::{to_payload, CollectionItem, JournalEntry, Stored};
use crate::records::{RecordResult, RecordService, Session};
use crate::storage::Payload;

pub struct JournalSlice {
    session: Session,
    records: RecordService,
    advisor: Advisor,
    state: Slice<JournalEntry>,
}

impl JournalSlice {
    pub fn new(session: Session, records: RecordService, advisor: Advisor) -> Self {
        Self {
            session,
            records,
            advisor,
            state: Slice::new(),
        }
    }

    pub fn state(&self) -> &Slice<JournalEntry> {
        &self.state
    }

    fn collection(&self) -> &'static str {
        JournalEntry::COLLECTION.as_str()
    }

    pub async fn fetch(&self) -> RecordResult<Vec<Stored<JournalEntry>>> {
        let op = async {
            let records = self.records.fetch(self.collection(), &self.session).await?;
            decode_all(records)
        };
        self.state
            .dispatch(op, |items, fetched| *items = fetched.clone())
            .await
    }

    /// Insight for a new entry. Guests never reach the model.
    async fn insight_for(&self, content: &str) -> Insight {
        if self.session.is_guest || !self.advisor.is_available() {
            return Insight::placeholder();
        }
        self.advisor
            .analyze_journal(content)
            .await
            .unwrap_or_else(|e| {
                warn!("Journal enrichment failed, using placeholder: {}", e);
                Insight::placeholder()
            })
    }

    pub async fn add(&self, entry: JournalEntry) -> RecordResult<Stored<JournalEntry>> {
        let op = async {
            let insights = self.insight_for(&entry.content).await;
            let entry = JournalEntry {
                insights: Some(insights),
                ..entry
            };
            let record = self
                .records
                .add(self.collection(), &self.session, to_payload(&entry)?)
                .await?;
            Stored::from_record(record)
        };
        self.state
            .dispatch(op, |items, added| items.insert(0, added.clone()))
            .await
    }

    pub async fn update(&self, id: &str, patch: Payload) -> RecordResult<Stored<JournalEntry>> {
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
            .dispatch(op, |items, deleted| items.retain(|e| &e.id != deleted))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::tests::{canned, failing};
    use crate::records::tests::{failing_cloud_service, test_service};
    use crate::records::RecordError;
    use serde_json::json;

    fn entry(content: &str) -> JournalEntry {
        JournalEntry {
            content: content.to_string(),
            kind: Some("text".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ai_failure_falls_back_to_neutral() {
        let (records, _dir) = test_service();
        let slice = JournalSlice::new(Session::cloud("u1"), records, failing());

        let added = slice.add(entry("Rough day at work")).await.unwrap();
        let insights = added.data.insights.unwrap();
        assert_eq!(insights.sentiment, "neutral");
        assert_eq!(insights, Insight::placeholder());
        assert!(slice.state().snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_cloud_entry_is_enriched() {
        let (records, _dir) = test_service();
        let advisor = canned(
            r#"{"sentiment": "positive", "emotions": ["grateful"], "triggers": [], "positives": ["walk"], "suggestions": []}"#,
        );
        let slice = JournalSlice::new(Session::cloud("u1"), records, advisor);

        let added = slice.add(entry("Went for a walk")).await.unwrap();
        assert_eq!(added.data.insights.unwrap().sentiment, "positive");
        assert_eq!(added.data.kind.as_deref(), Some("text"));

        let fetched = slice.fetch().await.unwrap();
        assert_eq!(fetched[0].data.insights.as_ref().unwrap().emotions, vec!["grateful"]);
    }

    #[tokio::test]
    async fn test_guest_entry_skips_model() {
        let (records, _dir) = test_service();
        let advisor = canned(r#"{"sentiment": "positive"}"#);
        let slice = JournalSlice::new(Session::guest("g1"), records, advisor);

        let added = slice.add(entry("hello")).await.unwrap();
        assert_eq!(added.data.insights, Some(Insight::placeholder()));
    }

    #[tokio::test]
    async fn test_save_failure_is_not_masked_by_enrichment() {
        let (records, _dir) = failing_cloud_service();
        let slice = JournalSlice::new(Session::cloud("u1"), records, canned("{}"));

        let err = slice.add(entry("x")).await.unwrap_err();
        assert!(matches!(err, RecordError::Backend(_)));
        assert!(slice.state().items().is_empty());
        assert!(slice.state().snapshot().error.is_some());
    }

    #[tokio::test]
    async fn test_update_and_delete_in_both_scopes() {
        let (records, _dir) = test_service();
        for session in [Session::guest("u1"), Session::cloud("u1")] {
            let slice = JournalSlice::new(session, records.clone(), Advisor::disabled());
            let added = slice.add(entry("draft")).await.unwrap();

            let patch = json!({"content": "final"}).as_object().cloned().unwrap();
            let updated = slice.update(&added.id, patch).await.unwrap();
            assert_eq!(updated.data.content, "final");
            assert_eq!(updated.data.insights, added.data.insights);
            assert_eq!(slice.state().items()[0].data.content, "final");

            slice.delete(&added.id).await.unwrap();
            assert!(slice.state().items().is_empty());

            let err = slice
                .update(&added.id, Payload::new())
                .await
                .unwrap_err();
            assert!(matches!(err, RecordError::NotFound { .. }));
        }
    }
}
