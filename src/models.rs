//! Typed domain records.
//!
//! Each collection has its own payload type. [`Stored`] composes a payload
//! with the storage-owned identity fields, so the record service stays
//! payload-agnostic while slices work with concrete types. Fields a type
//! does not know about are kept in `extra` and written back untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::advisory::Insight;
use crate::records::RecordError;
use crate::storage::{Payload, Record};

/// Named partitions of the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Habits,
    JournalEntries,
    Posts,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Habits => "habits",
            Collection::JournalEntries => "journalEntries",
            Collection::Posts => "posts",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload type bound to the collection it lives in
pub trait CollectionItem:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    const COLLECTION: Collection;
}

/// A typed record: identity fields plus a collection payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stored<T> {
    pub id: String,
    pub owner_id: String,
    pub created_at: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T: CollectionItem> Stored<T> {
    pub fn from_record(record: Record) -> Result<Self, RecordError> {
        let id = record.id.clone();
        serde_json::to_value(record)
            .and_then(serde_json::from_value)
            .map_err(|e| malformed(T::COLLECTION, &id, e))
    }
}

impl<T: CollectionItem> TryFrom<Record> for Stored<T> {
    type Error = RecordError;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        Stored::from_record(record)
    }
}

/// Serialize a payload type into record fields
pub fn to_payload<T: CollectionItem>(data: &T) -> Result<Payload, RecordError> {
    match serde_json::to_value(data) {
        Ok(serde_json::Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(RecordError::Backend(format!(
            "{} payload is not an object",
            T::COLLECTION
        ))),
        Err(e) => Err(RecordError::Backend(e.to_string())),
    }
}

fn malformed(collection: Collection, id: &str, err: serde_json::Error) -> RecordError {
    RecordError::Backend(format!("Malformed {} record {}: {}", collection, id, err))
}

// ============================================================================
// HABITS
// ============================================================================

/// Kind of habit log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Success,
    Relapse,
    Temptation,
}

/// One entry in a habit's append-only log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitLog {
    pub date: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// "positive" or "negative"
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    pub last_completed: Option<String>,
    #[serde(default)]
    pub logs: Vec<HabitLog>,
    #[serde(flatten)]
    pub extra: Payload,
}

impl CollectionItem for Habit {
    const COLLECTION: Collection = Collection::Habits;
}

impl Habit {
    /// Reset tracking fields for a newly added habit
    pub fn fresh(mut self) -> Self {
        self.streak = 0;
        self.last_completed = None;
        self.logs.clear();
        self
    }

    /// Append a log entry and apply the streak rule: success increments,
    /// relapse resets to zero, temptation leaves the streak alone.
    pub fn record_log(&mut self, kind: LogKind, notes: Option<String>, at: String) -> HabitLog {
        match kind {
            LogKind::Success => {
                self.streak = self.streak.saturating_add(1);
                self.last_completed = Some(at.clone());
            }
            LogKind::Relapse => self.streak = 0,
            LogKind::Temptation => {}
        }
        let log = HabitLog {
            date: at,
            kind,
            notes: notes.unwrap_or_default(),
        };
        self.logs.push(log.clone());
        log
    }
}

// ============================================================================
// JOURNAL
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    #[serde(default)]
    pub content: String,
    /// Entry medium, e.g. "text"
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<Insight>,
    #[serde(flatten)]
    pub extra: Payload,
}

impl CollectionItem for JournalEntry {
    const COLLECTION: Collection = Collection::JournalEntries;
}

// ============================================================================
// COMMUNITY
// ============================================================================

/// A comment embedded in its parent post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
    #[serde(flatten)]
    pub extra: Payload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub liked_by: Vec<String>,
    #[serde(flatten)]
    pub extra: Payload,
}

impl CollectionItem for Post {
    const COLLECTION: Collection = Collection::Posts;
}

impl Post {
    /// Reset engagement fields for a newly published post
    pub fn fresh(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = author_id.into();
        self.likes = 0;
        self.comments.clear();
        self.liked_by.clear();
        self
    }

    /// Count a like from `user_id`. Returns false if they already liked it.
    pub fn like(&mut self, user_id: &str) -> bool {
        if self.liked_by.iter().any(|u| u == user_id) {
            return false;
        }
        self.liked_by.push(user_id.to_string());
        self.likes = self.liked_by.len() as u32;
        true
    }

    /// Withdraw a like. Returns false if `user_id` had not liked the post.
    pub fn unlike(&mut self, user_id: &str) -> bool {
        let before = self.liked_by.len();
        self.liked_by.retain(|u| u != user_id);
        if self.liked_by.len() == before {
            return false;
        }
        self.likes = self.liked_by.len() as u32;
        true
    }
}
