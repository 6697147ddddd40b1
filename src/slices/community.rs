//! Community slice: the shared post feed with embedded comments and likes.
//!
//! Posts live in the scope of the fixed feed owner [`FEED_OWNER`] so every
//! member sees the same feed; the author is recorded on the post itself.

use serde_json::json;

use super::{decode_all, replace_item, Slice};
use crate::models::{to_payload, CollectionItem, Comment, Post, Stored};
use crate::records::{RecordResult, RecordService, Session};
use crate::storage::{timestamp_now, Payload};

/// Owner id of the shared feed scope
pub const FEED_OWNER: &str = "community";

pub struct CommunitySlice {
    /// The member acting on the feed
    member: Session,
    /// Scope the posts are stored in
    feed: Session,
    records: RecordService,
    state: Slice<Post>,
}

impl CommunitySlice {
    pub fn new(session: Session, records: RecordService) -> Self {
        Self {
            feed: session.with_owner(FEED_OWNER),
            member: session,
            records,
            state: Slice::new(),
        }
    }

    pub fn state(&self) -> &Slice<Post> {
        &self.state
    }

    fn collection(&self) -> &'static str {
        Post::COLLECTION.as_str()
    }

    pub async fn fetch_posts(&self) -> RecordResult<Vec<Stored<Post>>> {
        let op = async {
            let records = self.records.fetch(self.collection(), &self.feed).await?;
            decode_all(records)
        };
        self.state
            .dispatch(op, |items, fetched| *items = fetched.clone())
            .await
    }

    /// Publish a post authored by the current member
    pub async fn add_post(&self, post: Post) -> RecordResult<Stored<Post>> {
        let op = async {
            let post = post.fresh(self.member.owner_id.clone());
            let record = self
                .records
                .add(self.collection(), &self.feed, to_payload(&post)?)
                .await?;
            Stored::from_record(record)
        };
        self.state
            .dispatch(op, |items, added| items.insert(0, added.clone()))
            .await
    }

    pub async fn add_comment(&self, post_id: &str, content: &str) -> RecordResult<Stored<Post>> {
        let op = self.change(post_id, |post| {
            let comment = Comment {
                id: next_comment_id(&post.comments, chrono::Utc::now().timestamp_millis()),
                user_id: self.member.owner_id.clone(),
                content: content.to_string(),
                created_at: timestamp_now(),
                extra: Payload::new(),
            };
            post.comments.push(comment);
            Some(json!({ "comments": post.comments }))
        });
        self.state.dispatch(op, replace_item).await
    }

    /// Like a post once per member. Repeated likes leave it unchanged.
    pub async fn like_post(&self, post_id: &str) -> RecordResult<Stored<Post>> {
        let member = &self.member.owner_id;
        let op = self.change(post_id, |post| post.like(member).then(|| engagement(post)));
        self.state.dispatch(op, replace_item).await
    }

    pub async fn unlike_post(&self, post_id: &str) -> RecordResult<Stored<Post>> {
        let member = &self.member.owner_id;
        let op = self.change(post_id, |post| post.unlike(member).then(|| engagement(post)));
        self.state.dispatch(op, replace_item).await
    }

    /// Apply `edit` to the stored post under its record lock. `None` from
    /// `edit` skips the write.
    async fn change<F>(&self, post_id: &str, edit: F) -> RecordResult<Stored<Post>>
    where
        F: FnOnce(&mut Post) -> Option<serde_json::Value>,
    {
        let record = self
            .records
            .modify(self.collection(), post_id, &self.feed, |current| {
                let mut post: Stored<Post> = Stored::from_record(current.clone())?;
                Ok(edit(&mut post.data).and_then(|patch| patch.as_object().cloned()))
            })
            .await?;
        Stored::from_record(record)
    }
}

/// `likes` and `likedBy` always travel together
fn engagement(post: &Post) -> serde_json::Value {
    json!({ "likes": post.likes, "likedBy": post.liked_by })
}

/// Millisecond timestamp id, strictly greater than any numeric id already
/// on the post
fn next_comment_id(existing: &[Comment], now_ms: i64) -> String {
    let last = existing
        .iter()
        .filter_map(|c| c.id.parse::<i64>().ok())
        .max();
    match last {
        Some(last) => now_ms.max(last + 1).to_string(),
        None => now_ms.to_string(),
    }
}
