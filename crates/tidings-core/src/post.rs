use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PostId, UserId};

/// A post as resolved from the feed store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn new(
        id: PostId,
        author_id: UserId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            author_id,
            content: content.into(),
            created_at,
        }
    }
}

/// Published once per successful post creation. Delivered at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostCreatedEvent {
    pub author_id: UserId,
    pub post_id: PostId,
    pub created_at: DateTime<Utc>,
}

impl PostCreatedEvent {
    pub fn new(author_id: UserId, post_id: PostId, created_at: DateTime<Utc>) -> Self {
        Self {
            author_id,
            post_id,
            created_at,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A follower write that failed after exhausting retries.
///
/// Append-only: emitted to the dead-letter topic and never read back by
/// the timeline core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub author_id: UserId,
    pub post_id: PostId,
    pub follower_id: UserId,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        event: &PostCreatedEvent,
        follower_id: UserId,
        error: impl std::fmt::Display,
    ) -> Self {
        Self {
            author_id: event.author_id.clone(),
            post_id: event.post_id,
            follower_id,
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Stable key for deduplicating emissions repeated by event redelivery.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.post_id, self.follower_id)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
