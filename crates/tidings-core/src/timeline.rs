use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CursorError;
use crate::ids::PostId;

/// Recency score of a timeline entry. Higher is newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(pub u64);

impl From<PostId> for Score {
    fn from(id: PostId) -> Self {
        Score(id.0)
    }
}

/// A member of a reader's timeline cache.
///
/// Entries order by `(score, post_id)`; the cache holds at most one entry
/// per post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub score: Score,
    pub post_id: PostId,
}

impl TimelineEntry {
    pub fn new(post_id: PostId, score: Score) -> Self {
        Self { score, post_id }
    }

    /// Entry for a post scored by its own snowflake identifier. Push fan-out
    /// and backfill both build entries this way.
    pub fn for_post(post_id: PostId) -> Self {
        Self::new(post_id, Score::from(post_id))
    }
}

/// Position in a reader's timeline from which the next page resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub score: Score,
    pub post_id: PostId,
}

impl PageCursor {
    pub fn after(entry: &TimelineEntry) -> Self {
        Self {
            score: entry.score,
            post_id: entry.post_id,
        }
    }

    /// The exclusive upper bound for the next cache range query.
    pub fn as_entry(&self) -> TimelineEntry {
        TimelineEntry::new(self.post_id, self.score)
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.score.0, self.post_id.0))
    }

    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CursorError::Encoding)?;
        let raw = String::from_utf8(raw).map_err(|_| CursorError::Encoding)?;

        let (score, post_id) = raw
            .split_once(':')
            .ok_or_else(|| CursorError::Shape(raw.clone()))?;
        let score = score
            .parse::<u64>()
            .map_err(|_| CursorError::Shape(raw.clone()))?;
        let post_id = post_id
            .parse::<u64>()
            .map_err(|_| CursorError::Shape(raw.clone()))?;

        Ok(Self {
            score: Score(score),
            post_id: PostId(post_id),
        })
    }
}

/// One page of a timeline read.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// Present whenever the page is non-empty.
    pub next_cursor: Option<PageCursor>,
    /// True only when an entry beyond this page was observed.
    pub has_next: bool,
}

impl<T> PagedResult<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_next: false,
        }
    }
}
