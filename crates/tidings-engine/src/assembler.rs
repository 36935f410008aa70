use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;

use tidings_core::{
    FeedStore, FollowGraph, PageCursor, PagedResult, Post, StorageError, TimelineCache,
    TimelineEntry, TimelineSettings, UserId,
};

use crate::backfill::BackfillEngine;
use crate::retry::with_timeout;

#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("Page size must be at least 1")]
    InvalidPageSize,

    #[error("Timeline cache error: {0}")]
    Cache(#[from] StorageError),
}

/// Serves paginated home timelines from the cache, backfilling on a miss.
pub struct TimelineAssembler<C, G, F>
where
    C: TimelineCache,
    G: FollowGraph,
    F: FeedStore,
{
    cache: Arc<C>,
    feed: Arc<F>,
    backfill: BackfillEngine<C, G, F>,
    settings: TimelineSettings,
}

impl<C, G, F> TimelineAssembler<C, G, F>
where
    C: TimelineCache,
    G: FollowGraph,
    F: FeedStore,
{
    pub fn new(cache: Arc<C>, graph: Arc<G>, feed: Arc<F>, settings: TimelineSettings) -> Self {
        let backfill = BackfillEngine::new(cache.clone(), graph, feed.clone(), settings.clone());
        Self {
            cache,
            feed,
            backfill,
            settings,
        }
    }

    pub fn settings(&self) -> &TimelineSettings {
        &self.settings
    }

    /// One page of the reader's timeline, newest first, strictly older than
    /// `cursor`. Page sizes above the maximum are clamped.
    ///
    /// A failed or insufficient backfill shortens the page instead of
    /// failing it. Posts missing from the feed store are dropped.
    #[tracing::instrument(skip(self, reader, cursor), fields(reader = %reader))]
    pub async fn get_timeline(
        &self,
        reader: &UserId,
        page_size: usize,
        cursor: Option<PageCursor>,
    ) -> Result<PagedResult<Post>, TimelineError> {
        if page_size == 0 {
            return Err(TimelineError::InvalidPageSize);
        }
        let page_size = page_size.min(self.settings.max_page_size);
        let before = cursor.map(|c| c.as_entry());

        let mut entries = self.query(reader, before, page_size).await?;

        if entries.len() < page_size {
            let anchor = self.anchor_for(cursor).await;
            match self.backfill.backfill(reader, anchor, page_size).await {
                Ok(report) => tracing::debug!(
                    iterations = report.iterations,
                    entries_added = report.entries_added,
                    "backfilled thin cache"
                ),
                Err(e) => tracing::warn!(error = %e, "backfill failed, serving partial page"),
            }

            match self.query(reader, before, page_size).await {
                Ok(refreshed) => entries = refreshed,
                Err(e) => tracing::warn!(error = %e, "cache re-read failed after backfill"),
            }
        }

        let has_next = entries.len() > page_size;
        entries.truncate(page_size);
        let next_cursor = entries.last().map(PageCursor::after);
        let items = self.resolve(&entries).await;

        Ok(PagedResult {
            items,
            next_cursor,
            has_next,
        })
    }

    /// Fetch one entry more than the page to learn whether another page exists.
    async fn query(
        &self,
        reader: &UserId,
        before: Option<TimelineEntry>,
        page_size: usize,
    ) -> Result<Vec<TimelineEntry>, StorageError> {
        with_timeout(
            self.settings.call_timeout,
            self.cache.range_reverse(reader, before, page_size + 1),
        )
        .await
    }

    /// Creation time of the cursor's post, or now for a first page.
    async fn anchor_for(&self, cursor: Option<PageCursor>) -> DateTime<Utc> {
        let Some(cursor) = cursor else {
            return Utc::now();
        };

        match with_timeout(self.settings.call_timeout, self.feed.get(cursor.post_id)).await {
            Ok(Some(post)) => post.created_at,
            _ => cursor.post_id.created_at(),
        }
    }

    async fn resolve(&self, entries: &[TimelineEntry]) -> Vec<Post> {
        let limit = self.settings.call_timeout;
        let lookups = join_all(entries.iter().map(|entry| {
            let feed = self.feed.clone();
            let post_id = entry.post_id;
            async move { with_timeout(limit, feed.get(post_id)).await }
        }))
        .await;

        entries
            .iter()
            .zip(lookups)
            .filter_map(|(entry, lookup)| match lookup {
                Ok(Some(post)) => Some(post),
                Ok(None) => {
                    tracing::debug!(post_id = %entry.post_id, "dropping deleted post");
                    None
                }
                Err(e) => {
                    tracing::warn!(post_id = %entry.post_id, error = %e, "could not resolve post");
                    None
                }
            })
            .collect()
    }
}
