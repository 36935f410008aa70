use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;

use tidings_core::{
    ClientError, FeedStore, FollowGraph, StorageError, TimelineCache, TimelineEntry,
    TimelineSettings, UserId,
};

use crate::retry::with_timeout;

#[derive(Error, Debug)]
pub enum BackfillError {
    #[error("Could not load followings: {0}")]
    Followings(ClientError),

    #[error("Feed store query failed: {0}")]
    FeedStore(ClientError),

    #[error("Cache error during backfill: {0}")]
    Cache(#[from] StorageError),
}

/// Work done by one backfill run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Day windows scanned. Never exceeds the configured day range.
    pub iterations: u32,
    pub entries_added: usize,
    /// Feed store queries that failed and were skipped.
    pub followee_failures: usize,
}

/// Populates a reader's cache from followees' post history, one day
/// window further back per iteration.
pub struct BackfillEngine<C, G, F>
where
    C: TimelineCache,
    G: FollowGraph,
    F: FeedStore,
{
    cache: Arc<C>,
    graph: Arc<G>,
    feed: Arc<F>,
    settings: TimelineSettings,
}

impl<C, G, F> BackfillEngine<C, G, F>
where
    C: TimelineCache,
    G: FollowGraph,
    F: FeedStore,
{
    pub fn new(cache: Arc<C>, graph: Arc<G>, feed: Arc<F>, settings: TimelineSettings) -> Self {
        Self {
            cache,
            graph,
            feed,
            settings,
        }
    }

    /// Scan windows `[anchor - d days, anchor - (d-1) days)` for
    /// `d = 1..=max_day_range`, stopping once the cache holds `page_size`
    /// entries.
    #[tracing::instrument(skip(self, reader), fields(reader = %reader))]
    pub async fn backfill(
        &self,
        reader: &UserId,
        anchor: DateTime<Utc>,
        page_size: usize,
    ) -> Result<BackfillReport, BackfillError> {
        let limit = self.settings.call_timeout;
        let mut report = BackfillReport::default();

        let followees = with_timeout(limit, self.graph.followings(reader))
            .await
            .map_err(BackfillError::Followings)?;
        if followees.is_empty() {
            tracing::debug!("reader follows nobody, nothing to backfill");
            return Ok(report);
        }

        for day in 1..=self.settings.max_day_range {
            report.iterations = day;
            let to = anchor - Duration::days(i64::from(day) - 1);
            let from = anchor - Duration::days(i64::from(day));

            let fills = followees.iter().cloned().map(|followee| {
                fill_from(
                    self.cache.clone(),
                    self.feed.clone(),
                    reader.clone(),
                    followee,
                    (from, to),
                    limit,
                )
            });
            let outcomes = join_all(fills).await;

            for (followee, outcome) in followees.iter().zip(outcomes) {
                match outcome {
                    Ok(added) => report.entries_added += added,
                    Err(BackfillError::FeedStore(e)) => {
                        tracing::warn!(followee = %followee, error = %e, "skipping followee");
                        report.followee_failures += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            let size = with_timeout(limit, self.cache.size(reader)).await?;
            if size >= page_size {
                break;
            }
        }

        tracing::debug!(
            iterations = report.iterations,
            entries_added = report.entries_added,
            "backfill finished"
        );
        Ok(report)
    }
}

/// Copy one followee's posts from a day window into the reader's cache.
async fn fill_from<C: TimelineCache, F: FeedStore>(
    cache: Arc<C>,
    feed: Arc<F>,
    reader: UserId,
    followee: UserId,
    (from, to): (DateTime<Utc>, DateTime<Utc>),
    limit: std::time::Duration,
) -> Result<usize, BackfillError> {
    let ids = with_timeout(limit, feed.find_ids_between(&followee, from, to))
        .await
        .map_err(BackfillError::FeedStore)?;

    let entries: Vec<_> = ids.into_iter().map(TimelineEntry::for_post).collect();
    Ok(with_timeout(limit, cache.add(&reader, &entries)).await?)
}
