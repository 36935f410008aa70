use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;

use tidings_core::{StorageError, TimelineCache, UserId};

/// Statistics from a trim pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TrimStats {
    pub readers_scanned: usize,
    pub readers_trimmed: usize,
    pub entries_removed: usize,
    pub failures: usize,
}

/// Caps every reader's cache at `max_items`, dropping the oldest entries.
pub struct CacheTrimmer<C: TimelineCache> {
    cache: Arc<C>,
    max_items: usize,
}

impl<C: TimelineCache> CacheTrimmer<C> {
    pub fn new(cache: Arc<C>, max_items: usize) -> Self {
        Self { cache, max_items }
    }

    pub async fn trim(&self, reader: &UserId) -> Result<usize, StorageError> {
        self.cache.trim(reader, self.max_items).await
    }

    /// Trim every known reader. A failing reader is counted and skipped.
    #[tracing::instrument(skip(self), fields(max_items = self.max_items))]
    pub async fn trim_all(&self) -> Result<TrimStats, StorageError> {
        let readers = self.cache.readers().await?;
        let mut stats = TrimStats::default();

        for reader in &readers {
            stats.readers_scanned += 1;
            match self.trim(reader).await {
                Ok(0) => {}
                Ok(removed) => {
                    stats.readers_trimmed += 1;
                    stats.entries_removed += removed;
                }
                Err(e) => {
                    stats.failures += 1;
                    tracing::warn!(reader = %reader, error = %e, "failed to trim timeline cache");
                }
            }
        }

        Ok(stats)
    }

    /// Run trim passes forever, one every `interval`.
    pub async fn run(&self, interval: Duration) {
        loop {
            match self.trim_all().await {
                Ok(stats) => {
                    tracing::info!(
                        readers = stats.readers_scanned,
                        trimmed = stats.readers_trimmed,
                        removed = stats.entries_removed,
                        failures = stats.failures,
                        "trim pass complete"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "trim pass failed");
                }
            }

            sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidings_core::{InMemoryTimelineCache, PostId, TimelineEntry};

    fn entries(ids: std::ops::RangeInclusive<u64>) -> Vec<TimelineEntry> {
        ids.map(|id| TimelineEntry::for_post(PostId(id))).collect()
    }

    /// Cache whose trim fails for one reader.
    struct StubbornCache {
        inner: InMemoryTimelineCache,
        stuck: UserId,
    }

    impl TimelineCache for StubbornCache {
        async fn add_if_exists(
            &self,
            reader: &UserId,
            entry: TimelineEntry,
        ) -> Result<bool, StorageError> {
            self.inner.add_if_exists(reader, entry).await
        }

        async fn add(
            &self,
            reader: &UserId,
            entries: &[TimelineEntry],
        ) -> Result<usize, StorageError> {
            self.inner.add(reader, entries).await
        }

        async fn range_reverse(
            &self,
            reader: &UserId,
            before: Option<TimelineEntry>,
            limit: usize,
        ) -> Result<Vec<TimelineEntry>, StorageError> {
            self.inner.range_reverse(reader, before, limit).await
        }

        async fn size(&self, reader: &UserId) -> Result<usize, StorageError> {
            self.inner.size(reader).await
        }

        async fn trim(&self, reader: &UserId, max_items: usize) -> Result<usize, StorageError> {
            if reader == &self.stuck {
                return Err(StorageError::Unavailable("locked".into()));
            }
            self.inner.trim(reader, max_items).await
        }

        async fn readers(&self) -> Result<Vec<UserId>, StorageError> {
            self.inner.readers().await
        }
    }

    #[tokio::test]
    async fn test_trim_keeps_highest_scores() {
        let cache = Arc::new(InMemoryTimelineCache::new());
        let reader = UserId::from("ada");
        cache.warm(&reader, &entries(1..=60));
        let trimmer = CacheTrimmer::new(cache.clone(), 50);

        assert_eq!(trimmer.trim(&reader).await.unwrap(), 10);

        let kept = cache.entries(&reader);
        assert_eq!(kept.len(), 50);
        assert_eq!(kept.first().unwrap().post_id, PostId(60));
        assert_eq!(kept.last().unwrap().post_id, PostId(11));

        // Second pass is a no-op
        assert_eq!(trimmer.trim(&reader).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_trim_all_bounds_every_reader() {
        let cache = Arc::new(InMemoryTimelineCache::new());
        cache.warm(&UserId::from("a"), &entries(1..=8));
        cache.warm(&UserId::from("b"), &entries(1..=3));
        cache.warm(&UserId::from("c"), &entries(1..=5));
        let trimmer = CacheTrimmer::new(cache.clone(), 4);

        let stats = trimmer.trim_all().await.unwrap();

        assert_eq!(
            stats,
            TrimStats {
                readers_scanned: 3,
                readers_trimmed: 2,
                entries_removed: 5,
                failures: 0,
            }
        );
        for reader in cache.readers().await.unwrap() {
            assert!(cache.size(&reader).await.unwrap() <= 4);
        }
    }

    #[tokio::test]
    async fn test_trim_all_skips_failing_reader() {
        let inner = InMemoryTimelineCache::new();
        inner.warm(&UserId::from("a"), &entries(1..=8));
        inner.warm(&UserId::from("b"), &entries(1..=8));
        let cache = Arc::new(StubbornCache {
            inner,
            stuck: UserId::from("a"),
        });
        let trimmer = CacheTrimmer::new(cache.clone(), 4);

        let stats = trimmer.trim_all().await.unwrap();

        assert_eq!(stats.failures, 1);
        assert_eq!(stats.readers_trimmed, 1);
        assert_eq!(cache.inner.entries(&UserId::from("b")).len(), 4);
    }
}
