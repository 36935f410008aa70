use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::{ClientError, HandlerError, StorageError};
use crate::ids::{PostId, UserId};
use crate::post::Post;
use crate::timeline::TimelineEntry;

/// Per-reader ordered set of post identifiers.
///
/// A reader's cache "exists" once it holds at least one entry. Every write
/// is a set-add keyed by post id, so repeated and concurrent writes commute.
pub trait TimelineCache: Send + Sync {
    /// Add the entry only if the reader's cache already exists.
    /// Returns Ok(true) if the cache was warm (the entry is now present),
    /// Ok(false) if it was cold and nothing was written.
    fn add_if_exists(
        &self,
        reader: &UserId,
        entry: TimelineEntry,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Add entries, creating the cache if needed. Returns how many entries
    /// were new. Adding nothing never creates the cache.
    fn add(
        &self,
        reader: &UserId,
        entries: &[TimelineEntry],
    ) -> impl Future<Output = Result<usize, StorageError>> + Send;

    /// Up to `limit` entries strictly older than `before` (or the newest
    /// entries when `before` is None), newest first.
    fn range_reverse(
        &self,
        reader: &UserId,
        before: Option<TimelineEntry>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<TimelineEntry>, StorageError>> + Send;

    fn size(&self, reader: &UserId) -> impl Future<Output = Result<usize, StorageError>> + Send;

    /// Remove the lowest-scored entries until at most `max_items` remain.
    /// Returns the number removed.
    fn trim(
        &self,
        reader: &UserId,
        max_items: usize,
    ) -> impl Future<Output = Result<usize, StorageError>> + Send;

    /// Every reader with an existing cache.
    fn readers(&self) -> impl Future<Output = Result<Vec<UserId>, StorageError>> + Send;
}

/// Read access to the follow graph service.
pub trait FollowGraph: Send + Sync {
    fn follower_count(
        &self,
        author: &UserId,
    ) -> impl Future<Output = Result<u64, ClientError>> + Send;

    /// Stream the author's followers.
    fn followers<'a>(&'a self, author: &'a UserId) -> BoxStream<'a, Result<UserId, ClientError>>;

    /// Authors the reader follows.
    fn followings(
        &self,
        reader: &UserId,
    ) -> impl Future<Output = Result<Vec<UserId>, ClientError>> + Send;
}

/// Read access to the durable feed store.
pub trait FeedStore: Send + Sync {
    /// Resolve a post. Ok(None) if it no longer exists.
    fn get(&self, id: PostId) -> impl Future<Output = Result<Option<Post>, ClientError>> + Send;

    /// Identifiers of the author's posts created in `[from, to)`, in
    /// identifier order.
    fn find_ids_between(
        &self,
        author: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<PostId>, ClientError>> + Send;
}

/// Consumer of bus messages.
pub trait EventHandler: Send + Sync + 'static {
    /// Process one delivery. An error asks the bus to redeliver.
    fn handle(&self, payload: &[u8]) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

/// At-least-once message bus with consumer groups.
pub trait EventBus: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Register `handler` as the consumer for `group` on `topic`. Each
    /// message is delivered once per group, possibly more than once.
    fn subscribe<H: EventHandler>(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<H>,
    ) -> Result<(), ClientError>;
}

// In-memory implementations for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod memory {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::RwLock;

    use futures::stream::{self, StreamExt};

    use crate::timeline::Score;

    #[derive(Default)]
    struct SortedSet {
        scores: HashMap<PostId, Score>,
        ordered: BTreeSet<TimelineEntry>,
    }

    impl SortedSet {
        /// Insert or rescore. Returns true if the post was not present.
        fn insert(&mut self, entry: TimelineEntry) -> bool {
            match self.scores.insert(entry.post_id, entry.score) {
                Some(old) if old == entry.score => false,
                Some(old) => {
                    self.ordered.remove(&TimelineEntry::new(entry.post_id, old));
                    self.ordered.insert(entry);
                    false
                }
                None => {
                    self.ordered.insert(entry);
                    true
                }
            }
        }

        fn pop_oldest(&mut self) -> bool {
            match self.ordered.pop_first() {
                Some(entry) => {
                    self.scores.remove(&entry.post_id);
                    true
                }
                None => false,
            }
        }

        fn len(&self) -> usize {
            self.ordered.len()
        }
    }

    /// In-memory timeline cache for testing.
    #[derive(Default)]
    pub struct InMemoryTimelineCache {
        timelines: RwLock<HashMap<UserId, SortedSet>>,
        writes: AtomicUsize,
    }

    impl InMemoryTimelineCache {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a reader's cache, making it warm.
        pub fn warm(&self, reader: &UserId, entries: &[TimelineEntry]) {
            let mut timelines = self.timelines.write().unwrap();
            let set = timelines.entry(reader.clone()).or_default();
            for entry in entries {
                set.insert(*entry);
            }
        }

        /// All entries for a reader, newest first.
        pub fn entries(&self, reader: &UserId) -> Vec<TimelineEntry> {
            self.timelines
                .read()
                .unwrap()
                .get(reader)
                .map(|set| set.ordered.iter().rev().copied().collect())
                .unwrap_or_default()
        }

        pub fn exists(&self, reader: &UserId) -> bool {
            self.timelines.read().unwrap().contains_key(reader)
        }

        /// Number of add / add_if_exists calls received.
        pub fn write_calls(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl TimelineCache for InMemoryTimelineCache {
        async fn add_if_exists(
            &self,
            reader: &UserId,
            entry: TimelineEntry,
        ) -> Result<bool, StorageError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut timelines = self.timelines.write().unwrap();
            match timelines.get_mut(reader) {
                Some(set) => {
                    set.insert(entry);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn add(
            &self,
            reader: &UserId,
            entries: &[TimelineEntry],
        ) -> Result<usize, StorageError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if entries.is_empty() {
                return Ok(0);
            }
            let mut timelines = self.timelines.write().unwrap();
            let set = timelines.entry(reader.clone()).or_default();
            Ok(entries.iter().filter(|e| set.insert(**e)).count())
        }

        async fn range_reverse(
            &self,
            reader: &UserId,
            before: Option<TimelineEntry>,
            limit: usize,
        ) -> Result<Vec<TimelineEntry>, StorageError> {
            let timelines = self.timelines.read().unwrap();
            let Some(set) = timelines.get(reader) else {
                return Ok(Vec::new());
            };
            let entries = match before {
                Some(bound) => set.ordered.range(..bound).rev().take(limit).copied().collect(),
                None => set.ordered.iter().rev().take(limit).copied().collect(),
            };
            Ok(entries)
        }

        async fn size(&self, reader: &UserId) -> Result<usize, StorageError> {
            Ok(self
                .timelines
                .read()
                .unwrap()
                .get(reader)
                .map(SortedSet::len)
                .unwrap_or(0))
        }

        async fn trim(&self, reader: &UserId, max_items: usize) -> Result<usize, StorageError> {
            let mut timelines = self.timelines.write().unwrap();
            let Some(set) = timelines.get_mut(reader) else {
                return Ok(0);
            };

            let mut removed = 0;
            while set.len() > max_items && set.pop_oldest() {
                removed += 1;
            }
            if set.ordered.is_empty() {
                timelines.remove(reader);
            }
            Ok(removed)
        }

        async fn readers(&self) -> Result<Vec<UserId>, StorageError> {
            let mut readers: Vec<_> = self.timelines.read().unwrap().keys().cloned().collect();
            readers.sort();
            Ok(readers)
        }
    }

    /// In-memory follow graph for testing.
    #[derive(Default)]
    pub struct InMemoryFollowGraph {
        followers: RwLock<HashMap<UserId, Vec<UserId>>>,
        followings: RwLock<HashMap<UserId, Vec<UserId>>>,
        unavailable: AtomicBool,
        followings_calls: AtomicUsize,
    }

    impl InMemoryFollowGraph {
        pub fn new() -> Self {
            Self::default()
        }

        /// Record that `reader` follows `author`.
        pub fn follow(&self, reader: &UserId, author: &UserId) {
            self.followers
                .write()
                .unwrap()
                .entry(author.clone())
                .or_default()
                .push(reader.clone());
            self.followings
                .write()
                .unwrap()
                .entry(reader.clone())
                .or_default()
                .push(author.clone());
        }

        /// Make every call fail with a transient error.
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn followings_calls(&self) -> usize {
            self.followings_calls.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), ClientError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(ClientError::Unavailable("follow graph is down".to_string()));
            }
            Ok(())
        }
    }

    impl FollowGraph for InMemoryFollowGraph {
        async fn follower_count(&self, author: &UserId) -> Result<u64, ClientError> {
            self.check()?;
            Ok(self
                .followers
                .read()
                .unwrap()
                .get(author)
                .map(|f| f.len() as u64)
                .unwrap_or(0))
        }

        fn followers<'a>(
            &'a self,
            author: &'a UserId,
        ) -> BoxStream<'a, Result<UserId, ClientError>> {
            if let Err(e) = self.check() {
                return stream::once(async move { Err(e) }).boxed();
            }
            let followers = self
                .followers
                .read()
                .unwrap()
                .get(author)
                .cloned()
                .unwrap_or_default();
            stream::iter(followers.into_iter().map(Ok)).boxed()
        }

        async fn followings(&self, reader: &UserId) -> Result<Vec<UserId>, ClientError> {
            self.followings_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self
                .followings
                .read()
                .unwrap()
                .get(reader)
                .cloned()
                .unwrap_or_default())
        }
    }

    /// In-memory feed store for testing.
    #[derive(Default)]
    pub struct InMemoryFeedStore {
        posts: RwLock<HashMap<PostId, Post>>,
        range_queries: AtomicUsize,
    }

    impl InMemoryFeedStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, post: Post) {
            self.posts.write().unwrap().insert(post.id, post);
        }

        pub fn remove(&self, id: PostId) -> Option<Post> {
            self.posts.write().unwrap().remove(&id)
        }

        /// Number of find_ids_between calls received.
        pub fn range_queries(&self) -> usize {
            self.range_queries.load(Ordering::SeqCst)
        }
    }

    impl FeedStore for InMemoryFeedStore {
        async fn get(&self, id: PostId) -> Result<Option<Post>, ClientError> {
            Ok(self.posts.read().unwrap().get(&id).cloned())
        }

        async fn find_ids_between(
            &self,
            author: &UserId,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<PostId>, ClientError> {
            self.range_queries.fetch_add(1, Ordering::SeqCst);
            let posts = self.posts.read().unwrap();
            let mut ids: Vec<_> = posts
                .values()
                .filter(|p| &p.author_id == author && p.created_at >= from && p.created_at < to)
                .map(|p| p.id)
                .collect();
            ids.sort();
            Ok(ids)
        }
    }

    /// In-memory event bus for testing. Records publishes and subscriptions
    /// without delivering anything.
    #[derive(Default)]
    pub struct InMemoryEventBus {
        published: RwLock<Vec<(String, Vec<u8>)>>,
        subscriptions: RwLock<Vec<(String, String)>>,
        failing: AtomicBool,
    }

    impl InMemoryEventBus {
        pub fn new() -> Self {
            Self::default()
        }

        /// Payloads published to `topic`, in publish order.
        pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
            self.published
                .read()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, payload)| payload.clone())
                .collect()
        }

        pub fn subscriptions(&self) -> Vec<(String, String)> {
            self.subscriptions.read().unwrap().clone()
        }

        /// Make publishes fail with a transient error.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl EventBus for InMemoryEventBus {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ClientError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ClientError::Unavailable("bus is down".to_string()));
            }
            self.published
                .write()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }

        fn subscribe<H: EventHandler>(
            &self,
            topic: &str,
            group: &str,
            _handler: Arc<H>,
        ) -> Result<(), ClientError> {
            self.subscriptions
                .write()
                .unwrap()
                .push((topic.to_string(), group.to_string()));
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::TimeZone;

        fn reader() -> UserId {
            UserId::from("reader")
        }

        fn entries(ids: &[u64]) -> Vec<TimelineEntry> {
            ids.iter().map(|id| TimelineEntry::for_post(PostId(*id))).collect()
        }

        #[tokio::test]
        async fn test_add_if_exists_skips_cold_cache() {
            let cache = InMemoryTimelineCache::new();
            let entry = TimelineEntry::for_post(PostId(1));

            assert!(!cache.add_if_exists(&reader(), entry).await.unwrap());
            assert!(!cache.exists(&reader()));

            cache.warm(&reader(), &entries(&[0]));
            assert!(cache.add_if_exists(&reader(), entry).await.unwrap());
            assert_eq!(cache.size(&reader()).await.unwrap(), 2);
        }

        #[tokio::test]
        async fn test_add_is_idempotent() {
            let cache = InMemoryTimelineCache::new();

            assert_eq!(cache.add(&reader(), &entries(&[1, 2])).await.unwrap(), 2);
            assert_eq!(cache.add(&reader(), &entries(&[2, 3])).await.unwrap(), 1);
            assert_eq!(cache.size(&reader()).await.unwrap(), 3);
        }

        #[tokio::test]
        async fn test_add_nothing_keeps_cache_cold() {
            let cache = InMemoryTimelineCache::new();
            cache.add(&reader(), &[]).await.unwrap();
            assert!(!cache.exists(&reader()));
        }

        #[tokio::test]
        async fn test_range_reverse_is_exclusive() {
            let cache = InMemoryTimelineCache::new();
            cache.warm(&reader(), &entries(&[6, 7, 8, 9, 10]));

            let newest = cache.range_reverse(&reader(), None, 3).await.unwrap();
            assert_eq!(newest, entries(&[10, 9, 8]));

            let before = Some(TimelineEntry::for_post(PostId(8)));
            let older = cache.range_reverse(&reader(), before, 10).await.unwrap();
            assert_eq!(older, entries(&[7, 6]));
        }

        #[tokio::test]
        async fn test_trim_keeps_highest_scores() {
            let cache = InMemoryTimelineCache::new();
            cache.warm(&reader(), &entries(&[1, 5, 3, 4, 2]));

            assert_eq!(cache.trim(&reader(), 2).await.unwrap(), 3);
            assert_eq!(cache.entries(&reader()), entries(&[5, 4]));
            assert_eq!(cache.trim(&reader(), 2).await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_feed_store_range_is_half_open() {
            let store = InMemoryFeedStore::new();
            let author = UserId::from("grace");
            let day = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
            let next_day = day + chrono::Duration::days(1);

            let at_start = PostId::compose(day, 0, 0);
            let at_end = PostId::compose(next_day, 0, 0);
            store.insert(Post::new(at_start, author.clone(), "a", day));
            store.insert(Post::new(at_end, author.clone(), "b", next_day));

            let ids = store.find_ids_between(&author, day, next_day).await.unwrap();
            assert_eq!(ids, vec![at_start]);
        }

        #[tokio::test]
        async fn test_follow_graph_followers_stream() {
            let graph = InMemoryFollowGraph::new();
            let author = UserId::from("grace");
            graph.follow(&UserId::from("a"), &author);
            graph.follow(&UserId::from("b"), &author);

            let followers: Vec<_> = graph.followers(&author).collect().await;
            assert_eq!(followers.len(), 2);
            assert_eq!(graph.follower_count(&author).await.unwrap(), 2);
            assert_eq!(
                graph.followings(&UserId::from("a")).await.unwrap(),
                vec![author]
            );
        }
    }
}
