//! Tidings Core - Domain types, settings, and collaborator traits.
//!
//! This crate holds the vocabulary shared by the timeline engine, its
//! storage backends and the server. It has no dependencies on other
//! Tidings crates.

pub mod error;
pub mod ids;
pub mod post;
pub mod settings;
pub mod storage;
pub mod timeline;

// Re-exports for convenience
pub use error::{ClientError, CursorError, HandlerError, StorageError, TransientError};
pub use ids::{PostId, UserId};
pub use post::{DeadLetterRecord, Post, PostCreatedEvent};
pub use settings::{
    FanOutSettings, RetryPolicy, TimelineSettings, DEAD_LETTER_CONSUMER_GROUP, DEAD_LETTER_TOPIC,
    FANOUT_CONSUMER_GROUP, POST_CREATED_TOPIC,
};
pub use storage::{EventBus, EventHandler, FeedStore, FollowGraph, TimelineCache};
pub use timeline::{PageCursor, PagedResult, Score, TimelineEntry};

#[cfg(any(test, feature = "test-utils"))]
pub use storage::memory::{
    InMemoryEventBus, InMemoryFeedStore, InMemoryFollowGraph, InMemoryTimelineCache,
};
