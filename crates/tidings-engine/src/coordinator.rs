use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;

use tidings_core::{
    ClientError, DeadLetterRecord, EventBus, EventHandler, FanOutSettings, FollowGraph,
    HandlerError, PostCreatedEvent, RetryPolicy, StorageError, TimelineCache, TimelineEntry,
    UserId,
};

use crate::retry::{retry, with_timeout};

/// Whole-event fan-out failure. Surfaced to the bus for redelivery.
#[derive(Error, Debug)]
pub enum FanOutError {
    #[error("Follow graph unavailable: {0}")]
    FollowGraph(#[from] ClientError),
}

/// How a post reaches its author's followers, decided once per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Write into every warm follower cache now.
    Push,
    /// Skip writes; followers pick the post up through backfill.
    Pull,
}

impl FanOutPolicy {
    pub fn for_follower_count(count: u64, celebrity_threshold: u64) -> Self {
        if count > celebrity_threshold {
            FanOutPolicy::Pull
        } else {
            FanOutPolicy::Push
        }
    }
}

/// Outcome of handling one post creation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub policy: FanOutPolicy,
    /// Followers a write was attempted for.
    pub followers: usize,
    pub written: usize,
    /// Followers whose cache was cold.
    pub skipped_cold: usize,
    pub dead_lettered: usize,
}

impl FanOutReport {
    fn new(policy: FanOutPolicy) -> Self {
        Self {
            policy,
            followers: 0,
            written: 0,
            skipped_cold: 0,
            dead_lettered: 0,
        }
    }
}

/// Distributes new posts into follower timeline caches.
pub struct FanOutCoordinator<C, G, B>
where
    C: TimelineCache,
    G: FollowGraph,
    B: EventBus,
{
    cache: Arc<C>,
    graph: Arc<G>,
    bus: Arc<B>,
    settings: FanOutSettings,
}

impl<C, G, B> FanOutCoordinator<C, G, B>
where
    C: TimelineCache,
    G: FollowGraph,
    B: EventBus,
{
    pub fn new(cache: Arc<C>, graph: Arc<G>, bus: Arc<B>, settings: FanOutSettings) -> Self {
        Self {
            cache,
            graph,
            bus,
            settings,
        }
    }

    pub fn settings(&self) -> &FanOutSettings {
        &self.settings
    }

    /// Fan a new post out to the author's followers.
    ///
    /// Per-follower failures never fail the event; they end up on the
    /// dead-letter topic. Only a follow graph failure is returned as an
    /// error, so the bus can redeliver.
    #[tracing::instrument(
        skip(self, event),
        fields(author = %event.author_id, post_id = %event.post_id)
    )]
    pub async fn on_post_created(
        &self,
        event: &PostCreatedEvent,
    ) -> Result<FanOutReport, FanOutError> {
        let limit = self.settings.call_timeout;
        let count = with_timeout(limit, self.graph.follower_count(&event.author_id)).await?;

        let policy = FanOutPolicy::for_follower_count(count, self.settings.celebrity_threshold);
        let mut report = FanOutReport::new(policy);

        if policy == FanOutPolicy::Pull {
            tracing::info!(
                followers = count,
                threshold = self.settings.celebrity_threshold,
                "celebrity author, skipping push fan-out"
            );
            return Ok(report);
        }

        let entry = TimelineEntry::for_post(event.post_id);
        let batch_size = self.settings.batch_size.max(1);
        let mut followers = self.graph.followers(&event.author_id);
        let mut batch = Vec::with_capacity(batch_size);
        let mut batches = 0usize;

        loop {
            let next = with_timeout(limit, async { followers.next().await.transpose() }).await?;
            let done = match next {
                Some(follower) => {
                    batch.push(follower);
                    false
                }
                None => true,
            };

            if batch.len() >= batch_size || (done && !batch.is_empty()) {
                if batches > 0 {
                    sleep(self.settings.batch_delay).await;
                }
                self.write_batch(event, entry, &batch, &mut report).await;
                batch.clear();
                batches += 1;
            }

            if done {
                break;
            }
        }

        tracing::debug!(
            batches,
            written = report.written,
            skipped_cold = report.skipped_cold,
            dead_lettered = report.dead_lettered,
            "fan-out complete"
        );
        Ok(report)
    }

    async fn write_batch(
        &self,
        event: &PostCreatedEvent,
        entry: TimelineEntry,
        batch: &[UserId],
        report: &mut FanOutReport,
    ) {
        let writes = batch.iter().cloned().map(|follower| {
            write_follower(
                self.cache.clone(),
                follower,
                entry,
                self.settings.retry.clone(),
                self.settings.call_timeout,
            )
        });

        for (follower, outcome) in join_all(writes).await {
            report.followers += 1;
            match outcome {
                Ok(true) => report.written += 1,
                Ok(false) => report.skipped_cold += 1,
                Err(e) => {
                    self.dead_letter(event, &follower, &e).await;
                    report.dead_lettered += 1;
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        event: &PostCreatedEvent,
        follower: &UserId,
        error: &StorageError,
    ) {
        tracing::warn!(
            follower = %follower,
            error = %error,
            "fan-out write failed, dead-lettering"
        );

        let record = DeadLetterRecord::new(event, follower.clone(), error);
        let payload = match record.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(follower = %follower, error = %e, "failed to encode dead letter");
                return;
            }
        };
        let publish = self.bus.publish(&self.settings.dead_letter_topic, payload);
        if let Err(e) = with_timeout(self.settings.call_timeout, publish).await {
            tracing::error!(follower = %follower, error = %e, "failed to publish dead letter");
        }
    }
}

/// Conditional write of one entry into a follower's cache, retried on
/// transient failures.
async fn write_follower<C: TimelineCache>(
    cache: Arc<C>,
    follower: UserId,
    entry: TimelineEntry,
    policy: RetryPolicy,
    limit: Duration,
) -> (UserId, Result<bool, StorageError>) {
    let outcome = retry(&policy, || {
        with_timeout(limit, cache.add_if_exists(&follower, entry))
    })
    .await;
    (follower, outcome)
}

/// Bus consumer driving the coordinator from post-created messages.
pub struct PostCreatedHandler<C, G, B>
where
    C: TimelineCache,
    G: FollowGraph,
    B: EventBus,
{
    coordinator: Arc<FanOutCoordinator<C, G, B>>,
}

impl<C, G, B> PostCreatedHandler<C, G, B>
where
    C: TimelineCache,
    G: FollowGraph,
    B: EventBus,
{
    pub fn new(coordinator: Arc<FanOutCoordinator<C, G, B>>) -> Self {
        Self { coordinator }
    }
}

impl<C, G, B> EventHandler for PostCreatedHandler<C, G, B>
where
    C: TimelineCache + 'static,
    G: FollowGraph + 'static,
    B: EventBus + 'static,
{
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let event = match PostCreatedEvent::from_json(payload) {
            Ok(event) => event,
            Err(e) => {
                // Redelivery cannot fix a malformed payload
                tracing::warn!(error = %e, "discarding malformed post-created event");
                return Ok(());
            }
        };

        self.coordinator
            .on_post_created(&event)
            .await
            .map(|_| ())
            .map_err(HandlerError::new)
    }
}
