use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;

use tidings_core::{ClientError, EventBus, EventHandler};

/// Redelivery rules for a consumer group.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Deliveries per message, the first included.
    pub max_deliveries: u32,
    pub redelivery_backoff: Duration,
    /// Messages handled concurrently per consumer group.
    pub max_in_flight: usize,
    /// Messages buffered per consumer group before publish is refused.
    pub queue_capacity: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            redelivery_backoff: Duration::from_millis(200),
            max_in_flight: 64,
            queue_capacity: 1024,
        }
    }
}

type Payload = Arc<Vec<u8>>;

struct Subscription {
    group: String,
    sender: mpsc::Sender<Payload>,
}

/// In-process at-least-once bus with consumer groups.
///
/// Every group subscribed to a topic receives each message published to
/// it. A handler error triggers redelivery until the policy gives up.
/// Publishing to a group whose queue is full fails with
/// `ClientError::Unavailable`.
pub struct LocalEventBus {
    topics: DashMap<String, Vec<Subscription>>,
    policy: DeliveryPolicy,
}

impl LocalEventBus {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            topics: DashMap::new(),
            policy,
        }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(DeliveryPolicy::default())
    }
}

impl EventBus for LocalEventBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ClientError> {
        let Some(subscriptions) = self.topics.get(topic) else {
            tracing::debug!(topic, "no subscribers, dropping message");
            return Ok(());
        };

        let payload = Arc::new(payload);
        let mut full = Vec::new();
        for subscription in subscriptions.iter() {
            match subscription.sender.try_send(payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(topic, group = %subscription.group, "consumer queue full");
                    full.push(subscription.group.as_str());
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!(topic, group = %subscription.group, "consumer has stopped");
                }
            }
        }

        if full.is_empty() {
            Ok(())
        } else {
            Err(ClientError::Unavailable(format!(
                "queue full for {topic} groups: {}",
                full.join(", ")
            )))
        }
    }

    fn subscribe<H: EventHandler>(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<H>,
    ) -> Result<(), ClientError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;

        let mut subscriptions = self.topics.entry(topic.to_string()).or_default();
        if subscriptions.iter().any(|s| s.group == group) {
            return Err(ClientError::Rejected(format!(
                "group {group} already consumes {topic}"
            )));
        }

        let (sender, receiver) = mpsc::channel(self.policy.queue_capacity.max(1));
        subscriptions.push(Subscription {
            group: group.to_string(),
            sender,
        });

        runtime.spawn(consume(
            topic.to_string(),
            group.to_string(),
            receiver,
            handler,
            self.policy.clone(),
        ));
        tracing::info!(topic, group, "consumer group subscribed");
        Ok(())
    }
}

async fn consume<H: EventHandler>(
    topic: String,
    group: String,
    mut receiver: mpsc::Receiver<Payload>,
    handler: Arc<H>,
    policy: DeliveryPolicy,
) {
    let permits = Arc::new(Semaphore::new(policy.max_in_flight.max(1)));
    let topic: Arc<str> = topic.into();
    let group: Arc<str> = group.into();

    while let Some(payload) = receiver.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        let handler = handler.clone();
        let policy = policy.clone();
        let topic = topic.clone();
        let group = group.clone();
        tokio::spawn(async move {
            deliver(&topic, &group, handler.as_ref(), &payload, &policy).await;
            drop(permit);
        });
    }
}

/// Hand one message to the handler until it succeeds or the policy runs
/// out. Returns whether the message was acknowledged.
async fn deliver<H: EventHandler>(
    topic: &str,
    group: &str,
    handler: &H,
    payload: &[u8],
    policy: &DeliveryPolicy,
) -> bool {
    let max_deliveries = policy.max_deliveries.max(1);
    for delivery in 1..=max_deliveries {
        match handler.handle(payload).await {
            Ok(()) => return true,
            Err(e) if delivery < max_deliveries => {
                tracing::debug!(topic, group, delivery, error = %e, "handler failed, redelivering");
                sleep(policy.redelivery_backoff).await;
            }
            Err(e) => {
                tracing::error!(
                    topic,
                    group,
                    deliveries = delivery,
                    error = %e,
                    "redeliveries exhausted, dropping message"
                );
            }
        }
    }
    false
}
