use std::time::Duration;

/// Topic on which post creation events are published.
pub const POST_CREATED_TOPIC: &str = "post-created";

/// Consumer group of the fan-out coordinator.
pub const FANOUT_CONSUMER_GROUP: &str = "timeline-fanout";

/// Topic receiving dead-letter records from fan-out.
pub const DEAD_LETTER_TOPIC: &str = "post-created-dlq";

/// Consumer group that records dead letters.
pub const DEAD_LETTER_CONSUMER_GROUP: &str = "dead-letter-recorder";

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the given retry (1 = the first retry).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// Settings for push fan-out.
#[derive(Debug, Clone)]
pub struct FanOutSettings {
    /// Authors with more followers than this are never pushed.
    pub celebrity_threshold: u64,
    pub batch_size: usize,
    /// Pause between consecutive follower batches.
    pub batch_delay: Duration,
    /// Deadline for each follow-graph, cache and bus call.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub dead_letter_topic: String,
}

impl Default for FanOutSettings {
    fn default() -> Self {
        Self {
            celebrity_threshold: 10_000,
            batch_size: 100,
            batch_delay: Duration::from_millis(10),
            call_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            dead_letter_topic: DEAD_LETTER_TOPIC.to_string(),
        }
    }
}

/// Settings for timeline reads, backfill and trimming.
#[derive(Debug, Clone)]
pub struct TimelineSettings {
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Upper bound on backfill window expansions.
    pub max_day_range: u32,
    /// Size each cache is trimmed down to.
    pub max_items: usize,
    pub call_timeout: Duration,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            default_page_size: 30,
            max_page_size: 100,
            max_day_range: 3,
            max_items: 50,
            call_timeout: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(300));
    }

    #[test]
    fn test_defaults() {
        let fan_out = FanOutSettings::default();
        assert_eq!(fan_out.celebrity_threshold, 10_000);
        assert_eq!(fan_out.batch_size, 100);
        assert_eq!(fan_out.retry.max_attempts, 3);

        let timeline = TimelineSettings::default();
        assert_eq!(timeline.max_items, 50);
        assert_eq!(timeline.max_day_range, 3);
    }
}
