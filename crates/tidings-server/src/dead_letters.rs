use std::sync::Arc;

use tidings_core::{DeadLetterRecord, EventHandler, HandlerError};
use tidings_db::RedbDeadLetterLog;

/// Persists dead-letter records published by fan-out.
pub struct DeadLetterRecorder {
    log: Arc<RedbDeadLetterLog>,
}

impl DeadLetterRecorder {
    pub fn new(log: Arc<RedbDeadLetterLog>) -> Self {
        Self { log }
    }
}

impl EventHandler for DeadLetterRecorder {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let record = match DeadLetterRecord::from_json(payload) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed dead letter");
                return Ok(());
            }
        };

        let log = Arc::clone(&self.log);
        let stored = record.clone();
        let appended = tokio::task::spawn_blocking(move || log.append(&stored))
            .await
            .map_err(HandlerError::new)?;

        match appended {
            Ok(true) => {
                tracing::info!(
                    post_id = %record.post_id,
                    follower = %record.follower_id,
                    "dead letter recorded"
                );
                Ok(())
            }
            Ok(false) => {
                tracing::debug!(key = %record.idempotency_key(), "duplicate dead letter");
                Ok(())
            }
            Err(e) => Err(HandlerError::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;
    use tidings_core::{PostCreatedEvent, PostId, UserId};
    use tidings_db::init_database;

    #[tokio::test]
    async fn test_records_each_dead_letter_once() {
        let dir = tempdir().unwrap();
        let db = init_database(dir.path().join("test.redb")).unwrap();
        let log = Arc::new(RedbDeadLetterLog::new(db));
        let recorder = DeadLetterRecorder::new(log.clone());

        let event = PostCreatedEvent::new(UserId::from("author"), PostId(5), Utc::now());
        let record = DeadLetterRecord::new(&event, UserId::from("bob"), "timed out");

        let payload = record.to_json().unwrap();
        recorder.handle(&payload).await.unwrap();
        recorder.handle(&payload).await.unwrap();

        assert_eq!(log.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_acknowledged() {
        let dir = tempdir().unwrap();
        let db = init_database(dir.path().join("test.redb")).unwrap();
        let recorder = DeadLetterRecorder::new(Arc::new(RedbDeadLetterLog::new(db)));

        assert!(recorder.handle(b"[]").await.is_ok());
    }
}
