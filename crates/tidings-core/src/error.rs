use std::time::Duration;

use thiserror::Error;

/// Errors that may be retried or timed out by the engine's call helpers.
///
/// Both the cache and the remote collaborators report through types that
/// implement this, so a single retry loop can filter on error kind.
pub trait TransientError: std::error::Error + Send + Sync + 'static {
    /// Whether a later attempt of the same call may succeed.
    fn is_transient(&self) -> bool;

    /// The error reported when a call exceeds its deadline.
    fn timed_out(limit: Duration) -> Self
    where
        Self: Sized;
}

/// Errors from a timeline cache backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt cache record: {0}")]
    Corrupt(String),
}

impl TransientError for StorageError {
    fn is_transient(&self) -> bool {
        matches!(self, StorageError::Timeout(_) | StorageError::Unavailable(_))
    }

    fn timed_out(limit: Duration) -> Self {
        StorageError::Timeout(limit)
    }
}

/// Errors from remote collaborators: the follow graph, the feed store and
/// the event bus.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl TransientError for ClientError {
    fn is_transient(&self) -> bool {
        matches!(self, ClientError::Timeout(_) | ClientError::Unavailable(_))
    }

    fn timed_out(limit: Duration) -> Self {
        ClientError::Timeout(limit)
    }
}

/// Returned by an event handler to ask the bus for redelivery.
#[derive(Error, Debug)]
#[error("Handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

/// A page cursor that could not be decoded.
#[derive(Error, Debug, PartialEq)]
pub enum CursorError {
    #[error("Cursor is not valid base64")]
    Encoding,

    #[error("Cursor has an unexpected shape: {0}")]
    Shape(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_classification() {
        assert!(StorageError::Timeout(Duration::from_millis(5)).is_transient());
        assert!(StorageError::Unavailable("busy".to_string()).is_transient());
        assert!(!StorageError::Database("disk full".to_string()).is_transient());
        assert!(!StorageError::Corrupt("bad score".to_string()).is_transient());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(ClientError::timed_out(Duration::from_secs(1)).is_transient());
        assert!(ClientError::Unavailable("503".to_string()).is_transient());
        assert!(!ClientError::NotFound("post 7".to_string()).is_transient());
        assert!(!ClientError::Malformed("not json".to_string()).is_transient());
        assert!(!ClientError::Rejected("400".to_string()).is_transient());
    }
}
