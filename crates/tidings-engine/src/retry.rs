use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use tidings_core::{RetryPolicy, TransientError};

/// Run a call under a deadline. Exceeding it yields the error type's
/// timeout variant, which counts as transient.
pub async fn with_timeout<T, E, F>(limit: Duration, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: TransientError,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(E::timed_out(limit)),
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy's attempts
/// are used up. Only transient errors are retried.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: TransientError,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff_for(attempt);
                tracing::debug!(attempt, error = %e, ?delay, "transient failure, retrying");
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
