/*!
 * Utility functions and helpers for AdapterFlow.
 */
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::timeout;
use tracing::warn;

use crate::error::{Error, Result};

/// Run a future with a timeout
///
/// The device core never bounds its own waits; callers sitting in front of it
/// (transport handlers, discovery drivers) use this to cap how long they wait
/// on a cached operation or a discovery run.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Operation timed out after {:?}", duration);
            Err(Error::timeout(format!("Operation timed out after {:?}", duration)))
        }
    }
}

/// Convert a Duration to milliseconds
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Convert milliseconds to a Duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Box a future so it can be stored behind a uniform type
pub fn box_future<'a, F, T>(future: F) -> BoxFuture<'a, T>
where
    F: Future<Output = T> + Send + 'a,
{
    Box::pin(future)
}
