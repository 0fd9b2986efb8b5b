//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::RelayError;

/// Wrap a future with a timeout, mapping expiry to [`RelayError::Timeout`].
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, RelayError>>,
) -> Result<T, RelayError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::Timeout(duration.as_millis() as u64)),
    }
}
