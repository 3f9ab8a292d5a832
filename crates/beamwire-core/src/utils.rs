/*!
 * Utility functions and helpers for beamwire.
 *
 * This module provides common async utilities used throughout the
 * beamwire crates, most notably the timeout wrapper applied to device
 * factory builds.
 */
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::{Error, Result};

/// Run a future with a timeout
///
/// # Arguments
///
/// * `duration` - The timeout duration
/// * `future` - The future to run
///
/// # Returns
///
/// The result of the future, or a timeout error if the timeout is reached
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!(
            "Operation timed out after {:?}",
            duration
        ))),
    }
}

/// Convert a Duration to milliseconds
pub fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_secs() * 1000 + u64::from(duration.subsec_millis())
}

/// Convert milliseconds to a Duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, Error>(42)
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_timeout_propagates_inner_error() {
        let result: Result<i32> = with_timeout(Duration::from_secs(1), async {
            Err(Error::device("shutter jammed"))
        })
        .await;
        assert!(matches!(result, Err(Error::Device(_))));
    }

    #[test]
    fn test_duration_conversions() {
        let duration = Duration::from_millis(1234);
        let millis = duration_to_millis(duration);
        assert_eq!(millis, 1234);

        let duration2 = millis_to_duration(millis);
        assert_eq!(duration, duration2);
    }
}
