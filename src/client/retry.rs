//! Retry policies for client-side operations.
//!
//! Transient failures (`TIMEOUT`, `UNAVAILABLE`) are retried with
//! exponential backoff and jitter before being surfaced; configuration
//! and routing errors are never retried.
//!
//! # Example
//!
//! ```rust,no_run
//! use quorate::client::retry;
//! use backon::Retryable;
//!
//! async fn example() -> Result<(), quorate::error::Error> {
//!     let result = (|| async {
//!         // your fallible submission
//!         Ok::<_, quorate::error::Error>(())
//!     })
//!     .retry(retry::submission_policy())
//!     .when(|e| e.is_retriable())
//!     .await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use backon::ExponentialBuilder;

/// Policy for replicated operation submissions.
///
/// - Moderate initial delay (50ms) to ride out a leader change
/// - Long max delay (5s) for election scenarios
/// - Many retries (10) for transient failures
/// - Jitter to prevent thundering herd
pub fn submission_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(10)
        .with_jitter()
}

/// Policy for connecting through the seed list.
///
/// - Short initial delay (100ms) for network settling
/// - Long max delay (10s) for slow cluster start
/// - Moderate retries (5) balancing availability and fail-fast
pub fn connect_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(5)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use backon::Retryable;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let attempts = AtomicU32::new(0);

        let result = (|| async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 {
                Err(Error::Unavailable)
            } else {
                Ok(42)
            }
        })
        .retry(submission_policy())
        .when(Error::is_retriable)
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_fatal_errors() {
        let attempts = AtomicU32::new(0);

        let result: Result<i32, Error> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::SessionExpired)
        })
        .retry(submission_policy())
        .when(Error::is_retriable)
        .await;

        assert_eq!(result.unwrap_err(), Error::SessionExpired);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_policy_exhausts() {
        let attempts = AtomicU32::new(0);

        let result: Result<i32, Error> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Unavailable)
        })
        .retry(connect_policy())
        .when(Error::is_retriable)
        .await;

        assert!(result.is_err());
        // Initial attempt plus 5 retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }
}
