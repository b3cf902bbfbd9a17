//! Relationship oracle: the external classifier that proposes a relationship
//! for an ordered pair of papers, plus the retry and rate-limit plumbing
//! around it.

mod http;
mod rate_limit;

pub use http::{parse_oracle_response, HttpOracle};
pub use rate_limit::RateLimiter;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::graph::RelationshipCandidate;
use crate::papers::Paper;

/// Errors from a single oracle call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    /// Network failure or a server-side error status.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),

    /// The oracle asked us to slow down (HTTP 429).
    #[error("oracle rate limited: {0}")]
    RateLimited(String),

    /// The oracle answered but the answer could not be understood.
    #[error("malformed oracle response: {0}")]
    MalformedResponse(String),

    /// The request itself was refused (bad credentials, bad request).
    #[error("oracle rejected request: {0}")]
    Rejected(String),
}

impl OracleError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OracleError::Unavailable(_) | OracleError::Timeout(_) | OracleError::RateLimited(_)
        )
    }
}

/// Proposes a relationship between two papers, in the order presented.
///
/// Implementations must be safe to call twice for the same ordered pair.
#[async_trait]
pub trait RelationshipOracle: Send + Sync {
    /// `Ok(None)` means the oracle found no relationship.
    async fn propose(
        &self,
        source: &Paper,
        target: &Paper,
    ) -> std::result::Result<Option<RelationshipCandidate>, OracleError>;
}

/// Bounded exponential backoff for transient oracle failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub initial_backoff: Duration,
    /// Per-attempt deadline.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Run `call` until it succeeds, fails permanently, or retries run out.
    ///
    /// Every attempt first waits on `limiter`, then is bounded by `timeout`.
    /// The delay doubles after every transient failure.
    pub async fn run<T, F, Fut>(
        &self,
        limiter: Option<&RateLimiter>,
        mut call: F,
    ) -> std::result::Result<T, OracleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, OracleError>>,
    {
        let mut attempt = 0;
        let mut delay = self.initial_backoff;

        loop {
            if let Some(limiter) = limiter {
                limiter.acquire().await;
            }
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(OracleError::Timeout(self.timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    log::warn!("Retry {}/{} after error: {}", attempt + 1, self.max_retries, e);
                    tokio::time::sleep(delay).await;
                    delay = next_backoff(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn next_backoff(delay: Duration) -> Duration {
    delay.saturating_mul(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(OracleError::Unavailable("502".into()).is_transient());
        assert!(OracleError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(OracleError::RateLimited("429".into()).is_transient());
        assert!(!OracleError::MalformedResponse("no json".into()).is_transient());
        assert!(!OracleError::Rejected("401".into()).is_transient());
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(next_backoff(Duration::from_millis(250)), Duration::from_millis(500));
        assert_eq!(next_backoff(Duration::MAX), Duration::MAX);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = fast_policy(3)
            .run(None, || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(OracleError::Unavailable("503".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: std::result::Result<(), _> = fast_policy(2)
            .run(None, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OracleError::RateLimited("429".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(OracleError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: std::result::Result<(), _> = fast_policy(5)
            .run(None, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OracleError::MalformedResponse("garbage".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(OracleError::MalformedResponse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let result: std::result::Result<(), _> = fast_policy(0)
            .run(None, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(OracleError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_respect_rate_limit() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = tokio::time::Instant::now();
        let result: std::result::Result<(), _> = fast_policy(1)
            .run(Some(&limiter), || async { Err(OracleError::Unavailable("503".into())) })
            .await;
        assert!(result.is_err());
        // The retry had to wait for the first call to leave the window
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
