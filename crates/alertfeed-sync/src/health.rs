//! Bounded retry around one source's processing, and the health metric that
//! records its terminal outcome.

use std::future::Future;
use std::time::{Duration, Instant};

use alertfeed_adapters::{FeedError, ParseError};
use alertfeed_core::HealthMetric;
use alertfeed_storage::{AlertStore, BackoffPolicy, FetchError, RetryDisposition};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, warn};

/// Why one processing attempt failed.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl From<FeedError> for ProcessError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Fetch(err) => Self::Fetch(err),
            FeedError::Parse(err) => Self::Parse(err),
        }
    }
}

impl ProcessError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Fetch(err) => err.http_status(),
            Self::Parse(_) => None,
        }
    }

    /// Malformed bodies are treated as transient; truncated responses are
    /// the usual cause.
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Fetch(err) => err.disposition(),
            Self::Parse(_) => RetryDisposition::Retryable,
        }
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProcessError>,
    pub attempts: usize,
    /// Duration of the final attempt.
    pub elapsed: Duration,
}

/// Run `attempt` until it succeeds, fails non-retryably, or the policy's
/// attempt budget is spent.
pub async fn with_retry<T, F, Fut>(source_id: &str, backoff: &BackoffPolicy, mut attempt: F) -> RetryOutcome<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, ProcessError>>,
{
    let max_attempts = backoff.max_attempts.max(1);
    let mut attempt_index = 0usize;
    loop {
        let started = Instant::now();
        let result = attempt(attempt_index).await;
        let elapsed = started.elapsed();
        let attempts = attempt_index + 1;

        let err = match result {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                    elapsed,
                }
            }
            Err(err) => err,
        };

        let retryable = err.disposition() == RetryDisposition::Retryable;
        if !retryable || attempts >= max_attempts {
            return RetryOutcome {
                result: Err(err),
                attempts,
                elapsed,
            };
        }

        let delay = backoff.delay_for_attempt(attempt_index);
        warn!(
            source_id,
            attempt = attempts,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            http_status = err.http_status(),
            error = %err,
            "source attempt failed; retrying"
        );
        tokio::time::sleep(delay).await;
        attempt_index += 1;
    }
}

pub struct HealthMonitor<'a> {
    store: &'a dyn AlertStore,
}

impl<'a> HealthMonitor<'a> {
    pub fn new(store: &'a dyn AlertStore) -> Self {
        Self { store }
    }

    pub fn metric<T>(
        source_id: &str,
        outcome: &RetryOutcome<T>,
        records_processed: usize,
        http_status: Option<u16>,
        recorded_at: DateTime<Utc>,
    ) -> HealthMetric {
        let (success, error_message, http_status_code) = match &outcome.result {
            Ok(_) => (true, None, http_status),
            Err(err) => (false, Some(err.to_string()), err.http_status()),
        };
        HealthMetric {
            source_id: source_id.to_string(),
            response_time_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            success,
            error_message,
            records_processed,
            http_status_code,
            recorded_at,
        }
    }

    /// Exactly one call per terminal outcome. A failed write is logged only.
    pub async fn record(&self, metric: &HealthMetric) {
        if let Err(err) = self.store.record_health_metric(metric).await {
            error!(source_id = %metric.source_id, error = %err, "health metric write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status_error(status: u16) -> ProcessError {
        ProcessError::Fetch(FetchError::HttpStatus {
            status,
            reason: "test".to_string(),
            url: "https://example.org".to_string(),
        })
    }

    fn fast(max_attempts: usize) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn retries_until_budget_spent() {
        let calls = AtomicUsize::new(0);
        let outcome: RetryOutcome<()> = with_retry("s", &fast(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(status_error(503)) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.result.is_err());
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let outcome: RetryOutcome<()> = with_retry("s", &fast(3), |_| async { Err(status_error(404)) }).await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let outcome = with_retry("s", &fast(3), |i| async move {
            if i == 0 {
                Err(status_error(502))
            } else {
                Ok(i)
            }
        })
        .await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result.unwrap(), 1);
    }

    #[tokio::test]
    async fn fail_fast_policy_makes_one_attempt() {
        let outcome: RetryOutcome<()> =
            with_retry("s", &BackoffPolicy::fail_fast(), |_| async { Err(status_error(503)) }).await;
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn failure_metric_carries_status_and_message() {
        let outcome: RetryOutcome<()> = RetryOutcome {
            result: Err(status_error(500)),
            attempts: 3,
            elapsed: Duration::from_millis(42),
        };
        let metric = HealthMonitor::metric("s", &outcome, 0, None, Utc::now());
        assert!(!metric.success);
        assert_eq!(metric.http_status_code, Some(500));
        assert_eq!(metric.response_time_ms, 42);
        assert!(metric.error_message.unwrap().contains("500"));
    }
}
