//! A reusable retry executor with a pluggable retryability classifier and a
//! fixed backoff schedule.
//!
//! The operation runs once up front; a non-retryable error returns
//! immediately, otherwise each backoff duration is slept through before the
//! next attempt. Every wait is an await point, so dropping the returned
//! future cancels the executor mid-backoff.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error> {
    #[error(transparent)]
    Fatal(E),

    #[error("operation failed after retries: {0}")]
    Exhausted(E),
}

impl<E: std::error::Error> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(e) | RetryError::Exhausted(e) => e,
        }
    }
}

pub struct Retrier<E> {
    backoff: Vec<Duration>,
    is_retryable: Box<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E: std::error::Error> Retrier<E> {
    pub fn new(is_retryable: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
            is_retryable: Box::new(is_retryable),
        }
    }

    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !(self.is_retryable)(&e) => return Err(RetryError::Fatal(e)),
            Err(e) => e,
        };

        for wait in &self.backoff {
            tracing::warn!(error = %last, wait = ?wait, "operation error, retrying");
            tokio::time::sleep(*wait).await;

            last = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !(self.is_retryable)(&e) => return Err(RetryError::Fatal(e)),
                Err(e) => e,
            };
        }

        Err(RetryError::Exhausted(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("boom (retryable: {retryable})")]
    struct TestError {
        retryable: bool,
    }

    fn short_backoff() -> Vec<Duration> {
        vec![Duration::from_millis(1), Duration::from_millis(1)]
    }

    #[tokio::test]
    async fn returns_on_first_success_without_sleeping() {
        let retrier = Retrier::new(|e: &TestError| e.retryable);
        let attempts = AtomicU32::new(0);

        let result = retrier
            .run(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let retrier = Retrier::new(|e: &TestError| e.retryable).with_backoff(short_backoff());
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = retrier
            .run(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TestError { retryable: false })
            })
            .await;

        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let retrier = Retrier::new(|e: &TestError| e.retryable).with_backoff(short_backoff());
        let attempts = AtomicU32::new(0);

        let result = retrier
            .run(|| async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError { retryable: true })
                } else {
                    Ok("ok")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_backoff_wraps_last_error() {
        let retrier = Retrier::new(|e: &TestError| e.retryable).with_backoff(short_backoff());
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = retrier
            .run(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TestError { retryable: true })
            })
            .await;

        // initial attempt plus one per backoff entry
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted(_)));
        assert!(err.to_string().contains("operation failed after retries"));
    }
}
