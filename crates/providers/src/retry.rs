//! Transient-error retry with backoff for non-streaming calls (judge, meta
//! prompts). Streaming calls are not retried mid-stream — only the initial
//! connection is.

use std::future::Future;
use std::time::Duration;

use bg_domain::error::{Error, Result};

/// Retries `attempt` with the given backoff schedule (seconds) whenever it
/// returns a `Provider` error — other error kinds are never retried. Returns
/// the last error, reclassified as `provider_error`, once the schedule is
/// exhausted.
pub async fn with_backoff<F, Fut, T>(backoff_secs: &[u64], mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for delay in std::iter::once(0).chain(backoff_secs.iter().copied()) {
        if delay > 0 {
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(Error::Provider { provider, message }) => {
                last_err = Some(Error::Provider { provider, message });
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err.unwrap_or(Error::Internal("retry loop produced no error".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_works() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_backoff(&[2, 4, 8], || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_provider_errors_until_schedule_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_backoff(&[0, 0], || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Provider { provider: "p".into(), message: "boom".into() })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_provider_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_backoff(&[0, 0], || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Validation("bad input".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
