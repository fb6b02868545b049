//! Duration measurement and bounded retry around async operations.

use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

/// Successful result of [`with_duration`].
#[derive(Debug, Clone, PartialEq)]
pub struct Timed<T> {
    pub result: T,
    pub duration_ms: u64,
}

/// Successful result of [`with_retry`]. `retries` counts the failed attempts before success.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub result: T,
    pub retries: u32,
}

/// Run `op` and measure how long it took.
///
/// On failure the original error is kept as the cause and the elapsed time is
/// added as context.
pub async fn with_duration<F, Fut, T>(op: F) -> Result<Timed<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    match op().await {
        Ok(result) => Ok(Timed {
            result,
            duration_ms: started.elapsed().as_millis() as u64,
        }),
        Err(err) => {
            let elapsed = started.elapsed().as_millis();
            Err(err.context(format!("failed after {} ms", elapsed)))
        }
    }
}

/// Run `op`, retrying up to `max_retries` more times with `wait` between attempts.
///
/// `max_retries = 0` means a single attempt. When every attempt fails the last
/// error is returned with the number of attempts added as context.
pub async fn with_retry<F, Fut, T>(mut op: F, max_retries: u32, wait: Duration) -> Result<Retried<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures: u32 = 0;
    loop {
        match op().await {
            Ok(result) => {
                return Ok(Retried {
                    result,
                    retries: failures,
                })
            }
            Err(err) => {
                failures += 1;
                if failures > max_retries {
                    return Err(err.context(format!("gave up after {} attempts", failures)));
                }
                warn!(
                    "Attempt {}/{} failed: {:#}. Retrying in {:?}",
                    failures,
                    max_retries + 1,
                    err,
                    wait
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Retry settings applied to datastore writes made on behalf of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self { max_retries, wait }
    }

    /// A policy making exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            wait: Duration::ZERO,
        }
    }

    pub async fn run<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_retry(op, self.max_retries, self.wait)
            .await
            .map(|retried| retried.result)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            wait: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_duration_returns_result() {
        let timed = with_duration(|| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, anyhow::Error>(42)
        })
        .await
        .unwrap();
        assert_eq!(timed.result, 42);
        assert!(timed.duration_ms >= 20);
    }

    #[tokio::test]
    async fn test_with_duration_keeps_original_error() {
        let err = with_duration(|| async { Err::<(), _>(anyhow!("remote query failed")) })
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("failed after"));
        assert_eq!(err.root_cause().to_string(), "remote query failed");
        assert!(format!("{:#}", err).contains("remote query failed"));
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_two_failures() {
        let calls = AtomicU32::new(0);
        let retried = with_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(anyhow!("transient {}", n))
                } else {
                    Ok("done")
                }
            },
            3,
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert_eq!(retried.result, "done");
        assert_eq!(retried.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_all_attempts() {
        let calls = AtomicU32::new(0);
        let err = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow!("still down"))
            },
            3,
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(err.to_string().contains("4 attempts"));
        assert_eq!(err.root_cause().to_string(), "still down");
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow!("nope"))
            },
            0,
            Duration::from_millis(10),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_run_unwraps_result() {
        let value = RetryPolicy::new(1, Duration::from_millis(1))
            .run(|| async { Ok::<_, anyhow::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
