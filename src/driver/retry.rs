//! Transaction Retry
//!
//! 관리형 트랜잭션의 재시도 정책

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::warn;

use super::error::{DriverError, DriverResult};

// ============================================================================
// RetryPolicy - 재시도 정책
// ============================================================================

/// 재시도 정책
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 첫 시도부터 재시도를 포기할 때까지의 최대 시간
    pub max_retry_time: Duration,
    /// 첫 재시도 지연
    pub initial_delay: Duration,
    /// 지연 상한 배수
    pub multiplier: f64,
    /// 지터 비율 (0.2 = ±20%)
    pub jitter_factor: f64,
    /// 최대 시도 횟수 (None = 시간으로만 제한)
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.2,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// 재시도하지 않는 정책
    pub fn none() -> Self {
        Self {
            max_attempts: Some(1),
            ..Self::default()
        }
    }

    /// 재시도 대상 에러인지 판단
    pub fn is_retryable(&self, err: &DriverError) -> bool {
        err.is_retryable()
    }

    /// 지터를 뺀 `attempt` 번째 (1부터) 재시도 지연
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let linear = initial * attempt as f64;
        let cap = initial * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(linear.min(cap).max(0.0))
    }

    /// 지터를 더한 재시도 지연
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let jitter = base * self.jitter_factor;
        if jitter <= 0.0 {
            return Duration::from_secs_f64(base);
        }
        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::from_secs_f64((base + offset).max(0.0))
    }

    /// `attempt` 번째 시도가 `err` 로 실패했을 때 다음 시도까지의 지연.
    /// 재시도하지 않아야 하면 `None`.
    pub fn next_delay(&self, attempt: u32, started: Instant, err: &DriverError) -> Option<Duration> {
        if !self.is_retryable(err) {
            return None;
        }
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }
        let delay = self.delay(attempt);
        if started.elapsed() + delay > self.max_retry_time {
            return None;
        }
        Some(delay)
    }

    /// `work` 를 정책에 따라 실행한다. 인자는 1부터 시작하는 시도 번호.
    pub async fn run<T, F, Fut>(&self, mut work: F) -> DriverResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match work(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let Some(delay) = self.next_delay(attempt, start, &err) else {
                return Err(err);
            };
            warn!(
                "Transaction failed and will be retried in {}ms: {}",
                delay.as_millis(),
                err
            );
            tokio::time::sleep(delay).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::bolt::ServerError;

    fn transient() -> DriverError {
        ServerError::new("Neo.TransientError.Transaction.DeadlockDetected", "deadlock").into()
    }

    #[test]
    fn test_base_delay_grows_linearly_with_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(3));

        let slow = RetryPolicy {
            multiplier: 1.0,
            ..RetryPolicy::default()
        };
        assert_eq!(slow.base_delay(5), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.delay(2).as_secs_f64();
            assert!((1.6..=2.4).contains(&d), "delay {}", d);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let result = policy
            .run(|attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(transient())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let err = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(DriverError::session("misuse")) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Session(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retry_time() {
        let policy = RetryPolicy {
            max_retry_time: Duration::from_secs(5),
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let err = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(transient()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        // delays 1s + 2s fit, the next 3s would pass 5s
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_max_attempts() {
        let policy = RetryPolicy::none();
        let calls = AtomicU32::new(0);
        let _ = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(transient()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
