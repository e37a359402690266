use crate::{Context, Error, Result, clock};
use rand::Rng;
use std::{future::Future, time::Duration};
use tokio::time::Instant;

/// Number of consecutive failures so far, zero before the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FailureCount(pub u32);

/// Moment the first attempt started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedAt(pub Instant);

impl StartedAt {
    pub fn now() -> Self {
        Self(clock::now())
    }
}

/// Decide whether another attempt should be made, possibly after waiting.
///
/// Waits return `false` as soon as `ctx` is cancelled.
pub trait RetryPolicy<U>: Send + Sync {
    fn should_try(&self, ctx: &Context, u: U) -> impl Future<Output = bool> + Send;
}

const DEFAULT_ATTEMPTS: u32 = 5;

/// Wait `delay · 2^count` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub delay: Duration,
    /// Give up when the total wait would exceed it.
    pub timeout: Option<Duration>,
    /// Defaults to 5 when `timeout` is not set either.
    pub attempts: Option<u32>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            timeout: None,
            attempts: None,
        }
    }
}

impl ExponentialBackoff {
    fn wait(&self, count: u32) -> Duration {
        self.delay.saturating_mul(2u32.saturating_pow(count))
    }

    fn total_wait(&self, count: u32) -> Duration {
        (1..=count).fold(Duration::ZERO, |total, i| total.saturating_add(self.wait(i)))
    }
}

fn within_attempts(attempts: Option<u32>, timeout: Option<Duration>, count: u32) -> bool {
    match (attempts, timeout) {
        (Some(attempts), _) => count < attempts,
        (None, Some(..)) => true,
        (None, None) => count < DEFAULT_ATTEMPTS,
    }
}

async fn wait(ctx: &Context, duration: Duration) -> bool {
    clock::sleep(ctx, duration).await.is_ok() && ctx.err().is_none()
}

impl RetryPolicy<FailureCount> for ExponentialBackoff {
    async fn should_try(&self, ctx: &Context, FailureCount(count): FailureCount) -> bool {
        if ctx.is_cancelled() {
            return false;
        }
        if count == 0 {
            return true;
        }
        if !within_attempts(self.attempts, self.timeout, count) {
            return false;
        }
        if let Some(timeout) = self.timeout {
            if self.total_wait(count) > timeout {
                return false;
            }
        }
        wait(ctx, self.wait(count)).await
    }
}

/// Constant wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub delay: Duration,
    pub timeout: Option<Duration>,
    pub attempts: Option<u32>,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            timeout: None,
            attempts: None,
        }
    }
}

impl RetryPolicy<FailureCount> for FixedDelay {
    async fn should_try(&self, ctx: &Context, FailureCount(count): FailureCount) -> bool {
        if ctx.is_cancelled() {
            return false;
        }
        if count == 0 {
            return true;
        }
        if !within_attempts(self.attempts, self.timeout, count) {
            return false;
        }
        if let Some(timeout) = self.timeout {
            if self.delay.saturating_mul(count) > timeout {
                return false;
            }
        }
        wait(ctx, self.delay).await
    }
}

/// Random wait in `[0, delay]` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    pub delay: Duration,
    pub attempts: u32,
}

impl Default for Jitter {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

impl RetryPolicy<FailureCount> for Jitter {
    async fn should_try(&self, ctx: &Context, FailureCount(count): FailureCount) -> bool {
        if ctx.is_cancelled() {
            return false;
        }
        if count == 0 {
            return true;
        }
        if count >= self.attempts {
            return false;
        }
        let nanos = self.delay.as_nanos().min(u64::MAX as u128) as u64;
        let duration = Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos));
        wait(ctx, duration).await
    }
}

/// Keep trying until `timeout` elapsed since the start, pausing `wait_duration` in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub timeout: Duration,
    pub wait_duration: Duration,
}

impl Default for Waiter {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            wait_duration: Duration::from_millis(1),
        }
    }
}

impl RetryPolicy<StartedAt> for Waiter {
    async fn should_try(&self, ctx: &Context, StartedAt(started): StartedAt) -> bool {
        let deadline = started + self.timeout;
        if ctx.is_cancelled() || clock::now() >= deadline {
            return false;
        }
        let _ = clock::sleep_until(ctx, deadline.min(clock::now() + self.wait_duration)).await;
        clock::now() < deadline && ctx.err().is_none()
    }
}

/// Run `op` until it succeeds or `policy` gives up. The last error is returned, preceded by the
/// context error when the context got cancelled.
pub async fn retry<T, P, F, Fut>(ctx: &Context, policy: &P, mut op: F) -> Result<T>
where
    P: RetryPolicy<FailureCount>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut count = FailureCount(0);
    let mut last = None;
    while policy.should_try(ctx, count).await {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                log::debug!("Attempt {} failed: {:#}", count.0 + 1, e);
                last = Some(e);
                count.0 += 1;
            }
        }
    }
    let context = ctx.err().map(Error::new);
    crate::merge_errors([context, last])
        .map(Err)
        .unwrap_or_else(|| Err(Error::msg("The retry policy did not allow any attempt")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorExt, ErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn consecutive_trues<P: RetryPolicy<FailureCount>>(policy: &P) -> u32 {
        let ctx = Context::background();
        let mut count = 0;
        while policy.should_try(&ctx, FailureCount(count)).await {
            count += 1;
            assert!(count < 1000, "The policy never gave up");
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_attempts() {
        let policy = ExponentialBackoff {
            attempts: Some(3),
            ..Default::default()
        };
        assert_eq!(consecutive_trues(&policy).await, 3);
        assert_eq!(consecutive_trues(&ExponentialBackoff::default()).await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_first_try_is_immediate() {
        let policy = ExponentialBackoff::default();
        let started = clock::now();
        assert!(policy.should_try(&Context::background(), FailureCount(0)).await);
        assert_eq!(clock::now(), started);
        assert!(policy.should_try(&Context::background(), FailureCount(2)).await);
        assert_eq!(clock::now() - started, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_timeout() {
        // Waits are 1s, 2s, 4s: the third one would exceed the timeout.
        let policy = ExponentialBackoff {
            delay: Duration::from_millis(500),
            timeout: Some(Duration::from_secs(5)),
            attempts: None,
        };
        assert_eq!(consecutive_trues(&policy).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_attempts() {
        let started = clock::now();
        assert_eq!(consecutive_trues(&FixedDelay::default()).await, 5);
        assert_eq!(clock::now() - started, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_stays_within_delay() {
        let policy = Jitter {
            delay: Duration::from_millis(100),
            attempts: 4,
        };
        let started = clock::now();
        assert_eq!(consecutive_trues(&policy).await, 4);
        assert!(clock::now() - started <= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_stops_at_timeout() {
        let policy = Waiter {
            timeout: Duration::from_secs(1),
            wait_duration: Duration::from_millis(100),
        };
        let ctx = Context::background();
        let started = StartedAt::now();
        let mut trues = 0;
        while policy.should_try(&ctx, started).await {
            trues += 1;
        }
        assert_eq!(trues, 9);
        assert!(clock::now() >= started.0 + policy.timeout);
        assert!(!policy.should_try(&ctx, started).await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_wait() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let policy = FixedDelay {
            delay: Duration::from_secs(10),
            ..Default::default()
        };
        let started = clock::now();
        assert!(!policy.should_try(&ctx, FailureCount(1)).await);
        assert!(clock::now() - started < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&Context::background(), &FixedDelay::default(), || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(Error::msg("not yet")),
                n => Ok(n),
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_with_the_last_error() {
        let result: Result<()> = retry(&Context::background(), &FixedDelay::default(), || async {
            Err(Error::new(ErrorKind::NotFound))
        })
        .await;
        assert!(result.is_kind(ErrorKind::NotFound));
    }
}
