use crate::{Context, Result, clock};
use std::{collections::VecDeque, future::Future, sync::Mutex, time::Duration};
use tokio::time::Instant;

/// Block the caller until it is allowed to proceed.
pub trait RateLimitPolicy: Send + Sync {
    fn rate_limit(&self, ctx: &Context) -> impl Future<Output = Result<()>> + Send;
}

/// At most `n` admissions every `per`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub n: usize,
    pub per: Duration,
}

impl Default for Rate {
    fn default() -> Self {
        Self {
            n: 10,
            per: Duration::from_secs(1),
        }
    }
}

/// Remembers the last admissions and makes a caller wait until the oldest one leaves the window.
#[derive(Debug, Default)]
pub struct SlidingWindow {
    rate: Rate,
    admissions: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    /// Zero fields fall back to the defaults of [`Rate`].
    pub fn new(rate: Rate) -> Self {
        let default = Rate::default();
        Self {
            rate: Rate {
                n: if rate.n == 0 { default.n } else { rate.n },
                per: if rate.per.is_zero() {
                    default.per
                } else {
                    rate.per
                },
            },
            admissions: Default::default(),
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    /// Admit now or tell when the oldest admission expires.
    fn try_admit(&self) -> std::result::Result<(), Instant> {
        let now = clock::now();
        let mut admissions = self
            .admissions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while admissions
            .front()
            .is_some_and(|oldest| *oldest + self.rate.per <= now)
        {
            admissions.pop_front();
        }
        match admissions.front() {
            Some(oldest) if admissions.len() >= self.rate.n => Err(*oldest + self.rate.per),
            _ => {
                admissions.push_back(now);
                Ok(())
            }
        }
    }
}

impl RateLimitPolicy for SlidingWindow {
    async fn rate_limit(&self, ctx: &Context) -> Result<()> {
        loop {
            ctx.check()?;
            match self.try_admit() {
                Ok(()) => return Ok(()),
                Err(until) => clock::sleep_until(ctx, until).await?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorExt, ErrorKind};
    use std::sync::Arc;

    #[test]
    fn zero_rate_uses_defaults() {
        let window = SlidingWindow::new(Rate {
            n: 0,
            per: Duration::ZERO,
        });
        assert_eq!(window.rate(), Rate::default());
    }

    #[tokio::test(start_paused = true)]
    async fn admissions_never_exceed_the_rate() {
        let window = Arc::new(SlidingWindow::new(Rate {
            n: 3,
            per: Duration::from_secs(1),
        }));
        let started = clock::now();
        let tasks = (0..10)
            .map(|_| {
                let window = window.clone();
                tokio::spawn(async move {
                    window.rate_limit(&Context::background()).await.unwrap();
                    clock::now()
                })
            })
            .collect::<Vec<_>>();
        let mut admitted = Vec::new();
        for task in tasks {
            admitted.push(task.await.unwrap());
        }
        admitted.sort();
        for (i, at) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|other| **other < *at + Duration::from_secs(1))
                .count();
            assert!(in_window <= 3, "{in_window} admissions within one window");
        }
        assert_eq!(admitted[9] - started, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_caller_is_released_by_cancellation() {
        let window = SlidingWindow::new(Rate {
            n: 1,
            per: Duration::from_secs(60),
        });
        window.rate_limit(&Context::background()).await.unwrap();
        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        let result = window.rate_limit(&ctx).await;
        assert!(result.is_kind(ErrorKind::DeadlineExceeded));
    }
}
