//! Time source of the runtime.
//!
//! Everything time dependent reads the monotonic clock and sleeps through Tokio's time driver,
//! so tests running with a paused clock (`#[tokio::test(start_paused = true)]` or
//! [`tokio::time::pause`]) advance it virtually. [`now_utc`] is anchored to the same clock.
use crate::{Context, ErrorKind, Result};
use std::{sync::OnceLock, time::Duration};
use time::OffsetDateTime;
pub use tokio::time::Instant;

static ANCHOR: OnceLock<(std::time::Instant, OffsetDateTime)> = OnceLock::new();

pub fn now() -> Instant {
    Instant::now()
}

/// Wall clock time, advancing together with [`now`].
pub fn now_utc() -> OffsetDateTime {
    let now = Instant::now().into_std();
    let (instant, utc) = *ANCHOR.get_or_init(|| (now, OffsetDateTime::now_utc()));
    utc + now.saturating_duration_since(instant)
}

/// Sleep unless `ctx` gets cancelled first, in which case its error is returned.
pub async fn sleep(ctx: &Context, duration: Duration) -> Result<()> {
    sleep_until(ctx, Instant::now() + duration).await
}

pub async fn sleep_until(ctx: &Context, deadline: Instant) -> Result<()> {
    ctx.check()?;
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => Ok(()),
        _ = ctx.cancelled() => Err(ctx.err().unwrap_or(ErrorKind::Cancelled).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorExt;

    #[tokio::test(start_paused = true)]
    async fn utc_follows_the_paused_clock() {
        let before = now_utc();
        tokio::time::advance(Duration::from_secs(3600)).await;
        let after = now_utc();
        assert!(after - before >= Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_interrupted_by_cancellation() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let started = now();
        let result = sleep(&ctx, Duration::from_secs(60)).await;
        assert!(result.is_kind(ErrorKind::DeadlineExceeded));
        assert!(now() - started < Duration::from_secs(1));
    }
}
