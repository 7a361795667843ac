//! Two-bucket token gate in front of the LLM provider.
//!
//! One bucket holds `requests_per_minute` tokens over a one-minute window,
//! the other `requests_per_day` tokens over a one-day window. A token is
//! returned to its bucket exactly one window after it was debited, so no
//! rolling window ever sees more acquisitions than the bucket capacity.
//! There are no timers: each call recomputes what has expired.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::context::RunContext;
use crate::error::RateLimitError;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct Bucket {
    capacity: usize,
    window: Duration,
    /// Debit instants inside the current window, oldest first.
    debits: VecDeque<Instant>,
}

impl Bucket {
    fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1) as usize,
            window,
            debits: VecDeque::new(),
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.debits.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.debits.pop_front();
            } else {
                break;
            }
        }
    }

    fn available(&self) -> usize {
        self.capacity - self.debits.len().min(self.capacity)
    }

    /// Time until one token returns; zero when a token is available.
    fn residual(&self, now: Instant) -> Duration {
        if self.available() > 0 {
            return Duration::ZERO;
        }
        self.debits
            .front()
            .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}

/// Per-minute and per-day limiter shared by all LLM calls.
#[derive(Debug)]
pub struct RateLimiter {
    minute: Mutex<Bucket>,
    day: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, requests_per_day: u32) -> Self {
        Self::with_windows(requests_per_minute, MINUTE, requests_per_day, DAY)
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_minute, config.requests_per_day)
    }

    /// Limiter with custom window lengths.
    pub fn with_windows(
        minute_capacity: u32,
        minute_window: Duration,
        day_capacity: u32,
        day_window: Duration,
    ) -> Self {
        Self {
            minute: Mutex::new(Bucket::new(minute_capacity, minute_window)),
            day: Mutex::new(Bucket::new(day_capacity, day_window)),
        }
    }

    /// Take one token from both buckets, or report how long to wait.
    ///
    /// Locks are always taken minute-then-day and released before returning.
    fn try_acquire(&self, now: Instant) -> Result<(), Duration> {
        let mut minute = self.minute.lock().unwrap_or_else(|e| e.into_inner());
        let mut day = self.day.lock().unwrap_or_else(|e| e.into_inner());
        minute.expire(now);
        day.expire(now);
        if minute.available() > 0 && day.available() > 0 {
            minute.debits.push_back(now);
            day.debits.push_back(now);
            return Ok(());
        }
        Err(minute.residual(now).max(day.residual(now)))
    }

    /// Block until a token is available in both buckets.
    ///
    /// Returns early without debiting when the context is cancelled or when
    /// the wait would pass the context deadline.
    pub async fn acquire(&self, ctx: &RunContext) -> Result<(), RateLimitError> {
        loop {
            if ctx.is_done() {
                return Err(RateLimitError::Cancelled);
            }
            let wait = match self.try_acquire(Instant::now()) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            if let Some(remaining) = ctx.remaining() {
                if wait > remaining {
                    return Err(RateLimitError::DeadlineExceeded { wait });
                }
            }
            debug!(wait_ms = wait.as_millis() as u64, "rate limiter waiting");
            tokio::select! {
                _ = ctx.cancelled() => return Err(RateLimitError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Tokens currently available as `(minute, day)`.
    pub fn available(&self) -> (usize, usize) {
        let now = Instant::now();
        let mut minute = self.minute.lock().unwrap_or_else(|e| e.into_inner());
        let mut day = self.day.lock().unwrap_or_else(|e| e.into_inner());
        minute.expire(now);
        day.expire(now);
        (minute.available(), day.available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn minute_bucket_blocks_until_window_passes() {
        let limiter = RateLimiter::new(2, 100);
        let ctx = RunContext::default();
        let start = Instant::now();
        limiter.acquire(&ctx).await.unwrap();
        limiter.acquire(&ctx).await.unwrap();
        assert_eq!(limiter.available(), (0, 98));

        limiter.acquire(&ctx).await.unwrap();
        assert!(start.elapsed() >= MINUTE);
        assert!(start.elapsed() < MINUTE + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_max_of_both_residuals() {
        let limiter = RateLimiter::with_windows(5, MINUTE, 1, Duration::from_secs(600));
        let ctx = RunContext::default();
        let start = Instant::now();
        limiter.acquire(&ctx).await.unwrap();
        limiter.acquire(&ctx).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_does_not_debit() {
        let limiter = Arc::new(RateLimiter::new(1, 10));
        let token = CancellationToken::new();
        let ctx = RunContext::new(token.clone());
        limiter.acquire(&ctx).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { limiter.acquire(&ctx).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
        assert_eq!(waiter.await.unwrap(), Err(RateLimitError::Cancelled));
        assert_eq!(limiter.available(), (0, 9));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_early_when_wait_exceeds_deadline() {
        let limiter = RateLimiter::new(1, 10);
        let ctx = RunContext::with_timeout(CancellationToken::new(), Duration::from_secs(10));
        limiter.acquire(&ctx).await.unwrap();
        let err = limiter.acquire(&ctx).await.unwrap_err();
        assert!(matches!(err, RateLimitError::DeadlineExceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_does_not_debit() {
        let limiter = RateLimiter::new(1, 10);
        let ctx = RunContext::with_timeout(CancellationToken::new(), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(limiter.acquire(&ctx).await, Err(RateLimitError::Cancelled));
        assert_eq!(limiter.available(), (1, 10));
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_minute_never_exceeds_capacity() {
        let limiter = Arc::new(RateLimiter::new(3, 1000));
        let ctx = RunContext::default();
        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(&ctx).await.unwrap();
                Instant::now()
            }));
        }
        let mut stamps = Vec::new();
        for h in handles {
            stamps.push(h.await.unwrap());
        }
        stamps.sort();
        for (i, &t) in stamps.iter().enumerate() {
            let in_window = stamps[i..]
                .iter()
                .take_while(|&&s| s.duration_since(t) < MINUTE)
                .count();
            assert!(in_window <= 3, "{} acquisitions inside one minute", in_window);
        }
    }
}
