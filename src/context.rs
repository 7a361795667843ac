//! Cancellation and deadline context shared by every blocking primitive.
//!
//! A [`RunContext`] pairs a [`CancellationToken`] with an optional outer
//! deadline. The rate limiter, LLM calls, file reads and the map worker
//! pool all race their work against [`RunContext::cancelled`].

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    /// A context that is only cancelled explicitly.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A context that is cancelled explicitly or once `timeout` elapses.
    pub fn with_timeout(token: CancellationToken, timeout: Duration) -> Self {
        Self {
            token,
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// True once the token is cancelled or the deadline has passed.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Cancel the underlying token (and every clone of this context).
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves when the token is cancelled or the deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_resolves_cancelled() {
        let ctx = RunContext::with_timeout(CancellationToken::new(), Duration::from_secs(2));
        assert!(!ctx.is_done());
        ctx.cancelled().await;
        assert!(ctx.is_done());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn explicit_cancel_propagates_to_clones() {
        let ctx = RunContext::default();
        let clone = ctx.clone();
        ctx.cancel();
        clone.cancelled().await;
        assert!(clone.is_done());
        assert_eq!(clone.remaining(), None);
    }
}
