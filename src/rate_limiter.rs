//! Request pacing for one search.
//!
//! Each orchestrator owns its own limiter, so two concurrent searches never
//! share pacing state.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum, jittered spacing between outbound listing requests.
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    jitter: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    /// `delay` is the guaranteed minimum spacing; up to `jitter` is added on
    /// top at random to avoid a fixed request interval.
    pub fn new(delay: Duration, jitter: Duration) -> Self {
        Self {
            delay,
            jitter,
            last: None,
        }
    }

    /// Wait until at least `delay` (plus jitter) has passed since the
    /// previous call returned. The first call returns immediately.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let target = self.delay + self.random_jitter();
            let elapsed = last.elapsed();
            if elapsed < target {
                let remaining = target - elapsed;
                debug!(wait_ms = remaining.as_millis() as u64, "Pacing next request");
                tokio::time::sleep(remaining).await;
            }
        }
        self.last = Some(Instant::now());
    }

    fn random_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_wait_is_immediate() {
        let mut limiter = RateLimiter::new(Duration::from_secs(5), Duration::ZERO);
        let start = Instant::now();
        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_never_shorter_than_delay() {
        let delay = Duration::from_millis(1500);
        let mut limiter = RateLimiter::new(delay, Duration::from_millis(400));

        limiter.wait().await;
        for _ in 0..5 {
            let previous = Instant::now();
            limiter.wait().await;
            let spacing = previous.elapsed();
            assert!(spacing >= delay, "spacing {:?} shorter than {:?}", spacing, delay);
            assert!(spacing <= delay + Duration::from_millis(400));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_spent_elsewhere_counts() {
        let mut limiter = RateLimiter::new(Duration::from_secs(2), Duration::ZERO);
        limiter.wait().await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        let before = Instant::now();
        limiter.wait().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
