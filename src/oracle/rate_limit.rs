use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window limiter shared by all workers of a run.
///
/// At most `max_calls` calls start within any `window`. Callers that would
/// exceed the budget sleep until the oldest call leaves the window.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// `max_calls_per_minute = 0` disables limiting.
    pub fn per_minute(max_calls_per_minute: usize) -> Self {
        Self::new(max_calls_per_minute, Duration::from_secs(60))
    }

    /// Wait until a call may start, then record it.
    pub async fn acquire(&self) {
        if self.max_calls == 0 {
            return;
        }

        // The lock is held while sleeping so waiters are served in order.
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        while calls.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            calls.pop_front();
        }

        if calls.len() >= self.max_calls {
            if let Some(oldest) = calls.front().copied() {
                let wait = self.window.saturating_sub(now.duration_since(oldest));
                log::info!("Rate limit reached, waiting {:.1}s", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
                calls.pop_front();
            }
        }

        calls.push_back(Instant::now());
    }
}
