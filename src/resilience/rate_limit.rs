//! Rolling-window rate limiting per external dependency.
//!
//! Each [`RateLimiter`] admits at most `max_per_window` acquisitions in any
//! rolling window (one second by default). Waiters queue on a fair tokio
//! mutex, so slots are granted strictly in request order and no caller can
//! be starved by later arrivals.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limiter for a single named dependency.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    max_per_window: u32,
    window: Duration,
    /// Grant times inside the current window, oldest first.
    granted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// At most `per_second` acquisitions in any rolling second.
    pub fn per_second(name: impl Into<String>, per_second: u32) -> Self {
        Self::new(name, per_second, Duration::from_secs(1))
    }

    pub fn new(name: impl Into<String>, max_per_window: u32, window: Duration) -> Self {
        let max_per_window = max_per_window.max(1);
        Self {
            name: name.into(),
            max_per_window,
            window,
            granted: Mutex::new(VecDeque::with_capacity(max_per_window as usize)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_per_window(&self) -> u32 {
        self.max_per_window
    }

    /// Wait until a slot is free, then take it.
    ///
    /// The queue lock is held while sleeping so that the next caller in line
    /// is served first once the window moves.
    pub async fn acquire(&self) {
        let mut granted = self.granted.lock().await;
        loop {
            let now = Instant::now();
            while granted
                .front()
                .is_some_and(|t| now.duration_since(*t) >= self.window)
            {
                granted.pop_front();
            }

            if granted.len() < self.max_per_window as usize {
                granted.push_back(now);
                return;
            }

            let Some(oldest) = granted.front().copied() else {
                continue;
            };
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            tracing::trace!(limiter = %self.name, wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

/// One limiter per external dependency; they never share budget.
#[derive(Debug)]
pub struct RateLimiters {
    pub scraper: RateLimiter,
    pub paraphrase: RateLimiter,
    pub image: RateLimiter,
    pub audio: RateLimiter,
    pub video: RateLimiter,
    pub publish: RateLimiter,
}
