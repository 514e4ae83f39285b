//! Per-caller request throttle.
//!
//! Sliding one-minute window: each caller may start a limited number of
//! suggestion streams per 60 seconds. Rejections carry the number of
//! seconds until the oldest request in the window ages out.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    max_per_window: u32,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// `max_per_window == 0` disables throttling.
    pub fn new(max_per_window: u32) -> Self {
        Self {
            max_per_window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `key`, or return how long to wait.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        if self.max_per_window == 0 {
            return Ok(());
        }

        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        // Idle callers leave empty queues behind; drop them as we go.
        hits.retain(|_, q| q.back().is_some_and(|t| now.duration_since(*t) < WINDOW));

        let window = hits.entry(key.to_string()).or_default();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= WINDOW)
        {
            window.pop_front();
        }

        if window.len() >= self.max_per_window as usize {
            let oldest = window.front().copied().unwrap_or(now);
            return Err(WINDOW.saturating_sub(now.duration_since(oldest)));
        }

        window.push_back(now);
        Ok(())
    }
}
