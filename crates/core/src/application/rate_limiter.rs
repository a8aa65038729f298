//! Rate Limiter (Fixed Window Algorithm)
//!
//! Keeps a `count` and `window_start` per key (sender identity, IP, API).
//! A window resets once `now - window_start >= window`.
//!
//! Known weakness: a caller can get up to 2x `limit` requests through around
//! a window boundary. Wave batching is the primary pacing mechanism; this
//! limiter only guards against runaway bursts.

use crate::port::TimeProvider;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // Gmail quota: 100 requests per 100 seconds
        Self {
            limit: 100,
            window: Duration::from_secs(100),
        }
    }
}

/// Per-key window state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: i64, // epoch ms
}

/// Result of `is_allowed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// When the current window ends (epoch ms)
    pub reset_at: i64,
    /// Time until the window resets (only when denied)
    pub wait_time: Option<Duration>,
}

impl RateDecision {
    /// Wait time in whole seconds, rounded up
    pub fn wait_secs(&self) -> Option<u64> {
        self.wait_time
            .map(|d| (d.as_millis() as u64).div_ceil(1000))
    }
}

/// Non-consuming view of a key's window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateStatus {
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Option<i64>,
}

/// Fixed-window limiter; the map lock makes each check-and-increment atomic
pub struct RateLimiter {
    windows: Mutex<HashMap<String, RateWindow>>,
    config: RateLimitConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
            time_provider,
        }
    }

    /// Check and consume one request for `key` using the configured quota
    pub fn is_allowed(&self, key: &str) -> RateDecision {
        self.is_allowed_with(key, self.config.limit, self.config.window)
    }

    /// Check and consume one request with a per-call limit and window
    pub fn is_allowed_with(&self, key: &str, limit: u32, window: Duration) -> RateDecision {
        let now = self.time_provider.now_millis();
        let window_ms = window.as_millis() as i64;
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let entry = windows.entry(key.to_string()).or_insert(RateWindow {
            count: 0,
            window_start: now,
        });

        if now - entry.window_start >= window_ms {
            entry.count = 0;
            entry.window_start = now;
        }

        let reset_at = entry.window_start + window_ms;

        if entry.count >= limit {
            let wait_ms = (window_ms - (now - entry.window_start)).max(0);
            warn!(
                key = %key,
                limit = limit,
                wait_ms = wait_ms,
                "Rate limit reached"
            );
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_at,
                wait_time: Some(Duration::from_millis(wait_ms as u64)),
            };
        }

        entry.count += 1;
        RateDecision {
            allowed: true,
            remaining: limit - entry.count,
            reset_at,
            wait_time: None,
        }
    }

    /// Forget a key's window (full quota again)
    pub fn reset(&self, key: &str) {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Current usage for `key` without consuming quota
    pub fn status(&self, key: &str) -> RateStatus {
        let now = self.time_provider.now_millis();
        let window_ms = self.config.window.as_millis() as i64;
        let limit = self.config.limit;
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        match windows.get(key) {
            Some(w) if now - w.window_start < window_ms => RateStatus {
                count: w.count,
                limit,
                remaining: limit.saturating_sub(w.count),
                reset_at: Some(w.window_start + window_ms),
            },
            _ => RateStatus {
                count: 0,
                limit,
                remaining: limit,
                reset_at: None,
            },
        }
    }
}
