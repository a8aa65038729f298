//! Wave batching - primary pacing for outbound sends
//!
//! Items are split into waves of `size`. Within a wave at most `concurrency`
//! items are in flight; `delay` is slept between waves, never after the last.

use crate::application::shutdown::ShutdownToken;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::info;

/// Wave pacing configuration
#[derive(Debug, Clone)]
pub struct WaveConfig {
    pub size: usize,
    pub delay: Duration,
    pub concurrency: usize,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            size: 75,
            delay: Duration::from_secs(60),
            concurrency: 10,
        }
    }
}

/// Outcome of a single wave
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaveResult {
    /// 1-based wave number
    pub wave: usize,
    pub size: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Outcome of a whole dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaveReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub waves: usize,
    pub wave_results: Vec<WaveResult>,
    /// Items left undispatched because shutdown was requested
    pub skipped: usize,
}

pub struct WaveDispatcher {
    config: WaveConfig,
    shutdown: Option<ShutdownToken>,
}

impl WaveDispatcher {
    pub fn new(config: WaveConfig) -> Self {
        Self {
            config,
            shutdown: None,
        }
    }

    /// Stop starting new waves (and cut inter-wave delays short) on shutdown
    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &WaveConfig {
        &self.config
    }

    fn stopping(&self) -> bool {
        self.shutdown.as_ref().is_some_and(ShutdownToken::is_shutdown)
    }

    /// Run `f` over every item in paced waves; `f` resolves to true on success
    pub async fn dispatch<T, F, Fut>(&self, items: Vec<T>, f: F) -> WaveReport
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = bool>,
    {
        let size = self.config.size.max(1);
        let concurrency = self.config.concurrency.max(1);
        let mut report = WaveReport {
            total: items.len(),
            ..WaveReport::default()
        };
        let wave_count = items.len().div_ceil(size);

        let mut remaining = items.into_iter().peekable();
        while remaining.peek().is_some() {
            if self.stopping() {
                report.skipped = remaining.count();
                info!(skipped = report.skipped, "Shutdown requested, stopping waves");
                break;
            }

            let wave: Vec<T> = remaining.by_ref().take(size).collect();
            let number = report.waves + 1;
            info!(
                wave = number,
                of = wave_count,
                size = wave.len(),
                "Dispatching wave"
            );

            let outcomes: Vec<bool> = stream::iter(wave)
                .map(&f)
                .buffer_unordered(concurrency)
                .collect()
                .await;

            let sent = outcomes.iter().filter(|ok| **ok).count();
            let result = WaveResult {
                wave: number,
                size: outcomes.len(),
                sent,
                failed: outcomes.len() - sent,
            };
            info!(
                wave = number,
                sent = result.sent,
                failed = result.failed,
                "Wave finished"
            );
            report.sent += result.sent;
            report.failed += result.failed;
            report.waves = number;
            report.wave_results.push(result);

            if remaining.peek().is_some() {
                self.pause_between_waves().await;
            }
        }

        report
    }

    async fn pause_between_waves(&self) {
        let delay = tokio::time::sleep(self.config.delay);
        match &self.shutdown {
            Some(token) => {
                let mut token = token.clone();
                tokio::select! {
                    _ = delay => {}
                    _ = token.wait() => {}
                }
            }
            None => delay.await,
        }
    }
}
