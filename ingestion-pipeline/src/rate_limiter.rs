use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::domain::TokenWindow;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

/// Token-aware sliding-window rate limiter guaranteeing that no 60-second
/// window exceeds `input_tokens_per_min * safety_buffer_pct` input tokens
/// sent to the external LLM.
pub struct RateLimiter {
    window: Mutex<TokenWindow>,
    effective_limit: u64,
    total_tokens_used: AtomicU64,
    ingestion_count: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct RateLimiterStats {
    pub ingestion_count: u64,
    pub total_tokens_used: u64,
    pub current_window_tokens: u64,
    pub effective_limit: u64,
    pub utilization_pct: f64,
}

impl RateLimiter {
    pub fn new(tokens_per_min: u64, safety_buffer_pct: f64) -> Self {
        let effective_limit = ((tokens_per_min as f64) * safety_buffer_pct).floor() as u64;
        Self {
            window: Mutex::new(TokenWindow::new()),
            effective_limit: effective_limit.max(1),
            total_tokens_used: AtomicU64::new(0),
            ingestion_count: AtomicU64::new(0),
        }
    }

    /// Blocks until sending `estimated_tokens` would not push the trailing
    /// 60s window over the effective limit. Re-evaluates after every sleep
    /// so late arrivals cannot starve earlier callers indefinitely.
    pub async fn wait_for_budget(&self, estimated_tokens: u64) {
        loop {
            let (current, earliest) = {
                let mut window = self.window.lock().await;
                window.prune();
                (window.tokens_in_window(), window.earliest())
            };

            if current + estimated_tokens <= self.effective_limit {
                return;
            }

            let Some(earliest) = earliest else {
                return;
            };

            let window_secs = Duration::from_secs(60);
            let elapsed = earliest.elapsed();
            let remaining = window_secs.saturating_sub(elapsed);
            let sleep_for = remaining + Duration::from_secs(1);

            debug!(
                current_tokens = current,
                estimated_tokens,
                effective_limit = self.effective_limit,
                sleep_ms = sleep_for.as_millis() as u64,
                "rate limiter blocking for budget"
            );
            sleep(sleep_for).await;
        }
    }

    pub async fn record(&self, input_tokens: u64) {
        let mut window = self.window.lock().await;
        window.record(input_tokens);
        self.total_tokens_used
            .fetch_add(input_tokens, Ordering::Relaxed);
        self.ingestion_count.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let current_window_tokens = {
            let mut window = self.window.lock().await;
            window.tokens_in_window()
        };
        let utilization_pct = if self.effective_limit == 0 {
            0.0
        } else {
            (current_window_tokens as f64 / self.effective_limit as f64) * 100.0
        };

        RateLimiterStats {
            ingestion_count: self.ingestion_count.load(Ordering::Relaxed),
            total_tokens_used: self.total_tokens_used.load(Ordering::Relaxed),
            current_window_tokens,
            effective_limit: self.effective_limit,
            utilization_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn budget_within_limit_does_not_block() {
        let limiter = RateLimiter::new(1_000_000, 0.8);
        let start = std::time::Instant::now();
        limiter.wait_for_budget(1_000).await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn record_increments_usage_and_count() {
        let limiter = RateLimiter::new(1_000_000, 0.8);
        limiter.record(500).await;
        limiter.record(250).await;
        let stats = limiter.stats().await;
        assert_eq!(stats.ingestion_count, 2);
        assert_eq!(stats.total_tokens_used, 750);
        assert_eq!(stats.current_window_tokens, 750);
    }

    #[tokio::test]
    async fn effective_limit_applies_safety_buffer() {
        let limiter = RateLimiter::new(1_000, 0.5);
        assert_eq!(limiter.effective_limit, 500);
    }
}
