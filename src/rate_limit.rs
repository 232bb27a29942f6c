//! Token-bucket rate limiting for external providers.
//!
//! One [`TokenBucket`] is created per provider and shared (via `Arc`) by every
//! stage that calls it, so pacing is independent of call ordering.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RequestConfig;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by all callers of one provider.
#[derive(Debug)]
pub struct TokenBucket {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket. A non-positive rate disables limiting.
    pub fn new(name: impl Into<String>, capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            name: name.into(),
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A bucket that never waits.
    pub fn unlimited(name: impl Into<String>) -> Self {
        Self::new(name, 1, 0.0)
    }

    /// Provider name this bucket guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        if self.refill_per_sec <= 0.0 {
            return;
        }

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }

                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };

            debug!(
                provider = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting for token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (after refill).
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

/// Exponential backoff with random jitter for retry number `retry` (1-based).
pub fn backoff_delay(request: &RequestConfig, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(16);
    let base = request.retry_delay_ms.saturating_mul(2_u64.pow(exponent));
    let jitter = if request.retry_jitter_ms > 0 {
        rand::rng().random_range(0..=request.retry_jitter_ms)
    } else {
        0
    };
    Duration::from_millis(base.saturating_add(jitter))
}
