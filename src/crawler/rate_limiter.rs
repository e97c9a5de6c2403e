//! Token-bucket rate limiting, optionally adaptive
//!
//! The bucket refills at `rate` tokens per second up to `burst`. Each request
//! consumes one token; a caller that finds less than one token sleeps for the
//! time the missing fraction takes to refill and tries again.
//!
//! With adaptive limiting enabled, every response reports its latency and
//! status. Throttling and server errors halve the rate, slow responses trim
//! it, and a streak of fast successes raises it again, always within the
//! configured bounds.

use crate::config::{AdaptiveConfig, CrawlerConfig};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate multiplier applied after a slow response
const SLOW_RESPONSE_FACTOR: f64 = 0.9;

/// Mutable bucket state, guarded by the limiter's lock
#[derive(Debug)]
struct RateLimiterState {
    tokens: f64,
    last_refill: Instant,
    current_rate: f64,
    /// Consecutive fast successful responses since the last adjustment
    fast_streak: u32,
}

impl RateLimiterState {
    fn refill(&mut self, burst: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.current_rate).min(burst);
        self.last_refill = now;
    }
}

/// Shared request throttle for one crawl
#[derive(Debug)]
pub struct RateLimiter {
    burst: f64,
    adaptive: Option<AdaptiveConfig>,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    /// A fixed-rate limiter starting with a full bucket
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            burst,
            adaptive: None,
            state: Mutex::new(RateLimiterState {
                tokens: burst,
                last_refill: Instant::now(),
                current_rate: rate,
                fast_streak: 0,
            }),
        }
    }

    /// A limiter that tunes its rate from observed responses
    pub fn adaptive(rate: f64, burst: u32, adaptive: AdaptiveConfig) -> Self {
        let limiter = Self::new(rate.clamp(adaptive.min_rate, adaptive.max_rate), burst);
        Self {
            adaptive: Some(adaptive),
            ..limiter
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        if config.adaptive.enabled {
            Self::adaptive(
                config.requests_per_second,
                config.burst,
                config.adaptive.clone(),
            )
        } else {
            Self::new(config.requests_per_second, config.burst)
        }
    }

    /// Waits until a token is available and consumes it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                state.refill(self.burst);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }

                Duration::from_secs_f64((1.0 - state.tokens) / state.current_rate)
            };

            tracing::trace!("Rate limited, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Feeds one response into the adaptive controller
    ///
    /// `status` is `None` for transport failures, which count as errors.
    /// Does nothing for a fixed-rate limiter.
    pub async fn record_response(&self, latency: Duration, status: Option<u16>) {
        let Some(adaptive) = &self.adaptive else {
            return;
        };

        let mut state = self.state.lock().await;
        state.refill(self.burst);
        let before = state.current_rate;

        let is_error = match status {
            Some(code) => code == 429 || code >= 500,
            None => true,
        };
        let is_slow = latency >= Duration::from_millis(adaptive.slow_response_ms);

        if is_error {
            state.current_rate *= adaptive.decrease_factor;
            state.fast_streak = 0;
        } else if is_slow {
            state.current_rate *= SLOW_RESPONSE_FACTOR;
            state.fast_streak = 0;
        } else {
            state.fast_streak += 1;
            if state.fast_streak >= adaptive.speedup_after {
                state.current_rate *= adaptive.increase_factor;
                state.fast_streak = 0;
            }
        }

        state.current_rate = state.current_rate.clamp(adaptive.min_rate, adaptive.max_rate);

        if state.current_rate != before {
            tracing::debug!(
                "Adjusted request rate {:.2} -> {:.2} req/s",
                before,
                state.current_rate
            );
        }
    }

    /// Current refill rate in tokens per second
    pub async fn current_rate(&self) -> f64 {
        self.state.lock().await.current_rate
    }
}
