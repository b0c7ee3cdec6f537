//! Adaptive rate limiter shared by every worker of a session
//!
//! The delay grows when the server throttles us (HTTP 429) and decays
//! slowly while requests keep succeeding. State lives behind a
//! `std::sync::Mutex` that is never held across an `.await`; the sleep in
//! [`RateLimiter::wait`] happens after the lock is released so concurrent
//! workers do not serialize on each other's sleeps.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tuning knobs for [`RateLimiter`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Floor the delay decays toward
    pub base_delay: Duration,
    /// Ceiling for the doubling path (no server hint)
    pub max_delay: Duration,
    /// Consecutive successes before one decay step
    pub success_threshold: u32,
    /// Multiplier applied on each decay step, in (0, 1)
    pub decay_factor: f64,
    /// Added on top of a server-supplied `Retry-After`
    pub retry_after_margin: Duration,
    /// Hard cap on any delay, including server hints
    pub absolute_max_delay: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            success_threshold: 10,
            decay_factor: 0.9,
            retry_after_margin: Duration::from_secs(1),
            absolute_max_delay: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    current_delay: Duration,
    consecutive_successes: u32,
    last_throttled_at: Option<Instant>,
    throttle_count: u64,
}

/// Point-in-time view for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterSnapshot {
    pub current_delay: Duration,
    pub consecutive_successes: u32,
    pub throttle_count: u64,
    pub since_last_throttle: Option<Duration>,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let state = LimiterState {
            current_delay: config.base_delay,
            consecutive_successes: 0,
            last_throttled_at: None,
            throttle_count: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Sleep for a jittered duration in [0.8, 1.2] × current delay.
    pub async fn wait(&self) {
        let delay = jittered(self.current_delay());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Record a non-throttled response.
    pub fn report_success(&self) {
        let mut state = self.lock();
        state.consecutive_successes += 1;
        if state.consecutive_successes >= self.config.success_threshold {
            state.consecutive_successes = 0;
            if state.current_delay > self.config.base_delay {
                let decayed = state.current_delay.mul_f64(self.config.decay_factor);
                state.current_delay = decayed.max(self.config.base_delay);
                debug!("Rate limiter delay decayed to {:?}", state.current_delay);
            }
        }
    }

    /// Record an HTTP 429.
    ///
    /// With a server hint the delay becomes `hint + margin`; without one it
    /// doubles up to `max_delay`. Both paths respect `absolute_max_delay`.
    pub fn report_429(&self, retry_after: Option<Duration>) {
        let mut state = self.lock();
        state.last_throttled_at = Some(Instant::now());
        state.throttle_count += 1;
        state.consecutive_successes = 0;

        let next = match retry_after {
            Some(hint) => hint + self.config.retry_after_margin,
            None => (state.current_delay * 2).min(self.config.max_delay),
        };
        state.current_delay = next
            .max(self.config.base_delay)
            .min(self.config.absolute_max_delay + self.config.retry_after_margin);

        warn!(
            "🐢 Throttled by server (hint: {:?}); limiter delay now {:?}",
            retry_after, state.current_delay
        );
    }

    pub fn current_delay(&self) -> Duration {
        self.lock().current_delay
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let state = self.lock();
        RateLimiterSnapshot {
            current_delay: state.current_delay,
            consecutive_successes: state.consecutive_successes,
            throttle_count: state.throttle_count,
            since_last_throttle: state.last_throttled_at.map(|at| at.elapsed()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LimiterState> {
        // A panic while holding the lock cannot leave the numeric state invalid.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn jittered(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor = 0.8 + fastrand::f64() * 0.4;
    delay.mul_f64(factor)
}
