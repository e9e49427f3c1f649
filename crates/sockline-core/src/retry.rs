//! Reconnect backoff calculation.
//!
//! - [`calculate_backoff_delay_with_random`]: capped exponential delay with
//!   symmetric jitter, pure and deterministic for a given `random`
//! - [`Backoff`]: attempt counter that draws its own randomness

use std::time::Duration;

use rand::Rng;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Calculate backoff delay with explicit randomness.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (random * 2 - 1) * jitter)`
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    // Maps random [0,1) to [-jitter, +jitter]
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

/// Reconnect attempt tracker.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    attempt: u32,
}

impl Backoff {
    /// Create a tracker with no failed attempts yet.
    #[must_use]
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, jitter_factor: f64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Delay before the next attempt; bumps the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let random = if self.jitter_factor > 0.0 {
            rand::rng().random::<f64>()
        } else {
            0.5
        };
        let ms = calculate_backoff_delay_with_random(
            self.attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        );
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms)
    }

    /// Forget previous failures (after a successful handshake).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failed attempts so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_BASE_DELAY_MS,
            DEFAULT_MAX_DELAY_MS,
            DEFAULT_JITTER_FACTOR,
        )
    }
}
