//! Backoff for cache loops recovering from watch failures.
//!
//! A per-cluster cache loop that loses its watch relists and rewatches. The
//! delay between attempts grows exponentially with jitter so a flapping
//! cluster does not hammer its own API server, and resets once a relist
//! succeeds.

use std::time::Duration;

use rand::Rng;

/// Configuration for transient-failure backoff
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Stateful backoff tracker for one retry loop
///
/// Each call to [`Backoff::next_delay`] yields the next jittered delay and
/// advances the schedule; [`Backoff::reset`] returns to the initial delay
/// after a successful attempt.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: RetryConfig,
    delay: Duration,
}

impl Backoff {
    /// Create a backoff tracker starting at the configured initial delay
    pub fn new(config: RetryConfig) -> Self {
        let delay = config.initial_delay;
        Self { config, delay }
    }

    /// Next delay to sleep before retrying
    ///
    /// Jittered to 0.5x-1.5x of the current schedule value to avoid
    /// thundering-herd relists when many cache loops fail together.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(self.delay.as_secs_f64() * jitter);

        self.delay = Duration::from_secs_f64(
            (self.delay.as_secs_f64() * self.config.backoff_multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        );

        jittered
    }

    /// Reset the schedule after a successful attempt
    pub fn reset(&mut self) {
        self.delay = self.config.initial_delay;
    }
}
