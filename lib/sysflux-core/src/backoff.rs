//! Retry backoff.

use std::time::Duration;

use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

/// An exponential backoff strategy.
///
/// This backoff strategy provides backoff durations that increase exponentially based on a user-provided error count,
/// with a minimum and maximum bound on the duration. Additionally, jitter can be added to the backoff duration in order
/// to help avoid multiple agents retrying against the same endpoint at the same time.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    min_backoff: Duration,
    max_backoff: Duration,
    min_backoff_factor: f64,
    rng: Option<StdRng>,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff` with the given minimum and maximum backoff durations.
    ///
    /// Jitter is not applied to the calculated backoff durations. If `max_backoff` is smaller than `min_backoff`, it is
    /// raised to `min_backoff`.
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        Self::with_jitter(min_backoff, max_backoff, 1.0)
    }

    /// Creates a new `ExponentialBackoff` with the given minimum and maximum backoff durations, and minimum backoff
    /// factor.
    ///
    /// Jitter is applied to the calculated backoff durations based on the minimum backoff factor, such that any given
    /// backoff duration will be between `D/min_backoff_factor` and `D`, where `D` is the calculated backoff duration
    /// for the given error count. If the minimum backoff factor is 1.0 or less, jitter is disabled. A factor below 2.0
    /// keeps the duration for one error count strictly below the duration for the next, until the maximum is reached.
    ///
    /// Concretely, with a minimum backoff duration of 10ms and a minimum backoff factor of 2.0, the duration for an
    /// error count of one would be 20ms without jitter, but anywhere between 10ms and 20ms with jitter.
    pub fn with_jitter(min_backoff: Duration, max_backoff: Duration, min_backoff_factor: f64) -> Self {
        Self {
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
            min_backoff_factor: min_backoff_factor.max(1.0),
            rng: None,
        }
    }

    /// Seeds the random number generator used for jittered backoff durations.
    ///
    /// Defaults to the thread-local generator seeded by the operating system.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Some(StdRng::seed_from_u64(seed));
        self
    }

    /// Returns the minimum backoff duration.
    pub fn min_backoff(&self) -> Duration {
        self.min_backoff
    }

    /// Returns the maximum backoff duration.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Calculates the backoff duration for the given error count.
    ///
    /// The error count should be the number of consecutive failures seen when retrying an operation.
    pub fn get_backoff_duration(&mut self, error_count: u32) -> Duration {
        if error_count == 0 {
            return self.min_backoff;
        }

        let mut backoff = self.min_backoff.saturating_mul(2u32.saturating_pow(error_count));

        // Apply jitter if necessary.
        if self.min_backoff_factor > 1.0 {
            let backoff_lower = backoff.div_f64(self.min_backoff_factor);
            let backoff_upper = backoff;
            backoff = match self.rng.as_mut() {
                Some(rng) => rng.random_range(backoff_lower..=backoff_upper),
                None => rand::rng().random_range(backoff_lower..=backoff_upper),
            };
        }

        backoff.clamp(self.min_backoff, self.max_backoff)
    }
}

/// Tracks consecutive delivery failures.
#[derive(Clone, Debug)]
pub struct BackoffState {
    policy: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    /// Creates a new `BackoffState` with no recorded failures.
    pub fn new(policy: ExponentialBackoff) -> Self {
        Self { policy, error_count: 0 }
    }

    /// Returns the number of consecutive failures recorded since the last reset.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Returns the delay for the current number of consecutive failures.
    ///
    /// This is the minimum delay when no failures have been recorded.
    pub fn current(&mut self) -> Duration {
        self.policy.get_backoff_duration(self.error_count)
    }

    /// Records a failure and returns how long to wait before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.error_count = self.error_count.saturating_add(1);
        self.current()
    }

    /// Forgets all recorded failures.
    pub fn reset(&mut self) {
        self.error_count = 0;
    }
}
