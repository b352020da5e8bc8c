//! Interval functions computing the delay before a reconnect attempt.

use std::time::Duration;

/// Upper bound applied when a computed interval cannot be represented.
const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Abstraction for computing reconnect intervals.
///
/// Implementations must be pure: the same `retry` index always yields the
/// same delay (randomized implementations excepted).
pub trait IntervalFunction: Send + Sync {
    /// Computes the delay before the next reconnect attempt.
    ///
    /// `retry` is 0-indexed: the delay before the first retry is `next_interval(0)`.
    fn next_interval(&self, retry: u32) -> Duration;
}

/// Returns the same duration for every retry.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    duration: Duration,
}

impl FixedInterval {
    /// Creates a new fixed interval.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl IntervalFunction for FixedInterval {
    fn next_interval(&self, _retry: u32) -> Duration {
        self.duration
    }
}

/// Grows the delay by `initial * factor` on every retry.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    initial_interval: Duration,
    factor: f64,
    max_interval: Option<Duration>,
}

impl LinearBackoff {
    /// Creates a linear backoff with a factor of 1.0.
    pub fn new(initial_interval: Duration) -> Self {
        Self {
            initial_interval,
            factor: 1.0,
            max_interval: None,
        }
    }

    /// Sets the linear growth factor.
    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(0.0);
        self
    }

    /// Caps the computed interval.
    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }
}

impl IntervalFunction for LinearBackoff {
    fn next_interval(&self, retry: u32) -> Duration {
        let scale = 1.0 + self.factor * f64::from(retry);
        scaled(self.initial_interval, scale, self.max_interval)
    }
}

/// Exponential backoff with configurable multiplier.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Option<Duration>,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff with a multiplier of 2.0.
    pub fn new(initial_interval: Duration) -> Self {
        Self {
            initial_interval,
            multiplier: 2.0,
            max_interval: None,
        }
    }

    /// Sets the multiplier for exponential growth.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the maximum interval to cap exponential growth.
    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }
}

impl IntervalFunction for ExponentialBackoff {
    fn next_interval(&self, retry: u32) -> Duration {
        let scale = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        scaled(self.initial_interval, scale, self.max_interval)
    }
}

/// Exponential backoff with jitter, spreading reconnect storms from many clients.
#[derive(Debug, Clone)]
pub struct ExponentialRandomBackoff {
    base: ExponentialBackoff,
    randomization_factor: f64,
}

impl ExponentialRandomBackoff {
    /// Creates a new exponential random backoff.
    ///
    /// A `randomization_factor` of 0.5 spreads each interval between 50% and
    /// 150% of the exponential value. The factor is clamped to `0.0..=1.0`.
    pub fn new(initial_interval: Duration, randomization_factor: f64) -> Self {
        Self {
            base: ExponentialBackoff::new(initial_interval),
            randomization_factor: randomization_factor.clamp(0.0, 1.0),
        }
    }

    /// Sets the multiplier for exponential growth.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.base = self.base.multiplier(multiplier);
        self
    }

    /// Sets the maximum interval to cap exponential growth (before jitter).
    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.base = self.base.max_interval(max_interval);
        self
    }

    fn randomize(&self, duration: Duration) -> Duration {
        use rand::Rng;
        if self.randomization_factor == 0.0 {
            return duration;
        }
        let secs = duration.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let randomized = rand::rng().random_range((secs - delta)..=(secs + delta));
        Duration::from_secs_f64(randomized.max(0.0))
    }
}

impl IntervalFunction for ExponentialRandomBackoff {
    fn next_interval(&self, retry: u32) -> Duration {
        self.randomize(self.base.next_interval(retry))
    }
}

/// Function-based interval implementation.
pub struct FnInterval<F> {
    f: F,
}

impl<F> FnInterval<F>
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    /// Creates a new function-based interval.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> IntervalFunction for FnInterval<F>
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn next_interval(&self, retry: u32) -> Duration {
        (self.f)(retry)
    }
}

fn scaled(initial: Duration, scale: f64, max: Option<Duration>) -> Duration {
    let cap = max.unwrap_or(MAX_INTERVAL);
    let secs = initial.as_secs_f64() * scale;
    if !secs.is_finite() || secs >= cap.as_secs_f64() {
        return cap;
    }
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(cap)
}
