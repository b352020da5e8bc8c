//! Recovery policies deciding whether and when to attempt another reconnect.

use crate::backoff::{
    ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, IntervalFunction, LinearBackoff,
};
use std::sync::Arc;
use std::time::Duration;

enum Backoff {
    None,
    Constant(FixedInterval),
    Linear(LinearBackoff),
    Exponential(ExponentialBackoff),
    ExponentialRandom(ExponentialRandomBackoff),
    Custom(Arc<dyn IntervalFunction>),
}

impl Clone for Backoff {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Constant(f) => Self::Constant(f.clone()),
            Self::Linear(l) => Self::Linear(l.clone()),
            Self::Exponential(e) => Self::Exponential(e.clone()),
            Self::ExponentialRandom(e) => Self::ExponentialRandom(e.clone()),
            Self::Custom(c) => Self::Custom(Arc::clone(c)),
        }
    }
}

/// Decides, from the number of consecutive failed connection attempts,
/// whether to try again and how long to wait first.
///
/// A policy holds no mutable state: the attempt counter is owned by the
/// connection and passed in on every call. It knows nothing about endpoints.
///
/// # Examples
///
/// ```
/// use artemis_client_recovery::RecoveryPolicy;
/// use std::time::Duration;
///
/// let policy = RecoveryPolicy::constant_backoff(Duration::from_millis(10), 1);
/// assert_eq!(policy.next_delay(1), Some(Duration::from_millis(10)));
/// assert_eq!(policy.next_delay(2), None);
/// ```
#[derive(Clone)]
pub struct RecoveryPolicy {
    backoff: Backoff,
    retry_count: Option<u32>,
}

impl RecoveryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            backoff: Backoff::None,
            retry_count: Some(0),
        }
    }

    /// Waits `delay` between attempts, giving up after `retry_count` retries.
    pub fn constant_backoff(delay: Duration, retry_count: u32) -> Self {
        Self {
            backoff: Backoff::Constant(FixedInterval::new(delay)),
            retry_count: Some(retry_count),
        }
    }

    /// Waits `initial * (1 + factor * n)` before the n-th retry (0-indexed).
    pub fn linear_backoff(initial_delay: Duration, retry_count: u32, factor: f64) -> Self {
        Self {
            backoff: Backoff::Linear(LinearBackoff::new(initial_delay).factor(factor)),
            retry_count: Some(retry_count),
        }
    }

    /// Doubles the delay on every retry, capped at `max_delay`.
    pub fn exponential_backoff(initial_delay: Duration, max_delay: Duration, retry_count: u32) -> Self {
        Self {
            backoff: Backoff::Exponential(
                ExponentialBackoff::new(initial_delay)
                    .multiplier(2.0)
                    .max_interval(max_delay),
            ),
            retry_count: Some(retry_count),
        }
    }

    /// Exponential backoff with jitter.
    ///
    /// `randomization_factor` is clamped to `0.0..=1.0`.
    pub fn exponential_random_backoff(
        initial_delay: Duration,
        max_delay: Duration,
        randomization_factor: f64,
        retry_count: u32,
    ) -> Self {
        Self {
            backoff: Backoff::ExponentialRandom(
                ExponentialRandomBackoff::new(initial_delay, randomization_factor)
                    .multiplier(2.0)
                    .max_interval(max_delay),
            ),
            retry_count: Some(retry_count),
        }
    }

    /// Uses a caller-supplied interval function.
    pub fn custom<F>(interval: F, retry_count: u32) -> Self
    where
        F: IntervalFunction + 'static,
    {
        Self {
            backoff: Backoff::Custom(Arc::new(interval)),
            retry_count: Some(retry_count),
        }
    }

    /// Removes the retry limit.
    pub fn unlimited(mut self) -> Self {
        self.retry_count = None;
        self
    }

    /// Replaces the retry limit.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// The maximum number of retries, or `None` when unlimited.
    pub fn retry_count(&self) -> Option<u32> {
        self.retry_count
    }

    /// Returns the delay before the next attempt, or `None` to give up.
    ///
    /// `attempt` is the number of consecutive failed attempts so far. A policy
    /// with a retry count of `n` allows attempts `1..=n` to be followed by a
    /// retry and rejects `attempt > n`; with `n = 1` a connection therefore
    /// makes two attempts in total.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if let Some(limit) = self.retry_count {
            if attempt > limit {
                return None;
            }
        }
        let retry = attempt - 1;
        match &self.backoff {
            Backoff::None => None,
            Backoff::Constant(interval) => Some(interval.next_interval(retry)),
            Backoff::Linear(interval) => Some(interval.next_interval(retry)),
            Backoff::Exponential(interval) => Some(interval.next_interval(retry)),
            Backoff::ExponentialRandom(interval) => Some(interval.next_interval(retry)),
            Backoff::Custom(interval) => Some(interval.next_interval(retry)),
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        // Exponential backoff from 100ms to 5 seconds, retrying forever
        Self::exponential_backoff(Duration::from_millis(100), Duration::from_secs(5), 0).unlimited()
    }
}

impl std::fmt::Debug for RecoveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.backoff {
            Backoff::None => "None",
            Backoff::Constant(_) => "Constant",
            Backoff::Linear(_) => "Linear",
            Backoff::Exponential(_) => "Exponential",
            Backoff::ExponentialRandom(_) => "ExponentialRandom",
            Backoff::Custom(_) => "Custom",
        };
        f.debug_struct("RecoveryPolicy")
            .field("backoff", &kind)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}
