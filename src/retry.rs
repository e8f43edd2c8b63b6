//! Exponential back-off and attempt accounting for connection retries.

use std::time::Duration;

/// Immutable retry configuration for a session.
///
/// The delay before retry `n` (1-based) is `base_delay * 2^(n-1)`, capped at
/// `max_delay`. At most `max_attempts` handshakes are made per connect
/// sequence, each bounded by `connect_timeout`.
///
/// # Default Values
/// - `max_attempts`: 5
/// - `base_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `connect_timeout`: 5 seconds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Handshakes attempted before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling applied to every computed delay.
    pub max_delay: Duration,
    /// Deadline for a single handshake.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Clamp values to sane bounds and ensure `base_delay <= max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use relink::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy {
    ///     max_attempts: 0,
    ///     base_delay: Duration::from_millis(500),
    ///     max_delay: Duration::from_millis(100),
    ///     connect_timeout: Duration::ZERO,
    /// }
    /// .normalized();
    ///
    /// assert_eq!(policy.max_attempts, 1);
    /// assert_eq!(policy.base_delay, Duration::from_millis(100));
    /// assert_eq!(policy.max_delay, Duration::from_millis(500));
    /// assert_eq!(policy.connect_timeout, Duration::from_millis(1));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.base_delay = self.base_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        self.connect_timeout = self.connect_timeout.max(Duration::from_millis(1));
        if self.base_delay > self.max_delay {
            std::mem::swap(&mut self.base_delay, &mut self.max_delay);
        }
        self
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    ///
    /// Attempt `0` is treated as `1`. Growth saturates at `max_delay`.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use relink::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy {
    ///     base_delay: Duration::from_millis(100),
    ///     max_delay: Duration::from_millis(1000),
    ///     ..RetryPolicy::default()
    /// };
    /// assert_eq!(policy.next_delay(1), Duration::from_millis(100));
    /// assert_eq!(policy.next_delay(3), Duration::from_millis(400));
    /// assert_eq!(policy.next_delay(5), Duration::from_millis(1000));
    /// ```
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Outcome of recording a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait for the delay, then attempt again.
    Retry(Duration),
    /// The attempt ceiling has been reached.
    GiveUp,
}

/// Attempt counter enforcing a [`RetryPolicy`].
#[derive(Clone, Debug)]
pub struct RetryController {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryController {
    /// Create a controller with no recorded failures.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: policy.normalized(),
            attempt: 0,
        }
    }

    /// Failed attempts recorded since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 { self.attempt }

    /// The normalized policy in force.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy { &self.policy }

    /// Returns true once the attempt ceiling has been reached.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool { self.attempt >= self.policy.max_attempts }

    /// Record one failed attempt and decide whether to try again.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use relink::retry::{RetryController, RetryDecision, RetryPolicy};
    ///
    /// let mut retry = RetryController::new(RetryPolicy {
    ///     max_attempts: 2,
    ///     base_delay: Duration::from_millis(10),
    ///     ..RetryPolicy::default()
    /// });
    /// assert_eq!(
    ///     retry.record_failure(),
    ///     RetryDecision::Retry(Duration::from_millis(10))
    /// );
    /// assert_eq!(retry.record_failure(), RetryDecision::GiveUp);
    /// assert_eq!(retry.attempt(), 2);
    /// ```
    pub fn record_failure(&mut self) -> RetryDecision {
        self.attempt = self.attempt.saturating_add(1);
        if self.is_exhausted() {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.policy.next_delay(self.attempt))
        }
    }

    /// Clear the attempt counter.
    pub fn reset(&mut self) { self.attempt = 0; }
}
