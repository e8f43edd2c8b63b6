//! Error accounting and point-in-time health snapshots.
//!
//! Every failure a session observes is recorded here. Once the running count
//! reaches [`ERROR_THRESHOLD`] each further record reports a crossing, until
//! a consumer calls [`HealthMonitor::reset`]. Counts never reset on their own.

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use serde::Serialize;

/// Error count at which threshold crossings are reported.
pub const ERROR_THRESHOLD: u64 = 5;

/// Immutable copy of a session's health.
///
/// # Examples
///
/// ```
/// use relink::health::HealthSnapshot;
///
/// let snapshot = HealthSnapshot {
///     endpoint_name: "fetch".into(),
///     connected: false,
///     attempt: 0,
///     error_count: 0,
///     last_error_at: None,
/// };
/// let json = serde_json::to_value(&snapshot).expect("serialize snapshot");
/// assert_eq!(json["endpoint_name"], "fetch");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    /// Logical name of the endpoint.
    pub endpoint_name: String,
    /// Whether a transport connection is currently established.
    pub connected: bool,
    /// Failed attempts in the current or most recent connect sequence.
    pub attempt: u32,
    /// Errors recorded since construction or the last reset.
    pub error_count: u64,
    /// Wall-clock time of the most recent error.
    pub last_error_at: Option<SystemTime>,
}

/// Outcome of recording one error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Error count including this record.
    pub error_count: u64,
    /// When the error was recorded.
    pub at: SystemTime,
    /// Whether the count is at or beyond [`ERROR_THRESHOLD`].
    pub threshold_crossed: bool,
}

#[derive(Debug, Default)]
struct Counters {
    error_count: u64,
    last_error_at: Option<SystemTime>,
}

/// Per-session error counter.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    label: String,
    counters: Mutex<Counters>,
}

impl HealthMonitor {
    /// Create a monitor whose log lines are tagged with `label`.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            counters: Mutex::default(),
        }
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an error observed in `context`.
    ///
    /// ```
    /// use relink::health::{ERROR_THRESHOLD, HealthMonitor};
    ///
    /// let monitor = HealthMonitor::new("fetch");
    /// for _ in 1..ERROR_THRESHOLD {
    ///     assert!(!monitor.record("send", &"broken pipe").threshold_crossed);
    /// }
    /// assert!(monitor.record("send", &"broken pipe").threshold_crossed);
    /// ```
    pub fn record(&self, context: &str, cause: &dyn fmt::Display) -> ErrorRecord {
        let at = SystemTime::now();
        let error_count = {
            let mut counters = self.counters();
            counters.error_count = counters.error_count.saturating_add(1);
            counters.last_error_at = Some(at);
            counters.error_count
        };
        tracing::error!(
            endpoint = %self.label,
            error_count,
            error = %cause,
            "{context}"
        );
        ErrorRecord {
            error_count,
            at,
            threshold_crossed: error_count >= ERROR_THRESHOLD,
        }
    }

    /// Errors recorded since construction or the last reset.
    #[must_use]
    pub fn error_count(&self) -> u64 { self.counters().error_count }

    /// Time of the most recent error, if any.
    #[must_use]
    pub fn last_error_at(&self) -> Option<SystemTime> { self.counters().last_error_at }

    /// Zero the counter and clear the last error time.
    pub fn reset(&self) {
        let mut counters = self.counters();
        counters.error_count = 0;
        counters.last_error_at = None;
        tracing::info!(endpoint = %self.label, "error counters reset");
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use rstest::{fixture, rstest};
    use tracing_test::traced_test;

    use super::*;

    #[fixture]
    fn monitor() -> HealthMonitor { HealthMonitor::new("test-server") }

    #[rstest]
    fn threshold_fires_on_fifth_and_later_errors(monitor: HealthMonitor) {
        let cause = io::Error::other("boom");
        let crossings: Vec<bool> = (0..6)
            .map(|_| monitor.record("Connection failed", &cause).threshold_crossed)
            .collect();
        assert_eq!(crossings, [false, false, false, false, true, true]);
        assert_eq!(monitor.error_count(), 6);
    }

    #[rstest]
    fn reset_clears_count_and_timestamp(monitor: HealthMonitor) {
        for _ in 0..ERROR_THRESHOLD {
            monitor.record("Send error", &"refused");
        }
        assert_eq!(monitor.error_count(), ERROR_THRESHOLD);
        assert!(monitor.last_error_at().is_some());

        monitor.reset();
        assert_eq!(monitor.error_count(), 0);
        assert_eq!(monitor.last_error_at(), None);
        assert!(!monitor.record("Send error", &"refused").threshold_crossed);
    }

    #[rstest]
    fn last_error_at_tracks_latest_record(monitor: HealthMonitor) {
        monitor.record("a", &"x");
        let second = monitor.record("b", &"y");
        assert_eq!(second.error_count, 2);
        assert_eq!(monitor.last_error_at(), Some(second.at));
    }

    #[rstest]
    #[traced_test]
    fn record_logs_context_and_cause(monitor: HealthMonitor) {
        monitor.record("Socket error", &"connection reset");
        assert!(logs_contain("Socket error"));
        assert!(logs_contain("connection reset"));
        assert!(logs_contain("test-server"));
    }
}
