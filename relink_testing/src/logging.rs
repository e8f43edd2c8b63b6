//! Shared `log` capture for asserting on session diagnostics.
//!
//! `tracing` forwards every event to `log` (the `log-always` feature), so a
//! [`logtest::Logger`] sees what the session reports. The logger is process
//! global; tests using it should be serialised.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use log::Level;
use logtest::Logger;
use rstest::fixture;

/// Exclusive handle to the process-wide captured log.
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    /// Acquire the captured log, starting capture on first use.
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        let guard = logger.lock().unwrap_or_else(PoisonError::into_inner);
        Self { guard }
    }

    /// Discard everything captured so far.
    pub fn clear(&mut self) { while self.guard.pop().is_some() {} }

    /// Pop records until one at `level` whose message contains `needle`.
    ///
    /// Returns the full message of the match, or `None` once the capture is
    /// exhausted.
    pub fn find(&mut self, level: Level, needle: &str) -> Option<String> {
        while let Some(record) = self.guard.pop() {
            let message = record.args().to_string();
            if record.level() == level && message.contains(needle) {
                return Some(message);
            }
        }
        None
    }
}

impl Default for LoggerHandle {
    fn default() -> Self { Self::new() }
}

impl std::ops::Deref for LoggerHandle {
    type Target = Logger;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl std::ops::DerefMut for LoggerHandle {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.guard }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::new() }
