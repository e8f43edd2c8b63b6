//! Session configuration.
//!
//! [`SessionConfig`] is the optional configuration surface for a session.
//! Every field has a default, so an empty JSON object is a valid
//! configuration.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::{decoder::DEFAULT_BUFFER_LIMIT, retry::RetryPolicy};

/// Default capacity of a session's event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Verbosity of the process-wide log subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Lifecycle events.
    #[default]
    Info,
    /// Per-attempt and per-chunk detail.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    /// Equivalent `tracing` filter.
    #[must_use]
    pub const fn level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Error returned when parsing an unknown log level.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(ParseLogLevelError(s.to_owned())),
        }
    }
}

/// Optional settings for a [`Session`](crate::session::Session).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use relink::config::SessionConfig;
///
/// let config = SessionConfig::from_json(r#"{"max_attempts": 3, "base_delay_ms": 100}"#)
///     .expect("valid config");
/// let policy = config.retry_policy();
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.base_delay, Duration::from_millis(100));
/// assert_eq!(policy.max_delay, Duration::from_secs(30));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Handshakes attempted per connect sequence.
    pub max_attempts: u32,
    /// Deadline for one handshake, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling on retry delays, in milliseconds.
    pub max_delay_ms: u64,
    /// Log verbosity for the binary's subscriber.
    pub log_level: LogLevel,
    /// Bytes of partial input a decoder may retain.
    pub max_buffer: usize,
    /// Events buffered per subscriber before the slowest one lags.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            connect_timeout_ms: 5_000,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            log_level: LogLevel::default(),
            max_buffer: DEFAULT_BUFFER_LIMIT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the text is not a valid
    /// configuration object.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> { serde_json::from_str(text) }

    /// Retry policy described by this configuration, normalized.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
        .normalized()
    }
}
