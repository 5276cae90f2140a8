//! Component logger
//!
//! Every entsync component receives a [`Logger`] when it is constructed
//! instead of reaching for global logging state. A logger carries the
//! component name, attached to every event as the `component` field, and a
//! minimum level below which events are dropped before they reach
//! `tracing`. The subscriber's own filter (see
//! [`init_observability`](crate::init_observability)) still applies on top.
//!
//! ```rust
//! use entsync_core::Logger;
//! use tracing::Level;
//!
//! let root = Logger::new("entsync", Level::INFO);
//! let token_log = root.child("token");
//! assert!(token_log.enabled(Level::WARN));
//! assert!(!token_log.enabled(Level::DEBUG));
//! ```

use std::fmt;
use std::sync::Arc;
use tracing::Level;

/// Environment variable holding the default minimum level
pub const LOG_LEVEL_ENV: &str = "ENTSYNC_LOG_LEVEL";

/// Minimum level from `ENTSYNC_LOG_LEVEL`, falling back to `WARN`
pub fn default_level() -> Level {
    std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(Level::WARN)
}

#[derive(Clone)]
pub struct Logger {
    component: Arc<str>,
    min_level: Level,
}

impl Logger {
    pub fn new(component: impl AsRef<str>, min_level: Level) -> Self {
        Self {
            component: Arc::from(component.as_ref()),
            min_level,
        }
    }

    /// A logger for a sub-component, sharing the minimum level
    pub fn child(&self, name: &str) -> Self {
        Self::new(format!("{}.{}", self.component, name), self.min_level)
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn min_level(&self) -> Level {
        self.min_level
    }

    /// `tracing` orders levels by verbosity, so `ERROR < WARN < ... < TRACE`.
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.min_level
    }

    pub fn debug(&self, message: impl fmt::Display) {
        if self.enabled(Level::DEBUG) {
            tracing::debug!(component = %self.component, "{}", message);
        }
    }

    pub fn info(&self, message: impl fmt::Display) {
        if self.enabled(Level::INFO) {
            tracing::info!(component = %self.component, "{}", message);
        }
    }

    pub fn warn(&self, message: impl fmt::Display) {
        if self.enabled(Level::WARN) {
            tracing::warn!(component = %self.component, "{}", message);
        }
    }

    pub fn error(&self, message: impl fmt::Display) {
        if self.enabled(Level::ERROR) {
            tracing::error!(component = %self.component, "{}", message);
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("entsync", default_level())
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("component", &self.component)
            .field("min_level", &self.min_level)
            .finish()
    }
}
