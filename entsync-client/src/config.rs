//! Session configuration
//!
//! # Examples
//!
//! ```rust
//! use entsync_client::SyncConfig;
//! use std::time::Duration;
//!
//! let config = SyncConfig::default()
//!     .with_namespace("/api/v1")
//!     .with_debounce(Duration::from_millis(20))
//!     .with_should_subscribe(|entity_type, _id| entity_type != "auditLog");
//!
//! assert!(config.use_csrf);
//! assert_eq!(config.token_field, "_csrf");
//! ```

use crate::batch::{SubscribePredicate, DEFAULT_DEBOUNCE};
use crate::correlator::DEFAULT_REQUEST_TIMEOUT;
use crate::token::{DEFAULT_TOKEN_FIELD, DEFAULT_TOKEN_PATH};
use entsync_core::logger::default_level;
use entsync_core::Verb;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

/// Default subscription endpoint
pub const DEFAULT_SUBSCRIBE_PATH: &str = "/socket/subscribe";

#[derive(Clone)]
pub struct SyncConfig {
    /// Attach the security token to mutating requests
    pub use_csrf: bool,
    pub token_field: String,
    pub token_path: String,
    /// `None` disables subscriptions
    pub subscribe_endpoint: Option<(Verb, String)>,
    pub debounce: Duration,
    pub should_subscribe: Option<SubscribePredicate>,
    /// `None` waits forever
    pub request_timeout: Option<Duration>,
    /// Prefix for every URL, e.g. `https://api.example.com`
    pub host: String,
    /// Path between the host and the type path, e.g. `/api/v1`
    pub namespace: String,
    pub log_level: Level,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            use_csrf: true,
            token_field: DEFAULT_TOKEN_FIELD.to_string(),
            token_path: DEFAULT_TOKEN_PATH.to_string(),
            subscribe_endpoint: Some((Verb::Post, DEFAULT_SUBSCRIBE_PATH.to_string())),
            debounce: DEFAULT_DEBOUNCE,
            should_subscribe: None,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            host: String::new(),
            namespace: String::new(),
            log_level: default_level(),
        }
    }
}

impl SyncConfig {
    pub fn with_csrf(mut self, enabled: bool) -> Self {
        self.use_csrf = enabled;
        self
    }

    pub fn with_token_field(mut self, field: impl Into<String>) -> Self {
        self.token_field = field.into();
        self
    }

    pub fn with_token_path(mut self, path: impl Into<String>) -> Self {
        self.token_path = path.into();
        self
    }

    pub fn with_subscribe_endpoint(mut self, verb: Verb, path: impl Into<String>) -> Self {
        self.subscribe_endpoint = Some((verb, path.into()));
        self
    }

    pub fn without_subscriptions(mut self) -> Self {
        self.subscribe_endpoint = None;
        self
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    pub fn with_should_subscribe<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.should_subscribe = Some(Arc::new(predicate));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("use_csrf", &self.use_csrf)
            .field("token_field", &self.token_field)
            .field("token_path", &self.token_path)
            .field("subscribe_endpoint", &self.subscribe_endpoint)
            .field("debounce", &self.debounce)
            .field("should_subscribe", &self.should_subscribe.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("host", &self.host)
            .field("namespace", &self.namespace)
            .field("log_level", &self.log_level)
            .finish()
    }
}
