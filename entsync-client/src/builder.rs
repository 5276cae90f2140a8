//! Adapter builder
//!
//! The `AdapterBuilder` wires a channel and a schema into a running
//! [`SyncAdapter`]. It allows you to:
//! - Tune the session through a [`SyncConfig`]
//! - Plug in your own [`EntityCache`]
//! - Configure observability (OpenTelemetry)
//! - Set service name for telemetry
//!
//! # Examples
//!
//! ```rust,no_run
//! use entsync_client::{AdapterBuilder, Backoff, SyncConfig, WsChannel};
//! use entsync_core::SchemaRegistry;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> entsync_core::Result<()> {
//! let channel = WsChannel::with_backoff(
//!     "ws://localhost:1337/socket",
//!     Backoff::fixed(Duration::from_secs(1)),
//! );
//!
//! let adapter = AdapterBuilder::new(Arc::new(channel), Arc::new(SchemaRegistry::new()))
//!     .config(SyncConfig::default().with_csrf(false))
//!     .with_default_observability()
//!     .service_name("inventory-ui")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::adapter::{AdapterParts, SyncAdapter};
use crate::batch::SubscriptionBatcher;
use crate::channel::Channel;
use crate::config::SyncConfig;
use crate::connection_state::ConnectionManager;
use crate::correlator::RequestCorrelator;
use crate::metrics::ClientMetrics;
use crate::store::{EntityCache, MemoryStore};
use crate::token::TokenGuard;
use entsync_core::{Error, Logger, Normalizer, ObservabilityConfig, Result, Schema};
use std::sync::Arc;

/// Builder for configuring and creating a [`SyncAdapter`]
pub struct AdapterBuilder {
    channel: Arc<dyn Channel>,
    schema: Arc<dyn Schema>,
    config: SyncConfig,
    cache: Option<Arc<dyn EntityCache>>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl AdapterBuilder {
    pub fn new(channel: Arc<dyn Channel>, schema: Arc<dyn Schema>) -> Self {
        Self {
            channel,
            schema,
            config: SyncConfig::default(),
            cache: None,
            observability_config: None,
            service_name: None,
        }
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `cache` instead of a fresh [`MemoryStore`]
    pub fn cache(mut self, cache: Arc<dyn EntityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Build the adapter and start loading the channel
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<SyncAdapter> {
        let metrics = match self.observability_config {
            Some(mut config) => {
                if let Some(name) = self.service_name {
                    config.service_name = name;
                }
                entsync_core::init_observability(config.clone()).map_err(|e| {
                    Error::Internal(format!("Failed to initialize observability: {}", e))
                })?;
                Some(Arc::new(ClientMetrics::new(config.service_name.clone())))
            }
            None => None,
        };

        let config = self.config;
        let log = Logger::new("entsync", config.log_level);

        let connection = ConnectionManager::new(
            self.channel,
            log.child("connection"),
            metrics.clone(),
        );
        connection.start();

        let correlator = RequestCorrelator::new(
            connection.clone(),
            config.request_timeout,
            log.child("correlator"),
            metrics.clone(),
        );
        let token = TokenGuard::new(
            correlator.clone(),
            config.token_path.clone(),
            config.token_field.clone(),
            log.child("token"),
            metrics.clone(),
        );
        let batcher = SubscriptionBatcher::new(
            correlator.clone(),
            token.clone(),
            config.use_csrf,
            config.subscribe_endpoint.clone(),
            config.debounce,
            config.should_subscribe.clone(),
            log.child("batch"),
            metrics,
        );
        let normalizer = Normalizer::with_logger(self.schema, log.child("normalize"));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryStore::with_subscriptions(batcher.clone())));

        tracing::debug!(component = log.component(), "adapter built");

        Ok(SyncAdapter::from_parts(AdapterParts {
            config,
            connection,
            correlator,
            token,
            batcher,
            normalizer,
            cache,
            log: log.child("adapter"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::WsChannel;
    use entsync_core::SchemaRegistry;

    fn builder() -> AdapterBuilder {
        AdapterBuilder::new(
            Arc::new(WsChannel::new("ws://127.0.0.1:9")),
            Arc::new(SchemaRegistry::new()),
        )
    }

    #[test]
    fn test_builder_creation() {
        let builder = builder();
        assert!(builder.cache.is_none());
        assert!(builder.observability_config.is_none());
        assert!(builder.service_name.is_none());
        assert!(builder.config.use_csrf);
    }

    #[test]
    fn test_builder_with_observability() {
        let builder = builder()
            .with_default_observability()
            .service_name("custom-service");
        assert!(builder.observability_config.is_some());
        assert_eq!(builder.service_name.as_deref(), Some("custom-service"));
    }

    #[test]
    fn test_builder_with_cache() {
        let builder = builder().cache(Arc::new(MemoryStore::new()));
        assert!(builder.cache.is_some());
    }

    #[tokio::test]
    async fn test_build_starts_loading() {
        let adapter = builder()
            .config(SyncConfig::default().with_namespace("/api"))
            .build()
            .unwrap();

        assert!(adapter.is_busy());
        assert_eq!(adapter.url_for("blog-post", Some("3")), "/api/blogPosts/3");
        adapter.destroy().await;
        assert!(adapter.is_destroyed());
    }
}
