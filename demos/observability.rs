//! Observability example
//!
//! Connects an adapter to a WebSocket backend with OpenTelemetry traces and
//! metrics exported over OTLP.
//!
//! Run with: cargo run --example observability

use entsync::{AdapterBuilder, Backoff, ObservabilityConfig, SchemaRegistry, WsChannel};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configure observability
    let otel_config = ObservabilityConfig::new("entsync-observability-demo")
        .with_endpoint("http://localhost:4317")
        .with_log_level("debug");

    let channel = WsChannel::with_backoff(
        "ws://127.0.0.1:1337/socket",
        Backoff::exponential(Duration::from_millis(200), Duration::from_secs(5))
            .with_max_attempts(5)
            .with_jitter(),
    );

    let adapter = AdapterBuilder::new(
        Arc::new(channel),
        Arc::new(SchemaRegistry::new().has_many("widget", "parts", "part")),
    )
    .with_observability(otel_config)
    .service_name("observability-demo")
    .build()?;

    for i in 1..=5 {
        tracing::info!(iteration = i, "loading widgets");
        match adapter.find_all("widget").await {
            Ok(widgets) => println!("Iteration {}: {} widgets", i, widgets.records("widgets").len()),
            Err(e) => println!("Iteration {}: {} ({:?})", i, e, e.kind()),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    adapter.destroy().await;

    // Give time for telemetry to flush
    tokio::time::sleep(Duration::from_secs(2)).await;
    entsync::core::shutdown_observability();
    Ok(())
}
