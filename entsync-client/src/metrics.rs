//! Client metrics definitions
//!
//! OpenTelemetry instruments for the sync session. They are created from the
//! global meter, so they export wherever
//! [`init_observability`](entsync_core::init_observability) points the
//! meter provider, and are no-ops when no provider is installed.
//!
//! # Metrics Collected
//!
//! - **connection.state**: current session state (gauge)
//! - **requests.total** / **request.duration**: correlated requests by verb
//!   and outcome
//! - **errors.total**: failures by error label
//! - **pending.operations**: in-flight requests (up/down counter)
//! - **reconnection.attempts**: reconnects requested by the session
//! - **token.fetches**: security token round trips
//! - **subscription.batch.size**: ids sent per subscribe flush
//! - **push.messages**: push messages received by `"<event>.<verb>"`

use crate::connection_state::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter},
    KeyValue,
};

pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub requests_total: Counter<u64>,
    /// Seconds
    pub request_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub pending_operations: UpDownCounter<i64>,
    pub reconnection_attempts: Counter<u64>,
    pub token_fetches: Counter<u64>,
    pub subscription_batch_size: Histogram<u64>,
    pub push_messages: Counter<u64>,
}

impl ClientMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let meter = global::meter_with_scope(
            opentelemetry::InstrumentationScope::builder(service_name.into()).build(),
        );
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("entsync.connection.state")
                .with_description(
                    "Session state (0=uninitialized, 1=connecting, 2=connected, 3=disconnected, 4=reconnecting, 5=destroyed)",
                )
                .build(),
            requests_total: meter
                .u64_counter("entsync.requests.total")
                .with_description("Total number of correlated requests")
                .build(),
            request_duration: meter
                .f64_histogram("entsync.request.duration")
                .with_description("Request duration in seconds")
                .with_unit("s")
                .build(),
            errors_total: meter
                .u64_counter("entsync.errors.total")
                .with_description("Total number of failed operations")
                .build(),
            pending_operations: meter
                .i64_up_down_counter("entsync.pending.operations")
                .with_description("Requests currently in flight")
                .build(),
            reconnection_attempts: meter
                .u64_counter("entsync.reconnection.attempts")
                .with_description("Reconnection attempts requested by the session")
                .build(),
            token_fetches: meter
                .u64_counter("entsync.token.fetches")
                .with_description("Security token fetches")
                .build(),
            subscription_batch_size: meter
                .u64_histogram("entsync.subscription.batch.size")
                .with_description("Ids sent per subscription flush")
                .build(),
            push_messages: meter
                .u64_counter("entsync.push.messages")
                .with_description("Push messages received")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: ConnectionState) {
        self.connection_state.record(state.as_gauge(), &[]);
    }

    pub fn record_request(&self, verb: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("verb", verb.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type.to_string())]);
    }

    pub fn pending_changed(&self, delta: i64) {
        self.pending_operations.add(delta, &[]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_token_fetch(&self, outcome: &str) {
        self.token_fetches
            .add(1, &[KeyValue::new("outcome", outcome.to_string())]);
    }

    pub fn record_subscription_batch(&self, size: u64) {
        self.subscription_batch_size.record(size, &[]);
    }

    pub fn record_push(&self, name: &str) {
        self.push_messages
            .add(1, &[KeyValue::new("event", name.to_string())]);
    }
}
