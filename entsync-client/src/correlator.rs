//! Request/response correlation
//!
//! [`RequestCorrelator::call`] is the single path by which entsync talks to
//! the server. Each call:
//!
//! 1. counts itself as pending (the count drops again on every exit path,
//!    including cancellation, because a guard owns the decrement);
//! 2. waits for a connected channel and sends the request, the whole round
//!    trip bounded by the configured timeout and raced against session
//!    teardown;
//! 3. classifies the raw response into a body or an error.
//!
//! The pending count is the session's backpressure signal: the session is
//! busy while it is not yet initialized or while any call is in flight.

use crate::connection_state::{ConnectionManager, ConnectionState};
use crate::metrics::ClientMetrics;
use entsync_core::{codec, Error, Logger, Result, Verb};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Default upper bound for one request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingGuard<'a> {
    count: &'a watch::Sender<usize>,
    metrics: Option<&'a ClientMetrics>,
}

impl<'a> PendingGuard<'a> {
    fn enter(count: &'a watch::Sender<usize>, metrics: Option<&'a ClientMetrics>) -> Self {
        count.send_modify(|n| *n += 1);
        if let Some(metrics) = metrics {
            metrics.pending_changed(1);
        }
        Self { count, metrics }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
        if let Some(metrics) = self.metrics {
            metrics.pending_changed(-1);
        }
    }
}

#[derive(Clone)]
pub struct RequestCorrelator {
    connection: ConnectionManager,
    pending: Arc<watch::Sender<usize>>,
    timeout: Option<Duration>,
    log: Logger,
    metrics: Option<Arc<ClientMetrics>>,
}

impl RequestCorrelator {
    pub fn new(
        connection: ConnectionManager,
        timeout: Option<Duration>,
        log: Logger,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            connection,
            pending: Arc::new(pending),
            timeout,
            log,
            metrics,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Calls currently in flight
    pub fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }

    /// Observe the pending count
    pub fn watch_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    /// Busy until the channel has been initialized, and while any call is
    /// pending
    pub fn is_busy(&self) -> bool {
        !self.connection.is_initialized() || self.pending_count() > 0
    }

    /// Issue one request and classify its response
    #[tracing::instrument(skip(self, verb, data), fields(verb = %verb))]
    pub async fn call(&self, verb: Verb, url: &str, data: Value) -> Result<Value> {
        let _pending = PendingGuard::enter(&self.pending, self.metrics.as_deref());
        let started = Instant::now();

        let outcome = self.exchange(verb, url, data).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &outcome {
            Ok(_) => {
                self.log
                    .info(format_args!("{} {} succeeded in {:.3}s", verb, url, elapsed));
            }
            Err(Error::Validation(errors)) => {
                self.log
                    .error(format_args!("{} {} rejected: {}", verb, url, errors));
            }
            Err(err) => {
                self.log
                    .warn(format_args!("{} {} failed: {}", verb, url, err));
            }
        }

        if let Some(metrics) = &self.metrics {
            let status = if outcome.is_ok() { "success" } else { "error" };
            metrics.record_request(verb.as_str(), status, elapsed);
            if let Err(err) = &outcome {
                metrics.record_error(err.label());
            }
        }

        outcome
    }

    async fn exchange(&self, verb: Verb, url: &str, data: Value) -> Result<Value> {
        let mut state = self.connection.watch_state();

        let round_trip = async {
            match self.connection.connected_channel().await {
                Ok(channel) => channel.request(verb, url, data).await,
                Err(err) => Err(err),
            }
        };
        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, round_trip).await {
                    Ok(response) => response,
                    Err(_) => Err(Error::Timeout),
                },
                None => round_trip.await,
            }
        };

        let destroyed = async {
            let _ = state.wait_for(|s| *s == ConnectionState::Destroyed).await;
        };

        let raw = tokio::select! {
            response = bounded => response?,
            _ = destroyed => return Err(Error::Destroyed),
        };

        codec::classify(raw)
    }
}
