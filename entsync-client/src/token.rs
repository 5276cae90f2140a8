//! Security token guard
//!
//! Mutating requests carry an anti-forgery token fetched from the server.
//! The guard caches it and makes sure at most one fetch is ever in flight:
//! callers that arrive while a fetch is running await that same fetch and
//! receive its result, success or error alike.
//!
//! A falsy token (missing, null, empty string, `false`, `0`) is a protocol
//! error: every waiter is rejected with [`Error::EmptyToken`] and nothing is
//! cached, so the next caller starts a fresh fetch.

use crate::correlator::RequestCorrelator;
use crate::metrics::ClientMetrics;
use entsync_core::{Error, Logger, Result, Verb};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default token endpoint
pub const DEFAULT_TOKEN_PATH: &str = "/csrfToken";

/// Default name of the token field in bodies
pub const DEFAULT_TOKEN_FIELD: &str = "_csrf";

type TokenFetch = Shared<BoxFuture<'static, Result<String>>>;

#[derive(Default)]
struct TokenState {
    token: Option<String>,
    inflight: Option<TokenFetch>,
}

struct Inner {
    correlator: RequestCorrelator,
    path: String,
    field: String,
    state: Mutex<TokenState>,
    log: Logger,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight marker however the fetch ends.
struct InflightReset<'a>(&'a Inner);

impl Drop for InflightReset<'_> {
    fn drop(&mut self) {
        self.0.state().inflight = None;
    }
}

#[derive(Clone)]
pub struct TokenGuard {
    inner: Arc<Inner>,
}

impl TokenGuard {
    pub fn new(
        correlator: RequestCorrelator,
        path: impl Into<String>,
        field: impl Into<String>,
        log: Logger,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                correlator,
                path: path.into(),
                field: field.into(),
                state: Mutex::new(TokenState::default()),
                log,
                metrics,
            }),
        }
    }

    /// Name of the body field the token is sent in
    pub fn field(&self) -> &str {
        &self.inner.field
    }

    /// Cached token, if any
    pub fn token(&self) -> Option<String> {
        self.inner.state().token.clone()
    }

    /// Whether a fetch is currently running
    pub fn is_fetching(&self) -> bool {
        self.inner.state().inflight.is_some()
    }

    /// Forget the cached token; the next `ensure_token` fetches again
    pub fn invalidate(&self) {
        if self.inner.state().token.take().is_some() {
            self.inner.log.debug("token invalidated");
        }
    }

    /// Return the cached token or fetch one
    ///
    /// With `force`, the cache is bypassed, but a fetch already in flight is
    /// still shared.
    pub async fn ensure_token(&self, force: bool) -> Result<String> {
        let fetch = {
            let mut state = self.inner.state();
            if !force {
                if let Some(token) = &state.token {
                    return Ok(token.clone());
                }
            }
            match &state.inflight {
                Some(fetch) => fetch.clone(),
                None => {
                    state.token = None;
                    let fetch = Self::fetch(self.inner.clone()).boxed().shared();
                    state.inflight = Some(fetch.clone());
                    fetch
                }
            }
        };
        fetch.await
    }

    async fn fetch(inner: Arc<Inner>) -> Result<String> {
        let _reset = InflightReset(&inner);
        inner.log.debug(format_args!("fetching token from {}", inner.path));

        let outcome = inner
            .correlator
            .call(Verb::Get, &inner.path, Value::Object(Map::new()))
            .await
            .and_then(|body| token_from(&body, &inner.field));

        if let Some(metrics) = &inner.metrics {
            metrics.record_token_fetch(if outcome.is_ok() { "success" } else { "error" });
        }

        match &outcome {
            Ok(token) => inner.state().token = Some(token.clone()),
            Err(err) => {
                inner.state().token = None;
                inner.log.warn(format_args!("token fetch failed: {}", err));
            }
        }
        outcome
    }

    /// Insert the cached token into `data`
    ///
    /// Fails with [`Error::TokenMissing`] right away when no token has been
    /// fetched. `data` must be an object or null.
    pub fn attach(&self, data: Value) -> Result<Value> {
        let token = self.token().ok_or(Error::TokenMissing)?;
        with_field(data, &self.inner.field, token)
    }

    /// Make sure a token exists, then insert it into `data`
    ///
    /// Inserts the token this call obtained, so an invalidation racing with
    /// the call cannot strip it.
    pub async fn attach_fresh(&self, data: Value) -> Result<Value> {
        let token = self.ensure_token(false).await?;
        with_field(data, &self.inner.field, token)
    }
}

fn token_from(body: &Value, field: &str) -> Result<String> {
    match body.get(field) {
        Some(Value::String(token)) if !token.is_empty() => Ok(token.clone()),
        Some(Value::Number(n)) if n.as_f64().map(|f| f != 0.0).unwrap_or(false) => {
            Ok(n.to_string())
        }
        _ => Err(Error::EmptyToken),
    }
}

fn with_field(data: Value, field: &str, token: String) -> Result<Value> {
    let mut body = match data {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(Error::InvalidRequest(format!(
                "cannot attach a token to {}",
                other
            )))
        }
    };
    body.insert(field.to_string(), Value::String(token));
    Ok(Value::Object(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_from_body() {
        assert_eq!(token_from(&json!({"_csrf": "abc"}), "_csrf").unwrap(), "abc");
        assert_eq!(token_from(&json!({"_csrf": 42}), "_csrf").unwrap(), "42");
        for falsy in [json!({"_csrf": ""}), json!({"_csrf": null}), json!({"_csrf": false}), json!({"_csrf": 0}), json!({})] {
            assert!(matches!(token_from(&falsy, "_csrf"), Err(Error::EmptyToken)));
        }
    }

    #[test]
    fn test_with_field() {
        let body = with_field(json!({"name": "x"}), "_csrf", "t".into()).unwrap();
        assert_eq!(body, json!({"name": "x", "_csrf": "t"}));
        assert_eq!(
            with_field(Value::Null, "token", "t".into()).unwrap(),
            json!({"token": "t"})
        );
        assert!(matches!(
            with_field(json!([1]), "_csrf", "t".into()),
            Err(Error::InvalidRequest(_))
        ));
    }
}
