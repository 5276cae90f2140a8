//! Security token integration tests

mod common;

use common::{MockChannel, Reply, Session};
use entsync_core::{Error, RawResponse};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn token_channel(token: serde_json::Value) -> (MockChannel, Arc<AtomicUsize>) {
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = fetches.clone();
    let channel = MockChannel::new();
    channel.respond_with(move |_, url, _| match url {
        "/csrfToken" => {
            counter.fetch_add(1, Ordering::SeqCst);
            Reply::After(Duration::from_millis(20), RawResponse::ok(json!({"_csrf": token})))
        }
        _ => Reply::ok(json!({})),
    });
    (channel, fetches)
}

#[tokio::test]
async fn test_concurrent_callers_share_one_fetch() {
    let (channel, fetches) = token_channel(json!("t1"));
    let session = Session::new(channel).connected().await;
    let token = session.token();

    let (a, b) = tokio::join!(token.ensure_token(false), token.ensure_token(false));
    assert_eq!(a.unwrap(), "t1");
    assert_eq!(b.unwrap(), "t1");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(token.token().as_deref(), Some("t1"));
    assert!(!token.is_fetching());

    token.ensure_token(false).await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_force_refetches() {
    let (channel, fetches) = token_channel(json!("t1"));
    let session = Session::new(channel).connected().await;
    let token = session.token();

    token.ensure_token(false).await.unwrap();
    token.ensure_token(true).await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_token_rejects_every_waiter() {
    let (channel, fetches) = token_channel(json!(""));
    let session = Session::new(channel).connected().await;
    let token = session.token();

    let (a, b) = tokio::join!(token.ensure_token(false), token.ensure_token(false));
    assert!(matches!(a, Err(Error::EmptyToken)));
    assert!(matches!(b, Err(Error::EmptyToken)));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert!(token.token().is_none());

    // Nothing was cached, so the next caller fetches again.
    assert!(token.ensure_token(false).await.is_err());
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_attach_requires_a_fetched_token() {
    let (channel, _) = token_channel(json!("t1"));
    let session = Session::new(channel).connected().await;
    let token = session.token();

    assert!(matches!(token.attach(json!({"a": 1})), Err(Error::TokenMissing)));

    token.ensure_token(false).await.unwrap();
    assert_eq!(
        token.attach(json!({"a": 1})).unwrap(),
        json!({"a": 1, "_csrf": "t1"})
    );
}

#[tokio::test]
async fn test_attach_fresh_fetches_once() {
    let (channel, fetches) = token_channel(json!("t1"));
    let session = Session::new(channel).connected().await;
    let token = session.token();

    let data = token.attach_fresh(json!({"name": "gear"})).await.unwrap();
    assert_eq!(data, json!({"name": "gear", "_csrf": "t1"}));
    token.attach_fresh(json!(null)).await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalidate_forces_a_new_fetch() {
    let (channel, fetches) = token_channel(json!("t1"));
    let session = Session::new(channel).connected().await;
    let token = session.token();

    token.ensure_token(false).await.unwrap();
    token.invalidate();
    assert!(token.token().is_none());
    token.ensure_token(false).await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_server_error_is_propagated() {
    let channel = MockChannel::new();
    channel.respond_with(|_, _, _| Reply::status(403, json!({"message": "forbidden"})));
    let session = Session::new(channel).connected().await;
    let token = session.token();

    assert!(matches!(
        token.ensure_token(false).await,
        Err(Error::Server { status: 403, .. })
    ));
    assert!(!token.is_fetching());
}
