//! Connection session integration tests
//!
//! State transitions, shared reconnect attempts and teardown.

mod common;

use common::{wait_until, MockChannel, Session};
use entsync_client::{Channel, ConnectionEvent, ConnectionState};
use entsync_core::Error;
use std::time::Duration;

#[tokio::test]
async fn test_start_connects_and_initializes() {
    common::init_tracing();
    let session = Session::new(MockChannel::new());
    let mut events = session.connection.subscribe();
    assert_eq!(session.connection.state(), ConnectionState::Uninitialized);
    assert!(!session.connection.is_initialized());

    let session = session.connected().await;
    assert!(session.connection.is_initialized());
    assert_eq!(session.channel.connects(), 1);

    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Initialized);
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);

    assert!(!session.connection.start());
}

#[tokio::test]
async fn test_connected_channel_starts_loading() {
    let session = Session::new(MockChannel::new());
    let channel = tokio::time::timeout(Duration::from_secs(2), session.connection.connected_channel())
        .await
        .unwrap()
        .unwrap();
    assert!(channel.is_connected());
    assert_eq!(session.connection.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_drop_moves_to_disconnected() {
    let session = Session::new(MockChannel::new()).connected().await;
    let mut events = session.connection.subscribe();

    session.channel.drop_connection();
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
    assert_eq!(session.connection.state(), ConnectionState::Disconnected);
    assert_eq!(session.channel.reconnects(), 0);
}

#[tokio::test]
async fn test_concurrent_waiters_share_one_reconnect() {
    let channel = MockChannel::new();
    let session = Session::new(channel.clone()).connected().await;
    channel.set_connect_delay(Duration::from_millis(30));

    let connection = session.connection.clone();
    channel.drop_connection();
    assert!(wait_until(|| connection.state() == ConnectionState::Disconnected).await);

    let (a, b, c) = tokio::join!(
        session.connection.connected_channel(),
        session.connection.connected_channel(),
        session.connection.connected_channel(),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(channel.reconnects(), 1);
    assert_eq!(session.connection.reconnect_attempts(), 1);
    assert_eq!(session.connection.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_reconnect_not_requested_while_connected() {
    let session = Session::new(MockChannel::new()).connected().await;
    assert!(!session.connection.request_reconnect());
    assert_eq!(session.channel.reconnects(), 0);
}

#[tokio::test]
async fn test_waiters_retry_after_failed_attempt() {
    let channel = MockChannel::new();
    let session = Session::new(channel.clone()).connected().await;

    channel.refuse_connections(true);
    channel.drop_connection();
    let connection = session.connection.clone();
    assert!(wait_until(|| connection.state() == ConnectionState::Disconnected).await);

    let waiter = tokio::spawn({
        let connection = session.connection.clone();
        async move { connection.connected_channel().await.map(|_| ()) }
    });

    assert!(wait_until(|| channel.reconnects() >= 2).await);
    channel.refuse_connections(false);

    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(session.connection.is_connected());
}

#[tokio::test]
async fn test_destroy_resolves_waiters() {
    let channel = MockChannel::new();
    channel.set_connect_delay(Duration::from_secs(60));
    let session = Session::new(channel.clone());

    let waiter = tokio::spawn({
        let connection = session.connection.clone();
        async move { connection.connected_channel().await.map(|_| ()) }
    });
    assert!(wait_until(|| channel.is_connecting()).await);

    let mut events = session.connection.subscribe();
    session.connection.destroy().await;

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Destroyed)));
    assert_eq!(session.connection.state(), ConnectionState::Destroyed);
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Destroyed);
    assert_eq!(channel.disconnects(), 1);

    assert!(matches!(
        session.connection.connected_channel().await,
        Err(Error::Destroyed)
    ));
}

#[tokio::test]
async fn test_destroy_twice_is_harmless() {
    let session = Session::new(MockChannel::new()).connected().await;
    session.connection.destroy().await;
    session.connection.destroy().await;
    assert_eq!(session.channel.disconnects(), 1);
    assert!(session.connection.is_destroyed());
}

#[tokio::test]
async fn test_with_connected_channel() {
    let session = Session::new(MockChannel::new());
    let connected = session
        .connection
        .with_connected_channel(|channel| async move { Ok(channel.is_connected()) })
        .await
        .unwrap();
    assert!(connected);
}

#[tokio::test]
async fn test_with_connected_channel_after_destroy_skips_callback() {
    let session = Session::new(MockChannel::new()).connected().await;
    session.connection.destroy().await;

    let invoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = invoked.clone();
    let result = session
        .connection
        .with_connected_channel(move |_| async move {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(Error::Destroyed)));
    assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
}
