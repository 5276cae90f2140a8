//! Pending request table for the WebSocket channel
//!
//! Each outbound frame gets a numeric id and a oneshot sender parked here.
//! The receive loop completes the entry when a response frame with the same
//! id arrives; a dropped connection fails every entry at once. Timeouts are
//! not handled here: the correlator races the receiver against
//! `tokio::time::timeout`.

use entsync_core::{Error, RawResponse, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

type Waiter = oneshot::Sender<Result<RawResponse>>;

#[derive(Clone, Default)]
pub struct PendingRequests {
    waiters: Arc<Mutex<HashMap<u64, Waiter>>>,
    counter: Arc<AtomicU64>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<u64, Waiter>> {
        self.waiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Next frame id, starting at 1
    pub fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Park a waiter for `id`
    pub fn register(&self, id: u64) -> oneshot::Receiver<Result<RawResponse>> {
        let (tx, rx) = oneshot::channel();
        self.waiters().insert(id, tx);
        rx
    }

    /// Deliver a response; returns false when nobody waits for `id`
    pub fn complete(&self, id: u64, response: RawResponse) -> bool {
        match self.waiters().remove(&id) {
            Some(tx) => tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    pub fn fail(&self, id: u64, error: Error) {
        if let Some(tx) = self.waiters().remove(&id) {
            let _ = tx.send(Err(error));
        }
    }

    /// Fail every parked waiter; returns how many there were
    pub fn fail_all(&self, error: Error) -> usize {
        let drained: Vec<Waiter> = self.waiters().drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    /// Drop the waiter for `id` without answering it
    pub fn forget(&self, id: u64) {
        self.waiters().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.waiters().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
