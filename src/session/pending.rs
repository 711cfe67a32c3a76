//! Pending reply handles.
//!
//! An application that sends a request and expects a correlated answer
//! registers a waiter here and awaits its [`ReplyHandle`]. Whoever sees the
//! answer resolves the waiter by id. Closing the session fails every waiter
//! that is still outstanding.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::core::{Packet, SessionError};

/// Outcome delivered to a [`ReplyHandle`].
pub type ReplyResult = Result<Box<dyn Packet>, SessionError>;

/// Waiters owned by one session, keyed by a per-session id.
#[derive(Debug, Default)]
pub struct PendingReplies {
    next_id: u64,
    waiters: HashMap<u64, oneshot::Sender<ReplyResult>>,
}

impl PendingReplies {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new waiter.
    pub fn create(&mut self) -> (u64, ReplyHandle) {
        self.next_id += 1;
        let id = self.next_id;
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        (id, ReplyHandle { id, rx })
    }

    /// Complete a waiter with a packet.
    ///
    /// Returns `false` if no such waiter is outstanding.
    pub fn resolve(&mut self, id: u64, packet: Box<dyn Packet>) -> bool {
        self.complete(id, Ok(packet))
    }

    /// Fail a waiter.
    ///
    /// Returns `false` if no such waiter is outstanding.
    pub fn reject(&mut self, id: u64, error: SessionError) -> bool {
        self.complete(id, Err(error))
    }

    /// Fail every outstanding waiter. Returns how many there were.
    pub fn fail_all(&mut self, error: &SessionError) -> usize {
        let count = self.waiters.len();
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    /// Number of outstanding waiters.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Check if no waiter is outstanding.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    fn complete(&mut self, id: u64, result: ReplyResult) -> bool {
        match self.waiters.remove(&id) {
            // The handle may already be dropped; the waiter still counts as
            // resolved.
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

/// Future resolving to the reply of one pending request.
///
/// No timeout is applied; wrap it in `tokio::time::timeout` when needed.
#[derive(Debug)]
pub struct ReplyHandle {
    id: u64,
    rx: oneshot::Receiver<ReplyResult>,
}

impl ReplyHandle {
    /// Id to resolve this handle with.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for ReplyHandle {
    type Output = ReplyResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SessionError::ReplyDropped)))
    }
}
