//! In-process connection pair.
//!
//! Two endpoints joined by unbounded queues. Useful for tests and for
//! embedding two protocol stacks in one process.
//!
//! # Example
//!
//! ```
//! use strand::protocol::Protocol;
//! use strand::session::Session;
//! use strand::transport::memory;
//!
//! # async fn run() -> Result<(), strand::core::SessionError> {
//! let protocol = Protocol::builder().build();
//! let ((conn_a, source_a), (conn_b, source_b)) = memory::pair();
//!
//! let a = Session::new(protocol.clone());
//! let b = Session::new(protocol);
//! a.open(std::sync::Arc::new(conn_a))?;
//! b.open(std::sync::Arc::new(conn_b))?;
//! tokio::spawn(strand::transport::drive(a.clone(), source_a));
//! tokio::spawn(strand::transport::drive(b.clone(), source_b));
//!
//! a.close("done");
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::connection::{FrameSource, UnderlyingConnection, WireFrame, WriteHandle};
use crate::core::{TransportError, TransportResult};

#[derive(Debug)]
enum Event {
    Frame(WireFrame),
    Closed,
}

/// Write side of one in-memory endpoint.
#[derive(Debug)]
pub struct MemoryConnection {
    to_peer: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    to_self: mpsc::UnboundedSender<Event>,
    closed: AtomicBool,
}

/// Read side of one in-memory endpoint.
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Event>,
    done: bool,
}

/// Create two connected endpoints.
pub fn pair() -> ((MemoryConnection, MemorySource), (MemoryConnection, MemorySource)) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();

    let a = MemoryConnection {
        to_peer: Mutex::new(Some(tx_b.clone())),
        to_self: tx_a.clone(),
        closed: AtomicBool::new(false),
    };
    let b = MemoryConnection {
        to_peer: Mutex::new(Some(tx_a)),
        to_self: tx_b,
        closed: AtomicBool::new(false),
    };

    (
        (a, MemorySource { rx: rx_a, done: false }),
        (b, MemorySource { rx: rx_b, done: false }),
    )
}

impl UnderlyingConnection for MemoryConnection {
    fn send(&self, frame: WireFrame) -> TransportResult<WriteHandle> {
        let to_peer = self.to_peer.lock();
        let tx = to_peer.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(Event::Frame(frame))
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(WriteHandle::ready(Ok(())))
    }

    fn disconnect(&self, reason: &str) {
        let Some(tx) = self.to_peer.lock().take() else {
            return;
        };
        trace!(reason, "memory connection closing");
        self.closed.store(true, Ordering::Release);
        // Queued behind every frame already sent, on both sides.
        let _ = tx.send(Event::Closed);
        let _ = self.to_self.send(Event::Closed);
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.to_self.is_closed()
    }
}

impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Option<TransportResult<WireFrame>> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(Event::Frame(frame)) => Some(Ok(frame)),
            Some(Event::Closed) | None => {
                self.done = true;
                None
            }
        }
    }
}
