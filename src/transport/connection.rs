//! Connection-side contracts of the adapter.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::core::{Channel, Delivery, Reliability, TransportError, TransportResult};

/// The unit exchanged with a transport binding.
///
/// Channel and reliability travel in the binding's own framing; the payload
/// is one logical frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    /// Logical channel.
    pub channel: Channel,
    /// Delivery class.
    pub reliability: Reliability,
    /// Logical frame bytes.
    pub payload: Vec<u8>,
}

impl WireFrame {
    /// Create a frame.
    pub fn new(delivery: Delivery, payload: Vec<u8>) -> Self {
        Self {
            channel: delivery.channel,
            reliability: delivery.reliability,
            payload,
        }
    }

    /// Channel and reliability of this frame.
    pub fn delivery(&self) -> Delivery {
        Delivery::new(self.channel, self.reliability)
    }
}

/// Write side of one physical connection.
///
/// Implementations must keep frames in submission order and must never
/// interleave two frames.
pub trait UnderlyingConnection: Send + Sync + fmt::Debug {
    /// Queue a frame for writing.
    ///
    /// Fails with [`TransportError::ConnectionClosed`] when the connection is
    /// no longer writable.
    fn send(&self, frame: WireFrame) -> TransportResult<WriteHandle>;

    /// Request teardown after every frame queued so far.
    ///
    /// Calling it again is a no-op.
    fn disconnect(&self, reason: &str);

    /// Check if frames can still be queued.
    fn is_connected(&self) -> bool;

    /// Address of the remote endpoint, if the binding has one.
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Read side of one physical connection.
pub trait FrameSource: Send {
    /// Wait for the next frame.
    ///
    /// Returns `None` once the connection is closed, either by the peer or
    /// by a local [`UnderlyingConnection::disconnect`].
    fn next_frame(&mut self) -> impl Future<Output = Option<TransportResult<WireFrame>>> + Send;
}

/// Completion of one queued write.
#[derive(Debug)]
pub struct WriteHandle {
    state: WriteState,
}

#[derive(Debug)]
enum WriteState {
    Pending(oneshot::Receiver<TransportResult<()>>),
    Ready(Option<TransportResult<()>>),
}

impl WriteHandle {
    /// Create a handle and the sender that completes it.
    pub fn pending() -> (oneshot::Sender<TransportResult<()>>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                state: WriteState::Pending(rx),
            },
        )
    }

    /// Create an already completed handle.
    pub fn ready(result: TransportResult<()>) -> Self {
        Self {
            state: WriteState::Ready(Some(result)),
        }
    }
}

impl Future for WriteHandle {
    type Output = TransportResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            // A dropped completer means the writer died with the frame queued.
            WriteState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(TransportError::WriterGone))),
            WriteState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(TransportError::WriterGone)))
            }
        }
    }
}

/// Completion of every write produced by one send.
///
/// A fragmented message is several writes; the handle resolves when the last
/// one completes, or with the first failure.
#[derive(Debug, Default)]
pub struct SendHandle {
    writes: VecDeque<WriteHandle>,
    frames: usize,
}

impl SendHandle {
    /// Create a handle with no writes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track another write.
    pub fn push(&mut self, write: WriteHandle) {
        self.frames += 1;
        self.writes.push_back(write);
    }

    /// Merge the writes of another handle, keeping order.
    pub fn append(&mut self, mut other: SendHandle) {
        self.frames += other.frames;
        self.writes.append(&mut other.writes);
    }

    /// Number of transport frames this send produced.
    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl Future for SendHandle {
    type Output = TransportResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        while let Some(write) = self.writes.front_mut() {
            match Pin::new(write).poll(cx) {
                Poll::Ready(Ok(())) => {
                    self.writes.pop_front();
                }
                Poll::Ready(Err(err)) => {
                    self.writes.clear();
                    return Poll::Ready(Err(err));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_handle_ready() {
        assert!(WriteHandle::ready(Ok(())).await.is_ok());
        assert!(matches!(
            WriteHandle::ready(Err(TransportError::ConnectionClosed)).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_handle_pending() {
        let (tx, handle) = WriteHandle::pending();
        tx.send(Ok(())).unwrap();
        assert!(handle.await.is_ok());

        let (tx, handle) = WriteHandle::pending();
        drop(tx);
        assert!(matches!(handle.await, Err(TransportError::WriterGone)));
    }

    #[tokio::test]
    async fn test_send_handle_first_failure_wins() {
        let mut handle = SendHandle::new();
        handle.push(WriteHandle::ready(Ok(())));
        handle.push(WriteHandle::ready(Err(TransportError::ConnectionClosed)));
        handle.push(WriteHandle::ready(Err(TransportError::WriterGone)));
        assert_eq!(handle.frames(), 3);
        assert!(matches!(handle.await, Err(TransportError::ConnectionClosed)));

        assert!(SendHandle::new().await.is_ok());
    }

    #[test]
    fn test_wire_frame_delivery() {
        let delivery = Delivery::new(Channel::new(3), Reliability::Reliable);
        let frame = WireFrame::new(delivery, vec![1]);
        assert_eq!(frame.delivery(), delivery);
    }
}
