//! TCP binding.
//!
//! Frames are length-prefixed on the stream:
//! ```text
//! +0  Length      (4 bytes BE32, counts everything after this field)
//! +4  Channel     (4 bytes BE32, signed, -1 = default)
//! +8  Reliability (1 byte)
//! +9  Payload     (Length - 5 bytes)
//! ```
//!
//! A dedicated writer task owns the write half. Every [`TcpConnection::send`]
//! queues a command, so concurrent senders never interleave bytes and a
//! disconnect request is processed only after the frames queued before it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{debug, trace};

use super::connection::{FrameSource, UnderlyingConnection, WireFrame, WriteHandle};
use crate::core::{
    Channel, DEFAULT_MAX_FRAME_SIZE, Reliability, TransportError, TransportResult,
    WIRE_FRAME_HEADER_SIZE,
};

enum Command {
    Frame(WireFrame, oneshot::Sender<TransportResult<()>>),
    Shutdown,
}

/// Write side of a TCP connection.
#[derive(Debug)]
pub struct TcpConnection {
    commands: mpsc::UnboundedSender<Command>,
    closing: AtomicBool,
    writer_alive: Arc<AtomicBool>,
    remote_addr: Option<SocketAddr>,
    max_frame_size: usize,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Frame(frame, _) => write!(f, "Frame({} bytes)", frame.payload.len()),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Signals from the writer task to the read side.
#[derive(Debug, Default)]
struct WriterExit {
    closed: Notify,
    error: Mutex<Option<TransportError>>,
}

/// Read side of a TCP connection.
#[derive(Debug)]
pub struct TcpSource {
    reader: BufReader<OwnedReadHalf>,
    exit: Arc<WriterExit>,
    max_frame_size: usize,
    done: bool,
}

impl TcpConnection {
    /// Split a stream into its write and read sides with default limits.
    ///
    /// Spawns the writer task, so it must be called within a tokio runtime.
    pub fn split(stream: TcpStream) -> (TcpConnection, TcpSource) {
        Self::split_with_limit(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Split a stream, refusing frames above `max_frame_size` in both
    /// directions.
    pub fn split_with_limit(stream: TcpStream, max_frame_size: usize) -> (TcpConnection, TcpSource) {
        let remote_addr = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (commands, rx) = mpsc::unbounded_channel();
        let exit = Arc::new(WriterExit::default());
        let writer_alive = Arc::new(AtomicBool::new(true));
        tokio::spawn(write_loop(
            write_half,
            rx,
            Arc::clone(&exit),
            Arc::clone(&writer_alive),
        ));

        let connection = TcpConnection {
            commands,
            closing: AtomicBool::new(false),
            writer_alive,
            remote_addr,
            max_frame_size,
        };
        let source = TcpSource {
            reader: BufReader::new(read_half),
            exit,
            max_frame_size,
            done: false,
        };
        (connection, source)
    }

    /// Largest frame this connection accepts.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl UnderlyingConnection for TcpConnection {
    fn send(&self, frame: WireFrame) -> TransportResult<WriteHandle> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        let size = WIRE_FRAME_HEADER_SIZE + frame.payload.len();
        if size > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }

        let (done, handle) = WriteHandle::pending();
        self.commands
            .send(Command::Frame(frame, done))
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(handle)
    }

    fn disconnect(&self, reason: &str) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(remote = ?self.remote_addr, reason, "tcp connection closing");
        let _ = self.commands.send(Command::Shutdown);
    }

    fn is_connected(&self) -> bool {
        !self.closing.load(Ordering::Acquire) && self.writer_alive.load(Ordering::Acquire)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut commands: mpsc::UnboundedReceiver<Command>,
    exit: Arc<WriterExit>,
    writer_alive: Arc<AtomicBool>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Frame(frame, done) => {
                let result = write_frame(&mut writer, &frame).await;
                if let Err(err) = &result {
                    debug!(error = %err, "tcp write failed");
                    *exit.error.lock() = Some(err.clone());
                }
                let failed = result.is_err();
                let _ = done.send(result);
                if failed {
                    break;
                }
            }
            Command::Shutdown => break,
        }
    }

    writer_alive.store(false, Ordering::Release);
    // Frames queued after the shutdown are dropped, failing their handles.
    commands.close();
    if let Err(err) = writer.shutdown().await {
        trace!(error = %err, "tcp shutdown failed");
    }
    exit.closed.notify_one();
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &WireFrame) -> TransportResult<()> {
    let len = (WIRE_FRAME_HEADER_SIZE + frame.payload.len()) as u32;
    let mut buf = Vec::with_capacity(4 + len as usize);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&frame.channel.raw().to_be_bytes());
    buf.push(frame.reliability.as_byte());
    buf.extend_from_slice(&frame.payload);
    writer.write_all(&buf).await?;
    Ok(())
}

impl TcpSource {
    async fn read_frame(&mut self) -> TransportResult<Option<WireFrame>> {
        let len = match self.reader.read_u32().await {
            Ok(len) => len as usize,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if len < WIRE_FRAME_HEADER_SIZE {
            return Err(TransportError::InvalidFrame(format!(
                "frame length {len} shorter than header"
            )));
        }
        if len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: len,
                limit: self.max_frame_size,
            });
        }

        let raw_channel = self.reader.read_i32().await?;
        let channel = Channel::from_raw(raw_channel)
            .ok_or_else(|| TransportError::InvalidFrame(format!("invalid channel {raw_channel}")))?;
        let raw_reliability = self.reader.read_u8().await?;
        let reliability = Reliability::from_byte(raw_reliability).ok_or_else(|| {
            TransportError::InvalidFrame(format!("invalid reliability {raw_reliability}"))
        })?;

        let mut payload = vec![0u8; len - WIRE_FRAME_HEADER_SIZE];
        self.reader.read_exact(&mut payload).await?;
        Ok(Some(WireFrame {
            channel,
            reliability,
            payload,
        }))
    }
}

impl FrameSource for TcpSource {
    async fn next_frame(&mut self) -> Option<TransportResult<WireFrame>> {
        if self.done {
            return None;
        }
        // A failed write ends the connection with that error rather than a
        // clean close.
        let exit = Arc::clone(&self.exit);
        let result = tokio::select! {
            biased;
            _ = exit.closed.notified() => {
                let error = exit.error.lock().take();
                error.map_or(Ok(None), Err)
            }
            frame = self.read_frame() => frame,
        };
        match result {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
