//! The per-connection inbound loop.

use tracing::{debug, trace};

use super::connection::FrameSource;
use crate::session::{Session, SessionState};

/// Feed every frame from `source` to `session` until the connection ends.
///
/// This is the serialization point of one connection: the session sees its
/// frames one at a time, in arrival order. The loop ends when the source is
/// exhausted (reported as [`Session::on_transport_closed`]), when it fails
/// (reported as [`Session::on_transport_error`]) or when frame processing
/// left the session closed.
pub async fn drive<S: FrameSource>(session: Session, mut source: S) {
    trace!(session = %session.id(), "driver started");
    loop {
        match source.next_frame().await {
            Some(Ok(frame)) => {
                session.on_frame_received(frame);
                if session.state() == SessionState::Closed {
                    break;
                }
            }
            Some(Err(err)) => {
                session.on_transport_error(err);
                break;
            }
            None => {
                session.on_transport_closed();
                break;
            }
        }
    }
    debug!(session = %session.id(), "driver finished");
}
