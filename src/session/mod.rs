//! STRAND Protocol - Session
//!
//! One logical endpoint-to-endpoint connection:
//!
//! - **Lifecycle**: [`SessionState`] moves `Connecting → Open → Closing →
//!   Closed` and never leaves `Closed`.
//! - **Inbound dispatch**: frames from the driver run through the inbound
//!   pipeline, then reassembly, batch unpacking and the Disconnect Protocol,
//!   then the handler bound to the packet id.
//! - **Outbound**: packets are encoded, fragmented over the threshold, run
//!   through the outbound pipeline and queued on the connection.
//! - **Pending replies**: [`ReplyHandle`]s owned by the session, all
//!   resolved before it reaches `Closed`.

mod disconnect;
mod inbound;
mod outbound;
mod pending;
#[allow(clippy::module_inception)]
mod session;

pub use disconnect::*;
pub use pending::*;
pub use session::*;
