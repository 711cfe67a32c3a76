//! STRAND Protocol - Encapsulation Layer
//!
//! Makes two orthogonal concerns transparent to application code:
//!
//! - **Fragmentation**: a single-packet frame larger than the configured
//!   threshold is split into [`FragmentChunk`]s by a [`Fragmenter`] and put back
//!   together by a per-session [`Reassembler`].
//! - **Batching**: several single-packet frames travel as one [`Batch`]
//!   envelope, decoded all-or-nothing on the receiving side.
//!
//! Both envelopes are ordinary packets registered under reserved ids, so they
//! compose: an oversized batch is fragmented like any other frame.

mod batch;
mod fragment;

pub use batch::*;
pub use fragment::*;
