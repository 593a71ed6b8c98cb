//! # Stream Manager Seam (RFC 9000 Section 2, 3)
//!
//! Stream multiplexing and reassembly live outside this crate. The
//! connection core needs three things from the stream manager: STREAM
//! frames to send (as a [`FrameSource`], bounded by connection-level
//! credit), consumption of inbound stream-scope frames (as a
//! [`FrameHandler`]), and the aggregate byte counters the connection-level
//! flow controllers are reconciled against.

use crate::frames::{FrameHandler, FrameSource};
use crate::handshake::TransportParameters;

/// The stream-manager surface the connection core consumes.
pub trait StreamManager: FrameSource + FrameHandler + Send {
    /// Install stream-level flow control once transport parameters are
    /// known (handshake completion or 0-RTT start).
    fn init_flow_control_params(&mut self, local_tp: &TransportParameters, remote_tp: &TransportParameters);

    /// Aggregate bytes received across all streams, reordered or not.
    /// The local connection window is checked against this.
    fn total_offset_received(&self) -> u64;

    /// Aggregate bytes sent across all streams. The remote connection
    /// window advances to this after each STREAM frame.
    fn total_offset_sent(&self) -> u64;

    /// Bytes delivered in order to applications; the local limit is
    /// forwarded to this plus the flow-control buffer size.
    fn total_reordered_bytes(&self) -> u64;
}
