//! # Connection-Level Flow Control (RFC 9000 Section 4)
//!
//! Two byte-count windows at connection scope: the local controller bounds
//! what the peer may send us (and advertises MAX_DATA), the remote
//! controller bounds what we may send (and announces BLOCKED when starved).
//! Both maintain `current_offset <= limit` at every observable point, and
//! limits only move forward.

use crate::error::{ConnectionError, Result, TransErrorCode};
use crate::frames::{BlockedFrame, Frame, FrameSource, MaxDataFrame};
use crate::types::EncryptionLevel;
use tracing::debug;

/// Shared window arithmetic.
#[derive(Debug, Clone, Copy)]
struct Window {
    offset: u64,
    limit: u64,
}

impl Window {
    fn new(limit: u64) -> Self {
        Self { offset: 0, limit }
    }

    /// Advance the offset cursor. Fails if the limit would be exceeded;
    /// the offset is only ever moved forward.
    fn update(&mut self, offset: u64) -> core::result::Result<(), ()> {
        if offset > self.limit {
            return Err(());
        }
        if offset > self.offset {
            self.offset = offset;
        }
        Ok(())
    }

    /// Raise the limit. Shrinking is ignored; limits are monotonic.
    fn forward_limit(&mut self, limit: u64) -> bool {
        if limit > self.limit {
            self.limit = limit;
            return true;
        }
        false
    }
}

/// Window over bytes the peer sends us.
///
/// Violations are the peer's fault: exceeding the advertised limit is a
/// FLOW_CONTROL_ERROR.
#[derive(Debug)]
pub struct LocalFlowController {
    window: Window,
    /// A limit increase not yet advertised in a MAX_DATA frame.
    announce_pending: bool,
}

impl LocalFlowController {
    pub fn new(limit: u64) -> Self {
        Self {
            window: Window::new(limit),
            announce_pending: false,
        }
    }

    pub fn current_offset(&self) -> u64 {
        self.window.offset
    }

    pub fn current_limit(&self) -> u64 {
        self.window.limit
    }

    /// Record the stream manager's aggregate received offset.
    pub fn update(&mut self, offset: u64) -> Result<()> {
        self.window.update(offset).map_err(|_| {
            ConnectionError::transport(TransErrorCode::FlowControlError)
        })?;
        debug!(target: "quic::fc", side = "local", offset = self.window.offset, limit = self.window.limit);
        Ok(())
    }

    /// Raise the advertised limit; a MAX_DATA frame becomes pending.
    pub fn forward_limit(&mut self, limit: u64) {
        if self.window.forward_limit(limit) {
            self.announce_pending = true;
            debug!(target: "quic::fc", side = "local", offset = self.window.offset, limit = self.window.limit);
        }
    }

    /// Reset both cursor and limit at handshake completion, once transport
    /// parameters are known.
    pub fn set_limit(&mut self, limit: u64) {
        self.window.limit = limit;
    }
}

impl FrameSource for LocalFlowController {
    fn will_generate_frame(&self, level: EncryptionLevel) -> bool {
        level == EncryptionLevel::OneRtt && self.announce_pending
    }

    fn generate_frame(&mut self, level: EncryptionLevel, _credit: u64, max_size: usize) -> Option<Frame> {
        if !self.will_generate_frame(level) {
            return None;
        }
        let frame = Frame::MaxData(MaxDataFrame {
            maximum_data: self.window.limit,
        });
        if crate::frames::codec::encoded_size(&frame) > max_size {
            return None;
        }
        self.announce_pending = false;
        Some(frame)
    }
}

/// Window over bytes we send to the peer.
///
/// The packetizer never exceeds `credit()`, so an update past the limit is
/// a local bookkeeping bug, not a peer violation.
#[derive(Debug)]
pub struct RemoteFlowController {
    window: Window,
    /// Limit value for which a BLOCKED frame was already announced.
    blocked_announced_at: Option<u64>,
}

impl RemoteFlowController {
    pub fn new(limit: u64) -> Self {
        Self {
            window: Window::new(limit),
            blocked_announced_at: None,
        }
    }

    pub fn current_offset(&self) -> u64 {
        self.window.offset
    }

    pub fn current_limit(&self) -> u64 {
        self.window.limit
    }

    /// Bytes we may still send under the peer's limit.
    pub fn credit(&self) -> u64 {
        self.window.limit - self.window.offset
    }

    /// Record the stream manager's aggregate sent offset.
    pub fn update(&mut self, offset: u64) -> Result<()> {
        self.window.update(offset).map_err(|_| {
            ConnectionError::transport(TransErrorCode::InternalError)
                .with_reason("sent past the peer's connection flow control limit")
        })?;
        debug!(target: "quic::fc", side = "remote", offset = self.window.offset, limit = self.window.limit);
        Ok(())
    }

    /// Apply a MAX_DATA frame from the peer.
    pub fn forward_limit(&mut self, limit: u64) {
        if self.window.forward_limit(limit) {
            debug!(target: "quic::fc", side = "remote", offset = self.window.offset, limit = self.window.limit);
        }
    }

    pub fn set_limit(&mut self, limit: u64) {
        self.window.limit = limit;
    }
}

impl FrameSource for RemoteFlowController {
    fn will_generate_frame(&self, level: EncryptionLevel) -> bool {
        level == EncryptionLevel::OneRtt
            && self.credit() == 0
            && self.blocked_announced_at != Some(self.window.limit)
    }

    fn generate_frame(&mut self, level: EncryptionLevel, _credit: u64, max_size: usize) -> Option<Frame> {
        if !self.will_generate_frame(level) {
            return None;
        }
        let frame = Frame::Blocked(BlockedFrame {
            data_limit: self.window.limit,
        });
        if crate::frames::codec::encoded_size(&frame) > max_size {
            return None;
        }
        self.blocked_announced_at = Some(self.window.limit);
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_update_within_limit() {
        let mut fc = LocalFlowController::new(1000);
        fc.update(400).unwrap();
        fc.update(1000).unwrap();
        assert_eq!(fc.current_offset(), 1000);
        assert!(fc.current_offset() <= fc.current_limit());
    }

    #[test]
    fn test_local_update_past_limit_is_flow_control_error() {
        let mut fc = LocalFlowController::new(1000);
        let err = fc.update(1001).unwrap_err();
        assert_eq!(err.code, TransErrorCode::FlowControlError.code());
        // The cursor never moved past the limit.
        assert_eq!(fc.current_offset(), 0);
    }

    #[test]
    fn test_local_offset_never_regresses() {
        let mut fc = LocalFlowController::new(1000);
        fc.update(500).unwrap();
        fc.update(300).unwrap();
        assert_eq!(fc.current_offset(), 500);
    }

    #[test]
    fn test_local_forward_limit_emits_max_data_once() {
        let mut fc = LocalFlowController::new(1000);
        assert!(!fc.will_generate_frame(EncryptionLevel::OneRtt));

        fc.forward_limit(2000);
        assert!(fc.will_generate_frame(EncryptionLevel::OneRtt));
        assert!(!fc.will_generate_frame(EncryptionLevel::Initial));

        let frame = fc.generate_frame(EncryptionLevel::OneRtt, u64::MAX, 1200).unwrap();
        assert_eq!(frame, Frame::MaxData(MaxDataFrame { maximum_data: 2000 }));
        assert!(fc.generate_frame(EncryptionLevel::OneRtt, u64::MAX, 1200).is_none());
    }

    #[test]
    fn test_local_limit_is_monotonic() {
        let mut fc = LocalFlowController::new(1000);
        fc.forward_limit(500);
        assert_eq!(fc.current_limit(), 1000);
    }

    #[test]
    fn test_remote_credit_tracks_offset() {
        let mut fc = RemoteFlowController::new(100);
        assert_eq!(fc.credit(), 100);
        fc.update(60).unwrap();
        assert_eq!(fc.credit(), 40);
        fc.forward_limit(200);
        assert_eq!(fc.credit(), 140);
    }

    #[test]
    fn test_remote_blocked_announced_once_per_limit() {
        let mut fc = RemoteFlowController::new(100);
        fc.update(100).unwrap();
        assert_eq!(fc.credit(), 0);

        let frame = fc.generate_frame(EncryptionLevel::OneRtt, u64::MAX, 1200).unwrap();
        assert_eq!(frame, Frame::Blocked(BlockedFrame { data_limit: 100 }));
        assert!(fc.generate_frame(EncryptionLevel::OneRtt, u64::MAX, 1200).is_none());

        // New credit, exhausted again: a fresh BLOCKED is due.
        fc.forward_limit(200);
        fc.update(200).unwrap();
        assert!(fc.will_generate_frame(EncryptionLevel::OneRtt));
    }

    #[test]
    fn test_remote_update_past_limit_is_internal() {
        let mut fc = RemoteFlowController::new(100);
        let err = fc.update(101).unwrap_err();
        assert_eq!(err.code, TransErrorCode::InternalError.code());
    }
}
