//! # Inbound Frame Dispatch
//!
//! Splits a decrypted payload into frames and summarizes what the packet
//! carried: whether anything was ACK-eliciting, and whether stream bytes
//! consumed flow-control credit. Routing to interested handlers happens in
//! the connection, which owns them.

use super::codec;
use super::Frame;
use crate::error::Result;

/// What the dispatcher learned about one packet's payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceivedFrameSummary {
    /// At least one ACK-eliciting frame was present.
    pub should_send_ack: bool,
    /// Stream bytes were received (the local window must be re-checked).
    pub is_flow_controlled: bool,
}

/// Parses payloads into frames plus a summary.
pub struct FrameDispatcher;

impl FrameDispatcher {
    /// Parse every frame in `payload`.
    ///
    /// A malformed frame fails the whole payload with
    /// FRAME_ENCODING_ERROR; QUIC has no frame-level resynchronization.
    pub fn parse_payload(payload: &[u8]) -> Result<(Vec<Frame>, ReceivedFrameSummary)> {
        let mut frames = Vec::new();
        let mut summary = ReceivedFrameSummary::default();
        let mut offset = 0;

        while offset < payload.len() {
            let (frame, consumed) = codec::parse_frame(&payload[offset..])?;
            offset += consumed;

            summary.should_send_ack |= frame.is_ack_eliciting();
            summary.is_flow_controlled |= frame.is_flow_controlled();

            if !matches!(frame, Frame::Padding) {
                frames.push(frame);
            }
        }

        Ok((frames, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{codec::encode_frame, MaxDataFrame, StreamFrame};
    use bytes::{Bytes, BytesMut};

    #[test]
    fn test_summary_flags() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::MaxData(MaxDataFrame { maximum_data: 100 }), &mut buf);
        encode_frame(
            &Frame::Stream(StreamFrame {
                stream_id: 0,
                offset: 0,
                fin: false,
                data: Bytes::from_static(b"data"),
            }),
            &mut buf,
        );

        let (frames, summary) = FrameDispatcher::parse_payload(&buf).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(summary.should_send_ack);
        assert!(summary.is_flow_controlled);
    }

    #[test]
    fn test_ack_only_payload_is_not_eliciting() {
        let mut buf = BytesMut::new();
        encode_frame(
            &Frame::Ack(crate::frames::AckFrame {
                largest_acked: 1,
                ack_delay: 0,
                first_ack_range: 0,
                ranges: Default::default(),
            }),
            &mut buf,
        );

        let (_, summary) = FrameDispatcher::parse_payload(&buf).unwrap();
        assert!(!summary.should_send_ack);
        assert!(!summary.is_flow_controlled);
    }

    #[test]
    fn test_padding_is_dropped() {
        let buf = [0u8; 32];
        let (frames, summary) = FrameDispatcher::parse_payload(&buf).unwrap();
        assert!(frames.is_empty());
        assert!(!summary.should_send_ack);
    }
}
