//! # QUIC Frames (RFC 9000 Section 19)
//!
//! Frame types, the wire codec, and the inbound dispatcher. The connection
//! core owns only connection-scope frames (MAX_DATA, BLOCKED, PING,
//! NEW_CONNECTION_ID, CONNECTION_CLOSE, APPLICATION_CLOSE); everything else
//! is parsed here and routed to the collaborator that registered interest.

pub mod codec;
pub mod dispatcher;

pub use dispatcher::{FrameDispatcher, ReceivedFrameSummary};

use crate::types::{ConnectionId, EncryptionLevel, PacketNumber};
use bytes::Bytes;
use tinyvec::TinyVec;

/// Frame type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Padding = 0x00,
    Ping = 0x01,
    Ack = 0x02,
    Crypto = 0x06,
    Stream = 0x08,
    MaxData = 0x10,
    Blocked = 0x14,
    NewConnectionId = 0x18,
    PathChallenge = 0x1a,
    PathResponse = 0x1b,
    ConnectionClose = 0x1c,
    ApplicationClose = 0x1d,
}

/// One ACK range: a gap of unacknowledged packets followed by a run of
/// acknowledged ones (RFC 9000 Section 19.3.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckRange {
    pub gap: u64,
    pub length: u64,
}

/// ACK frame (RFC 9000 Section 19.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    pub largest_acked: PacketNumber,
    pub ack_delay: u64,
    pub first_ack_range: u64,
    pub ranges: TinyVec<[AckRange; 8]>,
}

/// CRYPTO frame carrying handshake bytes (RFC 9000 Section 19.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoFrame {
    pub offset: u64,
    pub data: Bytes,
}

/// STREAM frame (RFC 9000 Section 19.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream_id: u64,
    pub offset: u64,
    pub fin: bool,
    pub data: Bytes,
}

/// MAX_DATA: connection-level flow control credit from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxDataFrame {
    pub maximum_data: u64,
}

/// BLOCKED: the peer is stalled on our connection-level limit. Diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockedFrame {
    pub data_limit: u64,
}

/// NEW_CONNECTION_ID: a peer-advertised alternate CID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnectionIdFrame {
    pub sequence_number: u64,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: [u8; 16],
}

/// PATH_CHALLENGE probe data (RFC 9000 Section 19.17).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathChallengeFrame {
    pub data: [u8; 8],
}

/// PATH_RESPONSE echo (RFC 9000 Section 19.18).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathResponseFrame {
    pub data: [u8; 8],
}

/// CONNECTION_CLOSE with a transport error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCloseFrame {
    pub error_code: u16,
    pub frame_type: u64,
    pub reason: Bytes,
}

/// APPLICATION_CLOSE with an opaque application error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationCloseFrame {
    pub error_code: u16,
    pub reason: Bytes,
}

/// Discriminated union of the frames this core parses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Padding,
    Ping,
    Ack(AckFrame),
    Crypto(CryptoFrame),
    Stream(StreamFrame),
    MaxData(MaxDataFrame),
    Blocked(BlockedFrame),
    NewConnectionId(NewConnectionIdFrame),
    PathChallenge(PathChallengeFrame),
    PathResponse(PathResponseFrame),
    ConnectionClose(ConnectionCloseFrame),
    ApplicationClose(ApplicationCloseFrame),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Padding => FrameType::Padding,
            Frame::Ping => FrameType::Ping,
            Frame::Ack(_) => FrameType::Ack,
            Frame::Crypto(_) => FrameType::Crypto,
            Frame::Stream(_) => FrameType::Stream,
            Frame::MaxData(_) => FrameType::MaxData,
            Frame::Blocked(_) => FrameType::Blocked,
            Frame::NewConnectionId(_) => FrameType::NewConnectionId,
            Frame::PathChallenge(_) => FrameType::PathChallenge,
            Frame::PathResponse(_) => FrameType::PathResponse,
            Frame::ConnectionClose(_) => FrameType::ConnectionClose,
            Frame::ApplicationClose(_) => FrameType::ApplicationClose,
        }
    }

    /// ACK-eliciting frames require the peer to acknowledge the packet
    /// (RFC 9000 Section 13.2).
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Frame::Padding | Frame::Ack(_) | Frame::ConnectionClose(_) | Frame::ApplicationClose(_)
        )
    }

    /// Probing frames do not commit traffic to a new path (RFC 9000
    /// Section 9.1).
    pub fn is_probing(&self) -> bool {
        matches!(
            self,
            Frame::Padding | Frame::PathChallenge(_) | Frame::PathResponse(_) | Frame::NewConnectionId(_)
        )
    }

    /// True when the frame consumes connection-level flow control credit.
    pub fn is_flow_controlled(&self) -> bool {
        matches!(self, Frame::Stream(_))
    }

    /// Frames worth replaying after loss.
    pub fn is_retransmittable(&self) -> bool {
        !matches!(
            self,
            Frame::Padding | Frame::Ack(_) | Frame::ConnectionClose(_) | Frame::ApplicationClose(_)
        )
    }
}

/// A producer polled by the packetizer.
///
/// Every collaborator that can contribute frames to an outgoing packet
/// implements this one capability; the packetizer queries them in its fixed
/// order. `credit` bounds flow-controlled producers (stream manager) and is
/// `u64::MAX` for everyone else. A returned frame must encode within
/// `max_size` bytes.
pub trait FrameSource {
    fn will_generate_frame(&self, level: EncryptionLevel) -> bool;

    fn generate_frame(&mut self, level: EncryptionLevel, credit: u64, max_size: usize) -> Option<Frame>;
}

/// An inbound frame consumer with a declared set of interests.
pub trait FrameHandler {
    fn interests(&self) -> &'static [FrameType];

    fn handle_frame(&mut self, level: EncryptionLevel, frame: &Frame) -> crate::error::Result<()>;
}
