//! # Connection Error Taxonomy (RFC 9000 Section 20)
//!
//! Errors that terminate a connection carry a class (transport or
//! application), a 16-bit code, an optional human-readable reason, and
//! optionally the frame type that triggered them. Local non-fatal
//! conditions (queue empty, keys not ready) never become connection errors;
//! they are expressed as [`crate::connection::PacketCreationResult`] tags.

use crate::frames::FrameType;
use thiserror::Error;

/// Transport error codes carried in CONNECTION_CLOSE frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TransErrorCode {
    NoError = 0x0,
    InternalError = 0x1,
    FlowControlError = 0x3,
    FrameEncodingError = 0x7,
    TransportParameterError = 0x8,
    VersionNegotiationError = 0x9,
    ProtocolViolation = 0xa,
}

impl TransErrorCode {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Which side of the API surface produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transport,
    Application,
}

/// A connection-terminating error.
///
/// Handlers bubble these up to the state event loop, which responds with
/// `close(error)`; the error then becomes the payload of the closing frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{class:?} error {code:#06x}")]
pub struct ConnectionError {
    pub class: ErrorClass,
    pub code: u16,
    pub reason: Option<&'static str>,
    pub frame_type: Option<FrameType>,
}

impl ConnectionError {
    pub fn transport(code: TransErrorCode) -> Self {
        Self {
            class: ErrorClass::Transport,
            code: code.code(),
            reason: None,
            frame_type: None,
        }
    }

    /// Transport error with a raw peer-supplied code.
    pub fn transport_code(code: u16) -> Self {
        Self {
            class: ErrorClass::Transport,
            code,
            reason: None,
            frame_type: None,
        }
    }

    pub fn application(code: u16) -> Self {
        Self {
            class: ErrorClass::Application,
            code,
            reason: None,
            frame_type: None,
        }
    }

    pub fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_frame_type(mut self, frame_type: FrameType) -> Self {
        self.frame_type = Some(frame_type);
        self
    }
}

pub type Result<T> = core::result::Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_codes() {
        assert_eq!(TransErrorCode::NoError.code(), 0x0);
        assert_eq!(TransErrorCode::FlowControlError.code(), 0x3);
        assert_eq!(TransErrorCode::ProtocolViolation.code(), 0xa);
    }

    #[test]
    fn test_error_construction() {
        let err = ConnectionError::transport(TransErrorCode::ProtocolViolation)
            .with_reason("received zero-length cid")
            .with_frame_type(FrameType::NewConnectionId);
        assert_eq!(err.class, ErrorClass::Transport);
        assert_eq!(err.code, 0xa);
        assert_eq!(err.frame_type, Some(FrameType::NewConnectionId));

        let app = ConnectionError::application(0x42);
        assert_eq!(app.class, ErrorClass::Application);
        assert_eq!(app.code, 0x42);
    }
}
