//! # Path Validation (RFC 9000 Section 8.2)
//!
//! The handshake-lite probe that confirms a new network path before
//! committing traffic to it: send PATH_CHALLENGE with random data, expect
//! the same data echoed in PATH_RESPONSE. The connection core starts the
//! probe on migration and closes the connection if the timeout fires first.

use crate::error::Result;
use crate::frames::{
    Frame, FrameHandler, FrameSource, FrameType, PathChallengeFrame, PathResponseFrame,
};
use crate::types::EncryptionLevel;
use rand::RngCore;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValidationState {
    Idle,
    Validating,
    Validated,
}

/// Tracks one path's validation exchange, both directions.
#[derive(Debug)]
pub struct PathValidator {
    state: ValidationState,
    /// Challenge we sent (or will send), awaiting its echo.
    outgoing_challenge: Option<[u8; 8]>,
    /// Challenge not yet packetized.
    challenge_pending: bool,
    /// Echo owed for a challenge the peer sent us.
    response_pending: Option<[u8; 8]>,
}

impl PathValidator {
    pub fn new() -> Self {
        Self {
            state: ValidationState::Idle,
            outgoing_challenge: None,
            challenge_pending: false,
            response_pending: None,
        }
    }

    /// Begin validating the current path.
    pub fn validate(&mut self) {
        let mut data = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut data);
        self.state = ValidationState::Validating;
        self.outgoing_challenge = Some(data);
        self.challenge_pending = true;
        debug!("start path validation");
    }

    pub fn is_validating(&self) -> bool {
        self.state == ValidationState::Validating
    }

    pub fn is_validated(&self) -> bool {
        self.state == ValidationState::Validated
    }
}

impl Default for PathValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for PathValidator {
    fn will_generate_frame(&self, level: EncryptionLevel) -> bool {
        level == EncryptionLevel::OneRtt && (self.response_pending.is_some() || self.challenge_pending)
    }

    fn generate_frame(&mut self, level: EncryptionLevel, _credit: u64, max_size: usize) -> Option<Frame> {
        if level != EncryptionLevel::OneRtt || max_size < 9 {
            return None;
        }
        // Echoes take priority; the peer is waiting on us.
        if let Some(data) = self.response_pending.take() {
            return Some(Frame::PathResponse(PathResponseFrame { data }));
        }
        if self.challenge_pending {
            self.challenge_pending = false;
            return Some(Frame::PathChallenge(PathChallengeFrame {
                data: self.outgoing_challenge?,
            }));
        }
        None
    }
}

impl FrameHandler for PathValidator {
    fn interests(&self) -> &'static [FrameType] {
        &[FrameType::PathChallenge, FrameType::PathResponse]
    }

    fn handle_frame(&mut self, _level: EncryptionLevel, frame: &Frame) -> Result<()> {
        match frame {
            Frame::PathChallenge(challenge) => {
                self.response_pending = Some(challenge.data);
            }
            Frame::PathResponse(response) => {
                if self.outgoing_challenge == Some(response.data) {
                    debug!("path validated");
                    self.state = ValidationState::Validated;
                    self.outgoing_challenge = None;
                    self.challenge_pending = false;
                }
                // A mismatched echo is ignored; it may answer a stale probe.
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_then_matching_response_validates() {
        let mut validator = PathValidator::new();
        validator.validate();
        assert!(validator.is_validating());

        let frame = validator.generate_frame(EncryptionLevel::OneRtt, u64::MAX, 1200).unwrap();
        let Frame::PathChallenge(challenge) = frame else { panic!("expected challenge") };

        validator
            .handle_frame(
                EncryptionLevel::OneRtt,
                &Frame::PathResponse(PathResponseFrame { data: challenge.data }),
            )
            .unwrap();
        assert!(validator.is_validated());
        assert!(!validator.is_validating());
    }

    #[test]
    fn test_mismatched_response_is_ignored() {
        let mut validator = PathValidator::new();
        validator.validate();
        let _ = validator.generate_frame(EncryptionLevel::OneRtt, u64::MAX, 1200);

        validator
            .handle_frame(
                EncryptionLevel::OneRtt,
                &Frame::PathResponse(PathResponseFrame { data: [0xff; 8] }),
            )
            .unwrap();
        assert!(validator.is_validating());
    }

    #[test]
    fn test_peer_challenge_gets_echoed() {
        let mut validator = PathValidator::new();
        validator
            .handle_frame(
                EncryptionLevel::OneRtt,
                &Frame::PathChallenge(PathChallengeFrame { data: [7; 8] }),
            )
            .unwrap();

        assert!(validator.will_generate_frame(EncryptionLevel::OneRtt));
        let frame = validator.generate_frame(EncryptionLevel::OneRtt, u64::MAX, 1200).unwrap();
        assert_eq!(frame, Frame::PathResponse(PathResponseFrame { data: [7; 8] }));
        assert!(!validator.will_generate_frame(EncryptionLevel::OneRtt));
    }

    #[test]
    fn test_challenge_only_at_one_rtt() {
        let mut validator = PathValidator::new();
        validator.validate();
        assert!(!validator.will_generate_frame(EncryptionLevel::Initial));
        assert!(validator.generate_frame(EncryptionLevel::Initial, u64::MAX, 1200).is_none());
    }
}
