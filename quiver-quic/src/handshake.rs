//! # Handshake Collaborator Seam (RFC 9001)
//!
//! The TLS stack lives outside this crate. The connection core drives it
//! through [`HandshakeHandler`]: handshake progression, transport
//! parameters, CRYPTO frame production (as a [`FrameSource`]), CRYPTO frame
//! consumption (as a [`FrameHandler`]), and the packet-protection surface
//! the receive queue and packetizer need (readiness, payload decryption,
//! packet-number masks).

use crate::error::Result;
use crate::frames::{FrameHandler, FrameSource};
use crate::packet::{Packet, PACKET_NUMBER_LEN};
use crate::types::{ConnectionId, EncryptionLevel, PacketNumber};
use bytes::Bytes;

/// The transport parameters this core reads.
///
/// The full parameter set belongs to the handshake implementation; only
/// what the connection core consumes is surfaced here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParameters {
    /// Connection-level flow control grant.
    pub initial_max_data: u64,

    /// The endpoint refuses connection migration.
    pub disable_migration: bool,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            initial_max_data: 1024 * 1024,
            disable_migration: false,
        }
    }
}

/// The handshake state machine and key schedule, driven by the connection.
pub trait HandshakeHandler: FrameSource + FrameHandler + Send {
    /// Begin the handshake. Inbound passes the triggering Initial packet;
    /// outbound passes None before the first flight.
    fn start(&mut self, initial_packet: Option<&Packet>) -> Result<()>;

    /// Advance the handshake state machine.
    fn do_handshake(&mut self) -> Result<()>;

    fn is_completed(&self) -> bool;

    fn is_version_negotiated(&self) -> bool;

    /// React to a Version Negotiation packet by picking a mutual version.
    fn negotiate_version(&mut self, packet: &Packet) -> Result<()>;

    fn has_remote_tp(&self) -> bool;

    fn local_transport_parameters(&self) -> TransportParameters;

    fn remote_transport_parameters(&self) -> TransportParameters;

    /// The highest level whose keys are installed; closing frames are
    /// built here (Zero-RTT excluded).
    fn current_encryption_level(&self) -> EncryptionLevel;

    /// Negotiated ALPN value, if any.
    fn negotiated_application_name(&self) -> Option<Vec<u8>>;

    fn negotiated_cipher_suite(&self) -> Option<&'static str>;

    /// (Re)derive initial key material, keyed by a connection ID. Called
    /// after a Retry rerandomizes the original CID.
    fn initialize_key_materials(&mut self, cid: &ConnectionId);

    /// Discard handshake progress so it can start over.
    fn reset(&mut self);

    // --- packet protection surface ---

    /// Keys for `level` are installed and packets can be decrypted.
    fn is_ready_to_decrypt(&self, level: EncryptionLevel) -> bool;

    /// Decrypt a packet payload. None means authentication failed.
    fn decrypt_payload(
        &self,
        level: EncryptionLevel,
        packet_number: PacketNumber,
        payload: &[u8],
    ) -> Option<Bytes>;

    /// Packet-number protection mask derived from the ciphertext sample.
    fn pn_protection_mask(&self, level: EncryptionLevel, sample: &[u8]) -> [u8; PACKET_NUMBER_LEN];
}
