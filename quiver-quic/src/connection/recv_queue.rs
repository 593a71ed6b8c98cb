//! # Packet Receive Queue
//!
//! The single cross-thread surface of a connection: the UDP receiver
//! appends raw datagrams, the owning scheduler thread dequeues them as
//! decrypted, typed packets. Every dequeue carries a creation-result tag;
//! the state machine's drain loops are driven entirely by these tags.

use crate::handshake::HandshakeHandler;
use crate::net::UdpDatagram;
use crate::packet::{self, Packet, PacketType, PACKET_NUMBER_LEN, QUIC_VERSION};
use crate::types::ConnectionId;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Outcome of one dequeue attempt.
///
/// Only `Failed` ever becomes a connection error (INTERNAL_ERROR); the
/// rest steer the receive-drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketCreationResult {
    /// A decrypted packet is ready.
    Success,
    /// The queue is empty.
    NoPacket,
    /// Keys for this packet's level are not installed yet.
    NotReady,
    /// The datagram could not be attributed to a packet; dropped.
    Ignored,
    /// The packet carries a version we do not speak.
    Unsupported,
    /// Decryption failed.
    Failed,
}

/// FIFO of received datagrams with decrypt-on-dequeue.
#[derive(Debug, Default)]
pub struct RecvQueue {
    queue: Mutex<VecDeque<UdpDatagram>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecvQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a datagram. Safe to call from the UDP receiver thread.
    pub fn enqueue(&self, datagram: UdpDatagram) {
        lock(&self.queue).push_back(datagram);
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Drop everything queued (Retry handling).
    pub fn reset(&self) {
        lock(&self.queue).clear();
    }

    /// Turn the head datagram into a packet.
    ///
    /// `local_cid` supplies the DCID length for short headers. A NotReady
    /// datagram stays at the head so it can be retried once keys arrive.
    pub fn dequeue(
        &self,
        handshake: &dyn HandshakeHandler,
        local_cid: &ConnectionId,
    ) -> (Option<Packet>, PacketCreationResult) {
        let Some(datagram) = lock(&self.queue).pop_front() else {
            return (None, PacketCreationResult::NoPacket);
        };

        let Some(header) = packet::parse_header(&datagram.data, local_cid.len()) else {
            return (None, PacketCreationResult::Ignored);
        };

        if header.ty == PacketType::VersionNegotiation {
            let packet = Packet {
                ty: header.ty,
                dcid: header.dcid,
                scid: header.scid,
                packet_number: 0,
                payload: datagram.data.slice(header.payload_offset..),
                retransmittable: false,
                probing: false,
                from: Some(datagram.from),
            };
            return (Some(packet), PacketCreationResult::Success);
        }

        if header.version != QUIC_VERSION {
            let packet = Packet {
                ty: header.ty,
                dcid: header.dcid,
                scid: header.scid,
                packet_number: 0,
                payload: Bytes::new(),
                retransmittable: false,
                probing: false,
                from: Some(datagram.from),
            };
            return (Some(packet), PacketCreationResult::Unsupported);
        }

        let (Some(level), Some(pn_offset)) = (header.ty.encryption_level(), header.pn_offset) else {
            return (None, PacketCreationResult::Ignored);
        };
        if !handshake.is_ready_to_decrypt(level) {
            lock(&self.queue).push_front(datagram);
            return (None, PacketCreationResult::NotReady);
        }

        // Undo packet-number protection in a scratch copy of the PN field.
        let mut pn_bytes = [0u8; PACKET_NUMBER_LEN];
        pn_bytes.copy_from_slice(&datagram.data[pn_offset..pn_offset + PACKET_NUMBER_LEN]);
        let mask = handshake.pn_protection_mask(level, packet::pn_sample(&datagram.data, pn_offset));
        for (byte, mask_byte) in pn_bytes.iter_mut().zip(&mask) {
            *byte ^= mask_byte;
        }
        let packet_number = u32::from_be_bytes(pn_bytes) as u64;

        let ciphertext =
            &datagram.data[header.payload_offset..header.payload_offset + header.payload_len];
        let Some(payload) = handshake.decrypt_payload(level, packet_number, ciphertext) else {
            return (None, PacketCreationResult::Failed);
        };

        let packet = Packet {
            ty: header.ty,
            dcid: header.dcid,
            scid: header.scid,
            packet_number,
            payload,
            retransmittable: false,
            probing: false,
            from: Some(datagram.from),
        };
        (Some(packet), PacketCreationResult::Success)
    }
}
