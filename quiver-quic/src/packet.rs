//! # Typed Packets (RFC 9000 Section 17)
//!
//! The packet layer the connection core actually needs: a typed in-memory
//! packet, header serialization with a known packet-number offset (so
//! packet-number protection can be applied after the fact), header parsing
//! for the receive queue, and a factory that stamps per-space packet
//! numbers.

use crate::types::{varint, ConnectionId, EncryptionLevel, PacketNumber, PnSpace};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

/// The QUIC version this endpoint speaks.
pub const QUIC_VERSION: u32 = 0x0000_0001;

/// Packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    VersionNegotiation,
    Initial,
    Retry,
    Handshake,
    ZeroRttProtected,
    Protected,
}

impl PacketType {
    /// The key epoch protecting this packet type. Version negotiation
    /// packets are unprotected.
    pub fn encryption_level(self) -> Option<EncryptionLevel> {
        match self {
            PacketType::VersionNegotiation => None,
            PacketType::Initial | PacketType::Retry => Some(EncryptionLevel::Initial),
            PacketType::Handshake => Some(EncryptionLevel::Handshake),
            PacketType::ZeroRttProtected => Some(EncryptionLevel::ZeroRtt),
            PacketType::Protected => Some(EncryptionLevel::OneRtt),
        }
    }

    fn long_header_bits(self) -> u8 {
        match self {
            PacketType::Initial => 0x0,
            PacketType::ZeroRttProtected => 0x1,
            PacketType::Handshake => 0x2,
            PacketType::Retry => 0x3,
            _ => unreachable!("not a long header type"),
        }
    }
}

impl EncryptionLevel {
    /// The packet type built for this level. Zero-RTT is never built by
    /// this core.
    pub fn packet_type(self) -> PacketType {
        match self {
            EncryptionLevel::Initial => PacketType::Initial,
            EncryptionLevel::ZeroRtt => PacketType::ZeroRttProtected,
            EncryptionLevel::Handshake => PacketType::Handshake,
            EncryptionLevel::OneRtt => PacketType::Protected,
        }
    }
}

/// Packet numbers are serialized as fixed 4-byte fields.
pub const PACKET_NUMBER_LEN: usize = 4;

/// A typed QUIC packet.
///
/// Inbound packets carry the decrypted payload and the datagram source
/// address; outbound packets carry the plaintext frame buffer until the
/// packetizer serializes and protects them.
#[derive(Debug, Clone)]
pub struct Packet {
    pub ty: PacketType,
    pub dcid: ConnectionId,
    pub scid: ConnectionId,
    pub packet_number: PacketNumber,
    pub payload: Bytes,
    pub retransmittable: bool,
    pub probing: bool,
    pub from: Option<SocketAddr>,
}

impl Packet {
    /// Serialize header and payload into `buf`, returning the offset of
    /// the packet-number field relative to this packet's first byte.
    pub fn store(&self, buf: &mut BytesMut) -> usize {
        match self.ty {
            PacketType::Protected => {
                buf.put_u8(0x40 | (PACKET_NUMBER_LEN as u8 - 1));
                buf.put_slice(self.dcid.as_bytes());
                let pn_offset = 1 + self.dcid.len();
                buf.put_u32(self.packet_number as u32);
                buf.put_slice(&self.payload);
                pn_offset
            }
            PacketType::Initial | PacketType::Handshake | PacketType::ZeroRttProtected => {
                buf.put_u8(0xc0 | (self.ty.long_header_bits() << 4) | (PACKET_NUMBER_LEN as u8 - 1));
                buf.put_u32(QUIC_VERSION);
                buf.put_u8(self.dcid.len() as u8);
                buf.put_slice(self.dcid.as_bytes());
                buf.put_u8(self.scid.len() as u8);
                buf.put_slice(self.scid.as_bytes());
                let mut pn_offset = 1 + 4 + 1 + self.dcid.len() + 1 + self.scid.len();
                if self.ty == PacketType::Initial {
                    varint::encode(buf, 0); // token length
                    pn_offset += 1;
                }
                let length = (PACKET_NUMBER_LEN + self.payload.len()) as u64;
                pn_offset += varint::size(length);
                varint::encode(buf, length);
                buf.put_u32(self.packet_number as u32);
                buf.put_slice(&self.payload);
                pn_offset
            }
            PacketType::VersionNegotiation | PacketType::Retry => {
                debug_assert!(false, "{:?} packets are not built by this core", self.ty);
                0
            }
        }
    }

    /// Serialized size, header included.
    pub fn size(&self) -> usize {
        match self.ty {
            PacketType::Protected => 1 + self.dcid.len() + PACKET_NUMBER_LEN + self.payload.len(),
            _ => {
                let length = (PACKET_NUMBER_LEN + self.payload.len()) as u64;
                let token_len = if self.ty == PacketType::Initial { 1 } else { 0 };
                1 + 4
                    + 1
                    + self.dcid.len()
                    + 1
                    + self.scid.len()
                    + token_len
                    + varint::size(length)
                    + PACKET_NUMBER_LEN
                    + self.payload.len()
            }
        }
    }
}

/// Header fields recovered from a received datagram, before decryption.
#[derive(Debug, Clone)]
pub struct ParsedHeader {
    pub ty: PacketType,
    pub version: u32,
    pub dcid: ConnectionId,
    pub scid: ConnectionId,
    /// Offset of the packet-number field. Absent for version negotiation.
    pub pn_offset: Option<usize>,
    pub payload_offset: usize,
    pub payload_len: usize,
}

/// Parse a datagram's packet header.
///
/// Short headers carry no DCID length on the wire; `local_cid_len` supplies
/// it. Returns None for garbage that cannot be attributed to any packet.
pub fn parse_header(buf: &[u8], local_cid_len: usize) -> Option<ParsedHeader> {
    let first = *buf.first()?;

    if first & 0x80 == 0 {
        // Short header: flags, DCID, packet number, payload to the end.
        let pn_offset = 1 + local_cid_len;
        let payload_offset = pn_offset + PACKET_NUMBER_LEN;
        if buf.len() < payload_offset {
            return None;
        }
        let dcid = ConnectionId::from_slice(buf.get(1..1 + local_cid_len)?)?;
        return Some(ParsedHeader {
            ty: PacketType::Protected,
            version: QUIC_VERSION,
            dcid,
            scid: ConnectionId::ZERO,
            pn_offset: Some(pn_offset),
            payload_offset,
            payload_len: buf.len() - payload_offset,
        });
    }

    let version = u32::from_be_bytes(buf.get(1..5)?.try_into().ok()?);
    let dcid_len = *buf.get(5)? as usize;
    if dcid_len > ConnectionId::MAX_LENGTH {
        return None;
    }
    let dcid = ConnectionId::from_slice(buf.get(6..6 + dcid_len)?)?;
    let scid_len = *buf.get(6 + dcid_len)? as usize;
    if scid_len > ConnectionId::MAX_LENGTH {
        return None;
    }
    let mut offset = 7 + dcid_len;
    let scid = ConnectionId::from_slice(buf.get(offset..offset + scid_len)?)?;
    offset += scid_len;

    if version == 0 {
        // Version negotiation: the remainder lists supported versions.
        return Some(ParsedHeader {
            ty: PacketType::VersionNegotiation,
            version,
            dcid,
            scid,
            pn_offset: None,
            payload_offset: offset,
            payload_len: buf.len() - offset,
        });
    }

    let ty = match (first >> 4) & 0x3 {
        0x0 => PacketType::Initial,
        0x1 => PacketType::ZeroRttProtected,
        0x2 => PacketType::Handshake,
        _ => PacketType::Retry,
    };

    if ty == PacketType::Initial {
        let (token_len, consumed) = varint::decode(buf.get(offset..)?)?;
        offset += consumed + token_len as usize;
    }

    let (length, consumed) = varint::decode(buf.get(offset..)?)?;
    offset += consumed;
    let length = length as usize;
    if length < PACKET_NUMBER_LEN || buf.len() < offset + length {
        return None;
    }

    Some(ParsedHeader {
        ty,
        version,
        dcid,
        scid,
        pn_offset: Some(offset),
        payload_offset: offset + PACKET_NUMBER_LEN,
        payload_len: length - PACKET_NUMBER_LEN,
    })
}

/// XOR the protection mask over the serialized packet-number field.
///
/// The peer CID length determines where the field sits; the caller passes
/// the offset `store`/`parse_header` reported.
pub fn protect_packet_number(buf: &mut [u8], pn_offset: usize, mask: &[u8; PACKET_NUMBER_LEN]) {
    if buf.len() < pn_offset + PACKET_NUMBER_LEN {
        return;
    }
    for (byte, mask_byte) in buf[pn_offset..pn_offset + PACKET_NUMBER_LEN].iter_mut().zip(mask) {
        *byte ^= mask_byte;
    }
}

/// The 16 bytes (or what remains) following the packet-number field, fed
/// to the mask derivation.
pub fn pn_sample(buf: &[u8], pn_offset: usize) -> &[u8] {
    let start = (pn_offset + PACKET_NUMBER_LEN).min(buf.len());
    let end = (start + 16).min(buf.len());
    &buf[start..end]
}

/// Builds outbound packets, stamping per-space packet numbers.
#[derive(Debug, Default)]
pub struct PacketFactory {
    next_pn: [PacketNumber; 3],
}

impl PacketFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_packet_number(&mut self, space: PnSpace) -> PacketNumber {
        let pn = self.next_pn[space.index()];
        self.next_pn[space.index()] += 1;
        pn
    }

    pub fn create_initial_packet(
        &mut self,
        dcid: ConnectionId,
        scid: ConnectionId,
        payload: Bytes,
        retransmittable: bool,
        probing: bool,
    ) -> Packet {
        Packet {
            ty: PacketType::Initial,
            dcid,
            scid,
            packet_number: self.next_packet_number(PnSpace::Initial),
            payload,
            retransmittable,
            probing,
            from: None,
        }
    }

    pub fn create_handshake_packet(
        &mut self,
        dcid: ConnectionId,
        scid: ConnectionId,
        payload: Bytes,
        retransmittable: bool,
        probing: bool,
    ) -> Packet {
        Packet {
            ty: PacketType::Handshake,
            dcid,
            scid,
            packet_number: self.next_packet_number(PnSpace::Handshake),
            payload,
            retransmittable,
            probing,
            from: None,
        }
    }

    pub fn create_protected_packet(
        &mut self,
        dcid: ConnectionId,
        payload: Bytes,
        retransmittable: bool,
        probing: bool,
    ) -> Packet {
        Packet {
            ty: PacketType::Protected,
            dcid,
            scid: ConnectionId::ZERO,
            packet_number: self.next_packet_number(PnSpace::Application),
            payload,
            retransmittable,
            probing,
            from: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(bytes: &[u8]) -> ConnectionId {
        ConnectionId::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_initial_store_parse_roundtrip() {
        let mut factory = PacketFactory::new();
        let packet = factory.create_initial_packet(
            cid(&[1; 8]),
            cid(&[2; 8]),
            Bytes::from_static(b"crypto bytes"),
            true,
            false,
        );

        let mut buf = BytesMut::new();
        let pn_offset = packet.store(&mut buf);
        assert_eq!(buf.len(), packet.size());

        let header = parse_header(&buf, 8).unwrap();
        assert_eq!(header.ty, PacketType::Initial);
        assert_eq!(header.version, QUIC_VERSION);
        assert_eq!(header.dcid, cid(&[1; 8]));
        assert_eq!(header.scid, cid(&[2; 8]));
        assert_eq!(header.pn_offset, Some(pn_offset));
        assert_eq!(header.payload_len, b"crypto bytes".len());
    }

    #[test]
    fn test_protected_store_parse_roundtrip() {
        let mut factory = PacketFactory::new();
        let packet =
            factory.create_protected_packet(cid(&[9; 8]), Bytes::from_static(b"payload"), true, false);

        let mut buf = BytesMut::new();
        let pn_offset = packet.store(&mut buf);
        let header = parse_header(&buf, 8).unwrap();
        assert_eq!(header.ty, PacketType::Protected);
        assert_eq!(header.dcid, cid(&[9; 8]));
        assert_eq!(header.pn_offset, Some(pn_offset));
        assert_eq!(header.payload_len, b"payload".len());
    }

    #[test]
    fn test_factory_spaces_are_independent() {
        let mut factory = PacketFactory::new();
        let a = factory.create_initial_packet(cid(&[1; 8]), cid(&[2; 8]), Bytes::new(), true, false);
        let b = factory.create_initial_packet(cid(&[1; 8]), cid(&[2; 8]), Bytes::new(), true, false);
        let c = factory.create_protected_packet(cid(&[1; 8]), Bytes::new(), true, false);
        assert_eq!(a.packet_number, 0);
        assert_eq!(b.packet_number, 1);
        assert_eq!(c.packet_number, 0);
    }

    #[test]
    fn test_version_negotiation_parse() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x80);
        buf.put_u32(0);
        buf.put_u8(4);
        buf.put_slice(&[1, 2, 3, 4]);
        buf.put_u8(4);
        buf.put_slice(&[5, 6, 7, 8]);
        buf.put_u32(QUIC_VERSION);

        let header = parse_header(&buf, 8).unwrap();
        assert_eq!(header.ty, PacketType::VersionNegotiation);
        assert_eq!(header.pn_offset, None);
        assert_eq!(header.payload_len, 4);
    }

    #[test]
    fn test_garbage_is_unparseable() {
        assert!(parse_header(&[], 8).is_none());
        assert!(parse_header(&[0xc3, 0x00], 8).is_none());
    }

    #[test]
    fn test_pn_protection_is_involutive() {
        let mut buf = vec![0u8; 32];
        buf[10..14].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let mask = [0x55; 4];
        protect_packet_number(&mut buf, 10, &mask);
        assert_ne!(&buf[10..14], &[0xde, 0xad, 0xbe, 0xef]);
        protect_packet_number(&mut buf, 10, &mask);
        assert_eq!(&buf[10..14], &[0xde, 0xad, 0xbe, 0xef]);
    }
}
