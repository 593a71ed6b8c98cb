//! # Frame Wire Codec (RFC 9000 Section 12.4, 19)
//!
//! Parsing and serialization between [`Frame`] values and packet payload
//! bytes. Parsing is strict: a malformed frame aborts the payload with
//! FRAME_ENCODING_ERROR, which terminates the connection.

use super::*;
use crate::error::{ConnectionError, Result, TransErrorCode};
use crate::types::varint;
use bytes::{BufMut, Bytes, BytesMut};

fn malformed() -> ConnectionError {
    ConnectionError::transport(TransErrorCode::FrameEncodingError)
}

/// Cursor over a payload slice; every read is bounds-checked.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn varint(&mut self) -> Result<u64> {
        let (value, consumed) = varint::decode(&self.buf[self.pos..]).ok_or_else(malformed)?;
        self.pos += consumed;
        Ok(value)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(malformed)?;
        if end > self.buf.len() {
            return Err(malformed());
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Parse one frame from the front of `buf`, returning it and the bytes
/// consumed.
pub fn parse_frame(buf: &[u8]) -> Result<(Frame, usize)> {
    let mut r = Reader::new(buf);
    let frame_type = r.varint()?;

    // Runs of PADDING collapse into one frame.
    if frame_type == FrameType::Padding as u64 {
        while r.remaining() > 0 && r.buf[r.pos] == 0x00 {
            r.pos += 1;
        }
        return Ok((Frame::Padding, r.pos));
    }

    let frame = match frame_type {
        t if t == FrameType::Ping as u64 => Frame::Ping,

        t if t == FrameType::Ack as u64 => {
            let largest_acked = r.varint()?;
            let ack_delay = r.varint()?;
            let range_count = r.varint()?;
            let first_ack_range = r.varint()?;
            let mut ranges = TinyVec::new();
            for _ in 0..range_count {
                let gap = r.varint()?;
                let length = r.varint()?;
                ranges.push(AckRange { gap, length });
            }
            Frame::Ack(AckFrame {
                largest_acked,
                ack_delay,
                first_ack_range,
                ranges,
            })
        }

        t if t == FrameType::Crypto as u64 => {
            let offset = r.varint()?;
            let length = r.varint()? as usize;
            let data = Bytes::copy_from_slice(r.bytes(length)?);
            Frame::Crypto(CryptoFrame { offset, data })
        }

        // STREAM carries FIN/LEN/OFF flags in the low type bits.
        t if (0x08..=0x0f).contains(&t) => {
            let fin = t & 0x01 != 0;
            let has_len = t & 0x02 != 0;
            let has_off = t & 0x04 != 0;
            let stream_id = r.varint()?;
            let offset = if has_off { r.varint()? } else { 0 };
            let length = if has_len { r.varint()? as usize } else { r.remaining() };
            let data = Bytes::copy_from_slice(r.bytes(length)?);
            Frame::Stream(StreamFrame {
                stream_id,
                offset,
                fin,
                data,
            })
        }

        t if t == FrameType::MaxData as u64 => Frame::MaxData(MaxDataFrame {
            maximum_data: r.varint()?,
        }),

        t if t == FrameType::Blocked as u64 => Frame::Blocked(BlockedFrame {
            data_limit: r.varint()?,
        }),

        t if t == FrameType::NewConnectionId as u64 => {
            let sequence_number = r.varint()?;
            let cid_len = r.bytes(1)?[0] as usize;
            if cid_len > ConnectionId::MAX_LENGTH {
                return Err(malformed());
            }
            let connection_id = ConnectionId::from_slice(r.bytes(cid_len)?).ok_or_else(malformed)?;
            let stateless_reset_token = r.array::<16>()?;
            Frame::NewConnectionId(NewConnectionIdFrame {
                sequence_number,
                connection_id,
                stateless_reset_token,
            })
        }

        t if t == FrameType::PathChallenge as u64 => Frame::PathChallenge(PathChallengeFrame {
            data: r.array::<8>()?,
        }),

        t if t == FrameType::PathResponse as u64 => Frame::PathResponse(PathResponseFrame {
            data: r.array::<8>()?,
        }),

        t if t == FrameType::ConnectionClose as u64 => {
            let error_code = r.varint()?;
            let frame_type = r.varint()?;
            let reason_len = r.varint()? as usize;
            let reason = Bytes::copy_from_slice(r.bytes(reason_len)?);
            Frame::ConnectionClose(ConnectionCloseFrame {
                error_code: error_code as u16,
                frame_type,
                reason,
            })
        }

        t if t == FrameType::ApplicationClose as u64 => {
            let error_code = r.varint()?;
            let reason_len = r.varint()? as usize;
            let reason = Bytes::copy_from_slice(r.bytes(reason_len)?);
            Frame::ApplicationClose(ApplicationCloseFrame {
                error_code: error_code as u16,
                reason,
            })
        }

        _ => return Err(malformed()),
    };

    Ok((frame, r.pos))
}

/// Encoded size of `frame` in bytes.
pub fn encoded_size(frame: &Frame) -> usize {
    match frame {
        Frame::Padding => 1,
        Frame::Ping => 1,
        Frame::Ack(ack) => {
            let mut size = 1
                + varint::size(ack.largest_acked)
                + varint::size(ack.ack_delay)
                + varint::size(ack.ranges.len() as u64)
                + varint::size(ack.first_ack_range);
            for range in &ack.ranges {
                size += varint::size(range.gap) + varint::size(range.length);
            }
            size
        }
        Frame::Crypto(crypto) => {
            1 + varint::size(crypto.offset) + varint::size(crypto.data.len() as u64) + crypto.data.len()
        }
        Frame::Stream(stream) => {
            1 + varint::size(stream.stream_id)
                + varint::size(stream.offset)
                + varint::size(stream.data.len() as u64)
                + stream.data.len()
        }
        Frame::MaxData(max_data) => 1 + varint::size(max_data.maximum_data),
        Frame::Blocked(blocked) => 1 + varint::size(blocked.data_limit),
        Frame::NewConnectionId(ncid) => {
            1 + varint::size(ncid.sequence_number) + 1 + ncid.connection_id.len() + 16
        }
        Frame::PathChallenge(_) | Frame::PathResponse(_) => 1 + 8,
        Frame::ConnectionClose(close) => {
            1 + varint::size(close.error_code as u64)
                + varint::size(close.frame_type)
                + varint::size(close.reason.len() as u64)
                + close.reason.len()
        }
        Frame::ApplicationClose(close) => {
            1 + varint::size(close.error_code as u64)
                + varint::size(close.reason.len() as u64)
                + close.reason.len()
        }
    }
}

/// Append the wire encoding of `frame` to `buf`.
pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) {
    match frame {
        Frame::Padding => buf.put_u8(FrameType::Padding as u8),
        Frame::Ping => buf.put_u8(FrameType::Ping as u8),
        Frame::Ack(ack) => {
            buf.put_u8(FrameType::Ack as u8);
            varint::encode(buf, ack.largest_acked);
            varint::encode(buf, ack.ack_delay);
            varint::encode(buf, ack.ranges.len() as u64);
            varint::encode(buf, ack.first_ack_range);
            for range in &ack.ranges {
                varint::encode(buf, range.gap);
                varint::encode(buf, range.length);
            }
        }
        Frame::Crypto(crypto) => {
            buf.put_u8(FrameType::Crypto as u8);
            varint::encode(buf, crypto.offset);
            varint::encode(buf, crypto.data.len() as u64);
            buf.put_slice(&crypto.data);
        }
        Frame::Stream(stream) => {
            // OFF and LEN are always written; FIN comes from the frame.
            let type_byte = FrameType::Stream as u8 | 0x04 | 0x02 | stream.fin as u8;
            buf.put_u8(type_byte);
            varint::encode(buf, stream.stream_id);
            varint::encode(buf, stream.offset);
            varint::encode(buf, stream.data.len() as u64);
            buf.put_slice(&stream.data);
        }
        Frame::MaxData(max_data) => {
            buf.put_u8(FrameType::MaxData as u8);
            varint::encode(buf, max_data.maximum_data);
        }
        Frame::Blocked(blocked) => {
            buf.put_u8(FrameType::Blocked as u8);
            varint::encode(buf, blocked.data_limit);
        }
        Frame::NewConnectionId(ncid) => {
            buf.put_u8(FrameType::NewConnectionId as u8);
            varint::encode(buf, ncid.sequence_number);
            buf.put_u8(ncid.connection_id.len() as u8);
            buf.put_slice(ncid.connection_id.as_bytes());
            buf.put_slice(&ncid.stateless_reset_token);
        }
        Frame::PathChallenge(challenge) => {
            buf.put_u8(FrameType::PathChallenge as u8);
            buf.put_slice(&challenge.data);
        }
        Frame::PathResponse(response) => {
            buf.put_u8(FrameType::PathResponse as u8);
            buf.put_slice(&response.data);
        }
        Frame::ConnectionClose(close) => {
            buf.put_u8(FrameType::ConnectionClose as u8);
            varint::encode(buf, close.error_code as u64);
            varint::encode(buf, close.frame_type);
            varint::encode(buf, close.reason.len() as u64);
            buf.put_slice(&close.reason);
        }
        Frame::ApplicationClose(close) => {
            buf.put_u8(FrameType::ApplicationClose as u8);
            varint::encode(buf, close.error_code as u64);
            varint::encode(buf, close.reason.len() as u64);
            buf.put_slice(&close.reason);
        }
    }
}
