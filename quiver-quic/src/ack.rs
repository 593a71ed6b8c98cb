//! # ACK Frame Creation
//!
//! Records every processed packet number per space and turns the record
//! into ACK frames. The packetizer asks for the ACK last, so an ACK rides
//! along whenever a packet is built anyway; a pass with nothing else to say
//! produces an ACK only if an ack-eliciting packet is owed one.

use crate::frames::{AckFrame, AckRange, Frame, FrameSource};
use crate::types::{EncryptionLevel, PacketNumber, PnSpace};
use std::collections::BTreeSet;
use tinyvec::TinyVec;

#[derive(Debug, Default)]
struct AckSpace {
    recorded: BTreeSet<PacketNumber>,
    /// An ack-eliciting packet arrived since the last ACK went out.
    ack_pending: bool,
}

impl AckSpace {
    fn build_frame(&mut self) -> Option<AckFrame> {
        // Fold the recorded numbers, walked descending, into contiguous
        // (high, low) runs.
        let mut runs: Vec<(PacketNumber, PacketNumber)> = Vec::new();
        for &pn in self.recorded.iter().rev() {
            match runs.last_mut() {
                Some((_, low)) if pn + 1 == *low => *low = pn,
                _ => runs.push((pn, pn)),
            }
        }
        let (largest_acked, first_low) = *runs.first()?;

        // RFC 9000 encoding: gap counts skipped packets minus one.
        let mut ranges: TinyVec<[AckRange; 8]> = TinyVec::new();
        let mut prev_low = first_low;
        for &(high, low) in &runs[1..] {
            ranges.push(AckRange {
                gap: prev_low - high - 2,
                length: high - low,
            });
            prev_low = low;
        }

        self.recorded.clear();
        self.ack_pending = false;

        Some(AckFrame {
            largest_acked,
            ack_delay: 0,
            first_ack_range: largest_acked - first_low,
            ranges,
        })
    }
}

/// Per-space ACK bookkeeping.
#[derive(Debug, Default)]
pub struct AckFrameCreator {
    spaces: [AckSpace; 3],
}

impl AckFrameCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processed packet. `should_send_ack` marks the packet as
    /// ack-eliciting.
    pub fn update(&mut self, level: EncryptionLevel, packet_number: PacketNumber, should_send_ack: bool) {
        let space = &mut self.spaces[level.pn_space().index()];
        space.recorded.insert(packet_number);
        space.ack_pending |= should_send_ack;
    }

    /// Forget everything for one space.
    pub fn reset_space(&mut self, space: PnSpace) {
        self.spaces[space.index()] = AckSpace::default();
    }
}

impl FrameSource for AckFrameCreator {
    fn will_generate_frame(&self, level: EncryptionLevel) -> bool {
        self.spaces[level.pn_space().index()].ack_pending
    }

    fn generate_frame(&mut self, level: EncryptionLevel, _credit: u64, max_size: usize) -> Option<Frame> {
        let space = &mut self.spaces[level.pn_space().index()];
        if space.recorded.is_empty() {
            return None;
        }
        let frame = Frame::Ack(space.build_frame()?);
        if crate::frames::codec::encoded_size(&frame) > max_size {
            return None;
        }
        Some(frame)
    }
}
