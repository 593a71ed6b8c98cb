//! # Loss Recovery Seams (RFC 9002)
//!
//! The connection core does not implement loss detection or a congestion
//! algorithm; it drives them through these traits, one loss detector per
//! packet number space. The crate ships bookkeeping defaults so the core
//! runs without importing an algorithm, plus the frame retransmitter that
//! replays frames from packets a detector declared lost.

use crate::frames::{codec, Frame, FrameSource};
use crate::packet::Packet;
use crate::types::EncryptionLevel;
use core::time::Duration;

/// Initial RTT before any sample exists (RFC 9002 Section 6.2.2).
pub const INITIAL_RTT: Duration = Duration::from_millis(333);

/// Per-space loss detection surface.
///
/// Ownership of sent packets transfers in via `on_packet_sent`; ACK
/// processing happens behind this trait when the dispatcher routes ACK
/// frames here.
pub trait LossDetector: Send {
    fn on_packet_sent(&mut self, packet: Packet);

    /// Largest packet number the peer has acknowledged in this space.
    fn largest_acked_packet_number(&self) -> u64;

    fn on_ack_received(&mut self, frame: &crate::frames::AckFrame);

    /// Current retransmission timeout, used to size the 3xRTO persistence
    /// and path-validation windows.
    fn current_rto_period(&self) -> Duration;

    /// Discard all transport state except packet numbers.
    fn reset(&mut self);

    /// Final teardown; no calls follow.
    fn shutdown(&mut self);
}

/// Congestion control surface. `open_window` bounds each packetization
/// pass; the algorithm behind it is not this crate's concern.
pub trait CongestionController: Send {
    /// Bytes that may be sent right now. Zero stops the pass.
    fn open_window(&self) -> usize;

    fn on_packet_sent(&mut self, bytes: usize);

    fn reset(&mut self);
}

/// Default loss detector: tracks what was sent and acknowledged, answers
/// RTO queries with the RFC initial value. Loss declaration belongs to a
/// real detector supplied by the integrator.
#[derive(Debug, Default)]
pub struct BookkeepingLossDetector {
    sent_count: u64,
    largest_acked: u64,
}

impl LossDetector for BookkeepingLossDetector {
    fn on_packet_sent(&mut self, _packet: Packet) {
        self.sent_count += 1;
    }

    fn largest_acked_packet_number(&self) -> u64 {
        self.largest_acked
    }

    fn on_ack_received(&mut self, frame: &crate::frames::AckFrame) {
        if frame.largest_acked > self.largest_acked {
            self.largest_acked = frame.largest_acked;
        }
    }

    fn current_rto_period(&self) -> Duration {
        INITIAL_RTT * 2
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn shutdown(&mut self) {}
}

/// Default congestion controller: a fixed window drained by bytes in
/// flight that only refills on `reset`.
#[derive(Debug)]
pub struct StaticWindowController {
    window: usize,
    bytes_in_flight: usize,
}

impl StaticWindowController {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            bytes_in_flight: 0,
        }
    }
}

impl CongestionController for StaticWindowController {
    fn open_window(&self) -> usize {
        self.window.saturating_sub(self.bytes_in_flight)
    }

    fn on_packet_sent(&mut self, bytes: usize) {
        self.bytes_in_flight += bytes;
    }

    fn reset(&mut self) {
        self.bytes_in_flight = 0;
    }
}

/// Replays frames from lost packets.
///
/// `retransmit_packet` re-parses the lost packet's plaintext payload and
/// queues every retransmittable frame for its packet number space; the
/// packetizer drains the queue in its fixed producer order.
#[derive(Debug, Default)]
pub struct PacketRetransmitter {
    queues: [std::collections::VecDeque<Frame>; 3],
}

impl PacketRetransmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retransmit_packet(&mut self, packet: &Packet) {
        let Some(level) = packet.ty.encryption_level() else {
            return;
        };
        let queue = &mut self.queues[level.pn_space().index()];

        let mut offset = 0;
        while offset < packet.payload.len() {
            match codec::parse_frame(&packet.payload[offset..]) {
                Ok((frame, consumed)) => {
                    offset += consumed;
                    if frame.is_retransmittable() {
                        queue.push_back(frame);
                    }
                }
                Err(_) => break,
            }
        }
    }

    pub fn reset(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
    }
}

impl FrameSource for PacketRetransmitter {
    fn will_generate_frame(&self, level: EncryptionLevel) -> bool {
        !self.queues[level.pn_space().index()].is_empty()
    }

    fn generate_frame(&mut self, level: EncryptionLevel, _credit: u64, max_size: usize) -> Option<Frame> {
        let queue = &mut self.queues[level.pn_space().index()];
        let frame = queue.front()?;
        if codec::encoded_size(frame) > max_size {
            return None;
        }
        queue.pop_front()
    }
}
