//! # QUIC Connection State Machine (RFC 9000 Section 5, 10)
//!
//! One [`QuicConnection`] owns a connection from the first received
//! datagram to its terminal `Closed` state: packet ingress/egress, TLS
//! handshake progression, connection-level flow control, migration, and
//! close orchestration, all under a single-threaded cooperative event
//! discipline. The UDP receiver thread touches nothing but the receive
//! queue; every other mutation happens on the owning scheduler thread.

pub mod cids;
pub mod recv_queue;


pub use cids::ConnectionIds;
pub use recv_queue::{PacketCreationResult, RecvQueue};

use crate::ack::AckFrameCreator;
use crate::altcid::AltConnectionIdManager;
use crate::config::QuicConfig;
use crate::error::{ConnectionError, ErrorClass, Result, TransErrorCode};
use crate::events::{EventScheduler, EventToken, NetEvent, TimerSlot};
use crate::flow_control::{LocalFlowController, RemoteFlowController};
use crate::frames::{
    codec, ApplicationCloseFrame, ConnectionCloseFrame, Frame, FrameDispatcher, FrameHandler,
    FrameSource, FrameType,
};
use crate::handshake::HandshakeHandler;
use crate::net::{
    ApplicationEndpoint, ConnectionHandle, ConnectionTable, NetAppEvent, NetHandler,
    NextProtocolSet, UdpDatagram, UdpSender,
};
use crate::packet::{self, Packet, PacketFactory, PacketType};
use crate::recovery::{CongestionController, LossDetector, PacketRetransmitter};
use crate::stream::StreamManager;
use crate::path::PathValidator;
use crate::types::{
    ConnectionId, Direction, EncryptionLevel, FiveTuple, PacketNumber, DEFAULT_APP_PROTOCOL,
    PROTO_TAG_QUIC, PROTO_TAG_UDP,
};
use bytes::{Bytes, BytesMut};
use core::time::Duration;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

const IPV4_HEADER_SIZE: u32 = 20;
const IPV6_HEADER_SIZE: u32 = 40;
const UDP_HEADER_SIZE: u32 = 8;
/// Max long header length without the token length of an Initial packet.
const MAX_PACKET_OVERHEAD: usize = 62;
const MAX_STREAM_FRAME_OVERHEAD: u64 = 24;
const MINIMUM_INITIAL_PACKET_SIZE: u32 = 1200;
const WRITE_READY_INTERVAL: Duration = Duration::from_millis(20);
const PACKET_PER_EVENT: u32 = 32;
/// Interrupt sending STREAM frames to let an ACK frame through.
const MAX_CONSECUTIVE_STREAMS: u64 = 8;

const MAX_PACKETS_WITHOUT_SRC_ADDR_VALIDATION: u32 = 3;

const STATE_CLOSING_MAX_SEND_PKT_NUM: u32 = 8;
/// Max receive window while closing: 2^8 packets.
const STATE_CLOSING_MAX_RECV_PKT_WIND: u32 = 1 << STATE_CLOSING_MAX_SEND_PKT_NUM;

/// Connection-level frames this core handles itself.
const SELF_INTERESTS: [FrameType; 5] = [
    FrameType::ApplicationClose,
    FrameType::ConnectionClose,
    FrameType::Blocked,
    FrameType::MaxData,
    FrameType::NewConnectionId,
];

fn lock<'a, T: ?Sized>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Created, waiting for the first event dispatch.
    PreHandshake,
    /// Handshake packets flowing.
    Handshake,
    /// Handshake complete, application running.
    Established,
    /// Local close: resend the final packet, wait out 3xRTO.
    Closing,
    /// Peer close or idle timeout: wait out 3xRTO, emit nothing.
    Draining,
    /// Terminal.
    Closed,
}

/// How a state handler leaves the event loop.
enum Flow {
    Done,
    /// The state changed; the same event is handled again by the new state.
    Redeliver,
}

/// Everything a connection borrows from its surroundings.
pub struct ConnectionContext {
    pub config: Arc<QuicConfig>,
    pub handshake: Box<dyn HandshakeHandler>,
    pub stream_manager: Box<dyn StreamManager>,
    pub loss_detectors: [Box<dyn LossDetector>; 3],
    pub congestion_controller: Box<dyn CongestionController>,
    pub udp: Arc<dyn UdpSender>,
    pub connection_table: Option<Arc<dyn ConnectionTable>>,
    pub net_handler: Box<dyn NetHandler>,
    pub scheduler: Box<dyn EventScheduler>,
    /// ALPN-keyed application endpoints; required on inbound.
    pub protocol_set: Option<Arc<dyn NextProtocolSet>>,
    /// Initiating continuation; required on outbound.
    pub open_endpoint: Option<Arc<dyn ApplicationEndpoint>>,
}

/// A per-connection QUIC endpoint state machine.
pub struct QuicConnection {
    handle: ConnectionHandle,
    direction: Direction,
    state: ConnState,
    five_tuple: FiveTuple,
    pmtu: u32,
    config: Arc<QuicConfig>,

    cids: ConnectionIds,
    recv_queue: Arc<RecvQueue>,
    packet_factory: PacketFactory,

    handshake: Box<dyn HandshakeHandler>,
    stream_manager: Box<dyn StreamManager>,
    local_flow_controller: LocalFlowController,
    remote_flow_controller: RemoteFlowController,
    flow_control_buffer_size: u64,
    ack_creator: AckFrameCreator,
    path_validator: PathValidator,
    alt_cid_manager: Option<AltConnectionIdManager>,
    retransmitter: PacketRetransmitter,
    loss_detectors: [Mutex<Box<dyn LossDetector>>; 3],
    congestion_controller: Box<dyn CongestionController>,

    udp: Arc<dyn UdpSender>,
    connection_table: Option<Arc<dyn ConnectionTable>>,
    net_handler: Box<dyn NetHandler>,
    scheduler: Box<dyn EventScheduler>,
    protocol_set: Option<Arc<dyn NextProtocolSet>>,
    open_endpoint: Option<Arc<dyn ApplicationEndpoint>>,

    // Held in this order around packetization and closing-frame builds.
    packet_transmitter_mutex: Mutex<()>,
    frame_transmitter_mutex: Mutex<()>,

    packet_write_ready: TimerSlot,
    closing_timeout: TimerSlot,
    path_validation_timeout: TimerSlot,
    closed_event: TimerSlot,

    src_addr_verified: bool,
    application_started: bool,
    connection_migration_initiated: bool,
    handshake_packets_sent: u32,
    stream_frames_sent: u64,
    closing_recv_count: u32,
    closing_recv_window: u32,
    last_received_packet_type: Option<PacketType>,

    connection_error: Option<ConnectionError>,
    /// The one datagram resent verbatim for every write-ready in `Closing`.
    the_final_packet: Option<Bytes>,
}

impl QuicConnection {
    /// Create a connection and register its local and original CIDs in the
    /// shared table. Callable from the accept path before the connection
    /// is pinned to its scheduler thread.
    pub fn new(
        handle: ConnectionHandle,
        direction: Direction,
        five_tuple: FiveTuple,
        peer_cid: ConnectionId,
        original_cid: ConnectionId,
        ctx: ConnectionContext,
    ) -> Self {
        let local_cid = ConnectionId::random();
        if let Some(table) = &ctx.connection_table {
            table.insert(local_cid, handle);
            table.insert(original_cid, handle);
        }

        let cids = ConnectionIds::new(local_cid, peer_cid, original_cid);
        debug!(cids = %cids.tag(), dcid = %peer_cid, scid = %local_cid, "connection created");

        let [ld_initial, ld_handshake, ld_application] = ctx.loss_detectors;
        let pmtu = ctx.config.pmtu;

        Self {
            handle,
            direction,
            state: ConnState::PreHandshake,
            five_tuple,
            pmtu,
            config: ctx.config,
            cids,
            recv_queue: Arc::new(RecvQueue::new()),
            packet_factory: PacketFactory::new(),
            handshake: ctx.handshake,
            stream_manager: ctx.stream_manager,
            local_flow_controller: LocalFlowController::new(u64::MAX),
            remote_flow_controller: RemoteFlowController::new(u64::MAX),
            flow_control_buffer_size: 0,
            ack_creator: AckFrameCreator::new(),
            path_validator: PathValidator::new(),
            alt_cid_manager: None,
            retransmitter: PacketRetransmitter::new(),
            loss_detectors: [
                Mutex::new(ld_initial),
                Mutex::new(ld_handshake),
                Mutex::new(ld_application),
            ],
            congestion_controller: ctx.congestion_controller,
            udp: ctx.udp,
            connection_table: ctx.connection_table,
            net_handler: ctx.net_handler,
            scheduler: ctx.scheduler,
            protocol_set: ctx.protocol_set,
            open_endpoint: ctx.open_endpoint,
            packet_transmitter_mutex: Mutex::new(()),
            frame_transmitter_mutex: Mutex::new(()),
            packet_write_ready: TimerSlot::new(NetEvent::PacketWriteReady),
            closing_timeout: TimerSlot::new(NetEvent::ClosingTimeout),
            path_validation_timeout: TimerSlot::new(NetEvent::PathValidationTimeout),
            closed_event: TimerSlot::new(NetEvent::Shutdown),
            src_addr_verified: false,
            application_started: false,
            connection_migration_initiated: false,
            handshake_packets_sent: 0,
            stream_frames_sent: 0,
            closing_recv_count: 0,
            closing_recv_window: 1,
            last_received_packet_type: None,
            connection_error: None,
            the_final_packet: None,
        }
    }

    /// Kick off the handshake. Outbound sends its first flight on the next
    /// write-ready; inbound waits for the client's Initial packet.
    pub fn start(&mut self) -> Result<()> {
        match self.direction {
            Direction::Inbound => Ok(()),
            Direction::Outbound => {
                self.handshake.start(None)?;
                self.handshake.do_handshake()
            }
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.cids.local()
    }

    pub fn peer_connection_id(&self) -> ConnectionId {
        self.cids.peer()
    }

    pub fn original_connection_id(&self) -> ConnectionId {
        self.cids.original()
    }

    /// The dst-src debug tag, e.g. `"aaaaaaaa-bbbbbbbb"`.
    pub fn cids(&self) -> &str {
        self.cids.tag()
    }

    pub fn five_tuple(&self) -> FiveTuple {
        self.five_tuple
    }

    pub fn pmtu(&self) -> u32 {
        self.pmtu
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    pub fn connection_error(&self) -> Option<&ConnectionError> {
        self.connection_error.as_ref()
    }

    pub fn stream_manager(&mut self) -> &mut dyn StreamManager {
        self.stream_manager.as_mut()
    }

    /// Handle for the UDP receiver thread; enqueue-only.
    pub fn recv_queue(&self) -> Arc<RecvQueue> {
        self.recv_queue.clone()
    }

    pub fn last_received_packet_type(&self) -> Option<PacketType> {
        self.last_received_packet_type
    }

    /// True once the peer proved it owns its claimed address.
    pub fn src_addr_verified(&self) -> bool {
        self.src_addr_verified
    }

    /// Frame types this connection handles itself.
    pub fn interests(&self) -> &'static [FrameType] {
        &SELF_INTERESTS
    }

    pub fn largest_acked_packet_number(&self, level: EncryptionLevel) -> PacketNumber {
        lock(&self.loss_detectors[level.pn_space().index()]).largest_acked_packet_number()
    }

    /// Protocol tags, this layer first.
    pub fn populate_protocol(&self) -> Vec<&'static str> {
        vec![PROTO_TAG_QUIC, PROTO_TAG_UDP]
    }

    pub fn protocol_contains(&self, prefix: &str) -> Option<&'static str> {
        self.populate_protocol()
            .into_iter()
            .find(|tag| tag.starts_with(prefix))
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Append a received datagram. The only method safe to call from the
    /// UDP receiver thread.
    pub fn handle_received_packet(&self, datagram: UdpDatagram) {
        self.recv_queue.enqueue(datagram);
    }

    /// Close with `error`. Idempotent once closing or closed.
    pub fn close(&mut self, error: ConnectionError) {
        if matches!(self.state, ConnState::Closing | ConnState::Closed) {
            return;
        }
        self.switch_to_closing_state(error);
    }

    /// Feed frames from a packet a loss detector declared lost back into
    /// the packetizer.
    pub fn retransmit_packet(&mut self, packet: &Packet) {
        debug!(cids = %self.cids.tag(), ty = ?packet.ty, pn = packet.packet_number, "retransmit packet");
        self.retransmitter.retransmit_packet(packet);
    }

    /// Deliver one scheduler event. Timer events carry the token their
    /// slot armed; the slot asserts the identity on close.
    pub fn handle_event(&mut self, event: NetEvent, token: Option<EventToken>) {
        loop {
            let outcome = match self.state {
                ConnState::PreHandshake => self.state_pre_handshake(event, token),
                ConnState::Handshake => self.state_handshake(event, token),
                ConnState::Established => self.state_connection_established(event, token),
                ConnState::Closing => self.state_connection_closing(event, token),
                ConnState::Draining => self.state_connection_draining(event, token),
                ConnState::Closed => self.state_connection_closed(event, token),
            };
            match outcome {
                Ok(Flow::Done) => break,
                Ok(Flow::Redeliver) => continue,
                Err(err) => {
                    self.handle_error(err);
                    break;
                }
            }
        }
    }

    // ========================================================================
    // State handlers
    // ========================================================================

    fn state_pre_handshake(&mut self, _event: NetEvent, _token: Option<EventToken>) -> Result<Flow> {
        let timeout = match self.direction {
            Direction::Inbound => self.config.no_activity_timeout_in,
            Direction::Outbound => self.config.no_activity_timeout_out,
        };
        self.net_handler.set_inactivity_timeout(self.handle, Some(timeout));
        self.net_handler.add_to_active_queue(self.handle);

        self.switch_to_handshake_state();
        Ok(Flow::Redeliver)
    }

    fn state_handshake(&mut self, event: NetEvent, token: Option<EventToken>) -> Result<Flow> {
        if self.handshake_ready_to_establish() {
            self.switch_to_established_state()?;
            return Ok(Flow::Redeliver);
        }

        match event {
            NetEvent::PacketReadReady => {
                self.net_handler.net_activity(self.handle);
                loop {
                    let (packet, result) = self.dequeue_recv_packet();
                    match result {
                        PacketCreationResult::NotReady | PacketCreationResult::NoPacket => break,
                        PacketCreationResult::Failed => {
                            return Err(ConnectionError::transport(TransErrorCode::InternalError));
                        }
                        PacketCreationResult::Success | PacketCreationResult::Unsupported => {
                            if let Some(packet) = packet {
                                self.state_handshake_process_packet(packet)?;
                            }
                        }
                        PacketCreationResult::Ignored => {}
                    }

                    if self.handshake_ready_to_establish() {
                        self.switch_to_established_state()?;
                        return Ok(Flow::Redeliver);
                    }

                    if !matches!(
                        result,
                        PacketCreationResult::Success | PacketCreationResult::Ignored
                    ) {
                        break;
                    }
                }
            }
            NetEvent::PacketWriteReady => {
                self.close_packet_write_ready(token);
                self.state_common_send_packet()?;
                self.schedule_packet_write_ready(true);
            }
            NetEvent::PathValidationTimeout => self.handle_path_validation_timeout(token),
            NetEvent::Immediate => self.handle_idle_timeout(),
            other => debug!(cids = %self.cids.tag(), event = ?other, "unexpected event in handshake"),
        }

        Ok(Flow::Done)
    }

    fn state_connection_established(&mut self, event: NetEvent, token: Option<EventToken>) -> Result<Flow> {
        match event {
            NetEvent::PacketReadReady => self.state_connection_established_receive_packet()?,
            NetEvent::PacketWriteReady => {
                self.close_packet_write_ready(token);
                self.state_common_send_packet()?;
                self.schedule_packet_write_ready(true);
            }
            NetEvent::PathValidationTimeout => self.handle_path_validation_timeout(token),
            NetEvent::Immediate => self.handle_idle_timeout(),
            other => debug!(cids = %self.cids.tag(), event = ?other, "unexpected event in established"),
        }
        Ok(Flow::Done)
    }

    fn state_connection_closing(&mut self, event: NetEvent, token: Option<EventToken>) -> Result<Flow> {
        match event {
            NetEvent::PacketReadReady => self.state_closing_receive_packet(),
            NetEvent::PacketWriteReady => {
                self.close_packet_write_ready(token);
                self.state_closing_send_packet();
            }
            NetEvent::PathValidationTimeout => self.handle_path_validation_timeout(token),
            NetEvent::ClosingTimeout => {
                self.close_closing_timeout(token);
                self.switch_to_close_state();
            }
            other => {
                debug!(cids = %self.cids.tag(), event = ?other, "unexpected event in closing");
                debug_assert!(false, "unexpected event in closing: {other:?}");
            }
        }
        Ok(Flow::Done)
    }

    fn state_connection_draining(&mut self, event: NetEvent, token: Option<EventToken>) -> Result<Flow> {
        match event {
            NetEvent::PacketReadReady => self.state_draining_receive_packet(),
            NetEvent::PacketWriteReady => {
                // An endpoint in the draining state MUST NOT send packets.
                // This is the only difference from the closing state.
                self.close_packet_write_ready(token);
            }
            NetEvent::PathValidationTimeout => self.handle_path_validation_timeout(token),
            NetEvent::ClosingTimeout => {
                self.close_closing_timeout(token);
                self.switch_to_close_state();
            }
            other => {
                debug!(cids = %self.cids.tag(), event = ?other, "unexpected event in draining");
                debug_assert!(false, "unexpected event in draining: {other:?}");
            }
        }
        Ok(Flow::Done)
    }

    fn state_connection_closed(&mut self, event: NetEvent, token: Option<EventToken>) -> Result<Flow> {
        match event {
            NetEvent::Shutdown => {
                self.unschedule_packet_write_ready();
                self.unschedule_closing_timeout();
                self.unschedule_path_validation_timeout();
                if let Some(token) = token {
                    self.closed_event.close(token);
                }
                self.net_handler.set_inactivity_timeout(self.handle, None);

                for detector in &self.loss_detectors {
                    lock(detector).shutdown();
                }

                self.remove_connection_ids();
                self.net_handler.reclaim(self.handle);
            }
            NetEvent::PacketWriteReady => self.close_packet_write_ready(token),
            other => debug!(cids = %self.cids.tag(), event = ?other, "unexpected event in closed"),
        }
        Ok(Flow::Done)
    }

    // ========================================================================
    // Receive path
    // ========================================================================

    fn dequeue_recv_packet(&mut self) -> (Option<Packet>, PacketCreationResult) {
        let (packet, result) = self.recv_queue.dequeue(self.handshake.as_ref(), &self.cids.local());

        if result == PacketCreationResult::Success {
            if let Some(packet) = &packet {
                // A server may answer with its own source CID; adopt it.
                if self.direction == Direction::Outbound
                    && !packet.scid.is_zero()
                    && packet.scid != self.cids.peer()
                {
                    self.cids.update_peer(packet.scid);
                }
                self.last_received_packet_type = Some(packet.ty);
                debug!(cids = %self.cids.tag(), ty = ?packet.ty, pn = packet.packet_number, "[RX] packet");
            }
        } else {
            debug!(cids = %self.cids.tag(), result = ?result, "[RX] no packet");
        }

        (packet, result)
    }

    fn state_handshake_process_packet(&mut self, packet: Packet) -> Result<()> {
        match packet.ty {
            PacketType::VersionNegotiation => {
                self.state_handshake_process_version_negotiation_packet(packet)
            }
            PacketType::Initial => self.state_handshake_process_initial_packet(packet),
            PacketType::Retry => self.state_handshake_process_retry_packet(packet),
            PacketType::Handshake => self.state_handshake_process_handshake_packet(packet),
            PacketType::ZeroRttProtected => self.state_handshake_process_zero_rtt_packet(packet),
            PacketType::Protected => {
                debug!(cids = %self.cids.tag(), "protected packet before established");
                Err(ConnectionError::transport(TransErrorCode::InternalError))
            }
        }
    }

    fn state_handshake_process_version_negotiation_packet(&mut self, packet: Packet) -> Result<()> {
        if packet.dcid != self.cids.local() {
            debug!(cids = %self.cids.tag(), "ignore version negotiation packet");
            return Ok(());
        }
        if self.handshake.is_version_negotiated() {
            debug!(cids = %self.cids.tag(), "ignore version negotiation; already negotiated");
            return Ok(());
        }

        self.handshake.negotiate_version(&packet)?;

        // Discard all transport state except packet numbers.
        for detector in &self.loss_detectors {
            lock(detector).reset();
        }
        self.congestion_controller.reset();
        {
            let _ptx = lock(&self.packet_transmitter_mutex);
            self.retransmitter.reset();
        }

        // Start the handshake over.
        self.handshake.reset();
        self.handshake.do_handshake()?;
        self.schedule_packet_write_ready(false);

        Ok(())
    }

    fn state_handshake_process_initial_packet(&mut self, packet: Packet) -> Result<()> {
        if self.direction == Direction::Inbound {
            self.handshake.start(Some(&packet))?;

            // If version negotiation failed, a VN packet went out; done here.
            if self.handshake.is_version_negotiated() {
                self.recv_and_ack(packet)?;
                if !self.handshake.has_remote_tp() {
                    return Err(ConnectionError::transport(TransErrorCode::TransportParameterError));
                }
            }
            Ok(())
        } else {
            // The outbound handshake already started on connect.
            self.recv_and_ack(packet)
        }
    }

    fn state_handshake_process_retry_packet(&mut self, packet: Packet) -> Result<()> {
        // Discard all transport state.
        self.handshake.reset();
        for detector in &self.loss_detectors {
            lock(detector).reset();
        }
        self.congestion_controller.reset();
        {
            let _ptx = lock(&self.packet_transmitter_mutex);
            self.retransmitter.reset();
        }

        let result = self.recv_and_ack(packet);

        // Packet numbers of a Retry echo the Initial; drop what's queued.
        self.recv_queue.reset();

        self.cids.rerandomize_original();
        let original = self.cids.original();
        self.handshake.initialize_key_materials(&original);

        result
    }

    fn state_handshake_process_handshake_packet(&mut self, packet: Packet) -> Result<()> {
        // Any message protected with Handshake keys proves the peer owns
        // the address it claims.
        if self.direction == Direction::Inbound && !self.src_addr_verified {
            self.src_addr_verified = true;
            debug!(cids = %self.cids.tag(), "source address verified");
        }
        self.recv_and_ack(packet)
    }

    fn state_handshake_process_zero_rtt_packet(&mut self, packet: Packet) -> Result<()> {
        let local_tp = self.handshake.local_transport_parameters();
        let remote_tp = self.handshake.remote_transport_parameters();
        self.stream_manager.init_flow_control_params(&local_tp, &remote_tp);
        self.start_application()?;
        self.recv_and_ack(packet)
    }

    fn state_connection_established_receive_packet(&mut self) -> Result<()> {
        self.net_handler.net_activity(self.handle);
        loop {
            let (packet, result) = self.dequeue_recv_packet();
            match result {
                PacketCreationResult::Failed => {
                    return Err(ConnectionError::transport(TransErrorCode::InternalError));
                }
                PacketCreationResult::NoPacket | PacketCreationResult::NotReady => return Ok(()),
                PacketCreationResult::Ignored => continue,
                PacketCreationResult::Success | PacketCreationResult::Unsupported => {}
            }
            let Some(packet) = packet else {
                return Ok(());
            };

            match packet.ty {
                PacketType::Protected => {
                    self.state_connection_established_migrate_connection(&packet)?;
                    if self.direction == Direction::Outbound {
                        self.state_connection_established_initiate_connection_migration()?;
                    }
                    self.recv_and_ack(packet)?;
                }
                PacketType::Initial | PacketType::Handshake | PacketType::ZeroRttProtected => {
                    // Ack them; stale stream data is discarded by offset.
                    self.recv_and_ack(packet)?;
                }
                other => {
                    debug!(cids = %self.cids.tag(), ty = ?other, "unknown packet type");
                    return Err(ConnectionError::transport(TransErrorCode::InternalError));
                }
            }

            if result != PacketCreationResult::Success {
                return Ok(());
            }
        }
    }

    fn state_closing_receive_packet(&mut self) {
        while !self.recv_queue.is_empty() {
            let (packet, result) = self.dequeue_recv_packet();
            match result {
                PacketCreationResult::Success => {
                    if let Some(packet) = packet {
                        // VN packets mean nothing once closing.
                        if packet.ty != PacketType::VersionNegotiation {
                            let _ = self.recv_and_ack(packet);
                        }
                    }
                }
                PacketCreationResult::NotReady => break,
                _ => {}
            }
            self.closing_recv_count += 1;

            if self.closing_recv_window < STATE_CLOSING_MAX_RECV_PKT_WIND
                && self.closing_recv_count >= self.closing_recv_window
            {
                self.closing_recv_count = 0;
                self.closing_recv_window <<= 1;
                self.schedule_packet_write_ready(true);
                break;
            }
        }
    }

    fn state_draining_receive_packet(&mut self) {
        while !self.recv_queue.is_empty() {
            let (packet, result) = self.dequeue_recv_packet();
            match result {
                PacketCreationResult::Success => {
                    if let Some(packet) = packet {
                        // No write-ready is scheduled from here: an endpoint
                        // in the draining state MUST NOT send packets.
                        let _ = self.recv_and_ack(packet);
                    }
                }
                PacketCreationResult::NotReady => break,
                _ => {}
            }
        }
    }

    /// Parse, route, reconcile flow control, and record for ACK.
    fn recv_and_ack(&mut self, packet: Packet) -> Result<()> {
        let level = packet
            .ty
            .encryption_level()
            .unwrap_or(EncryptionLevel::OneRtt);

        let (frames, summary) = FrameDispatcher::parse_payload(&packet.payload)?;
        for frame in &frames {
            self.route_frame(level, frame)?;
        }

        let mut should_send_ack = summary.should_send_ack;
        if packet.ty == PacketType::Retry {
            should_send_ack = false;
        }

        if summary.is_flow_controlled {
            let received = self.stream_manager.total_offset_received();
            self.local_flow_controller.update(received)?;

            let reordered = self.stream_manager.total_reordered_bytes();
            self.local_flow_controller
                .forward_limit(reordered + self.flow_control_buffer_size);
        }

        self.ack_creator.update(level, packet.packet_number, should_send_ack);

        Ok(())
    }

    /// Hand one frame to every handler that registered interest in it.
    fn route_frame(&mut self, level: EncryptionLevel, frame: &Frame) -> Result<()> {
        let ty = frame.frame_type();

        if SELF_INTERESTS.contains(&ty) || ty == FrameType::Ping {
            self.handle_own_frame(level, frame)?;
        }
        if self.handshake.interests().contains(&ty) {
            self.handshake.handle_frame(level, frame)?;
        }
        if self.stream_manager.interests().contains(&ty) {
            self.stream_manager.handle_frame(level, frame)?;
        }
        if self.path_validator.interests().contains(&ty) {
            self.path_validator.handle_frame(level, frame)?;
        }
        if let Frame::Ack(ack_frame) = frame {
            lock(&self.loss_detectors[level.pn_space().index()]).on_ack_received(ack_frame);
        }

        Ok(())
    }

    /// Frames in this connection's own interest set.
    fn handle_own_frame(&mut self, _level: EncryptionLevel, frame: &Frame) -> Result<()> {
        match frame {
            Frame::MaxData(max_data) => {
                self.remote_flow_controller.forward_limit(max_data.maximum_data);
                // New credit may unblock transmission.
                self.schedule_packet_write_ready(false);
            }
            Frame::Ping => {}
            Frame::Blocked(_) => {
                // Diagnostic only.
            }
            Frame::NewConnectionId(ncid) => {
                if ncid.connection_id.is_zero() {
                    return Err(ConnectionError::transport(TransErrorCode::ProtocolViolation)
                        .with_reason("received zero-length cid")
                        .with_frame_type(FrameType::NewConnectionId));
                }
                self.cids.push_remote_alt(ncid.connection_id);
            }
            Frame::ConnectionClose(close) => {
                if matches!(self.state, ConnState::Closed | ConnState::Draining) {
                    return Ok(());
                }
                // Receiving a closing frame confirms the peer is closing;
                // move straight to draining.
                self.switch_to_draining_state(ConnectionError::transport_code(close.error_code));
            }
            Frame::ApplicationClose(close) => {
                if matches!(self.state, ConnState::Closed | ConnState::Draining) {
                    return Ok(());
                }
                self.switch_to_draining_state(ConnectionError::application(close.error_code));
            }
            other => {
                debug!(cids = %self.cids.tag(), frame = ?other.frame_type(), "unexpected frame type");
                debug_assert!(false, "unexpected frame routed to connection");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Send path
    // ========================================================================

    /// One packetization pass: up to PACKET_PER_EVENT datagrams, each
    /// bounded by the congestion window and the PMTU, packets in strict
    /// epoch order within a datagram.
    fn state_common_send_packet(&mut self) -> Result<()> {
        let mut packet_count: u32 = 0;
        let mut stop = false;

        while !stop && packet_count < PACKET_PER_EVENT {
            let window = self.congestion_controller.open_window();
            if window == 0 {
                break;
            }

            let udp_payload_len = window.min(self.pmtu as usize);
            let mut udp_payload = BytesMut::with_capacity(udp_payload_len);

            for level in EncryptionLevel::SEND_ORDER {
                if self.direction == Direction::Inbound
                    && !self.src_addr_verified
                    && self.handshake_packets_sent >= MAX_PACKETS_WITHOUT_SRC_ADDR_VALIDATION
                {
                    stop = true;
                    break;
                }

                let max_packet_size = udp_payload_len - udp_payload.len();
                let Some(packet) = self.packetize_frames(level, max_packet_size)? else {
                    continue;
                };

                if self.direction == Direction::Inbound
                    && matches!(packet.ty, PacketType::Initial | PacketType::Handshake)
                {
                    self.handshake_packets_sent += 1;
                }

                let base = udp_payload.len();
                let pn_offset = base + packet.store(&mut udp_payload);
                let mask = self
                    .handshake
                    .pn_protection_mask(level, packet::pn_sample(&udp_payload, pn_offset));
                packet::protect_packet_number(&mut udp_payload, pn_offset, &mask);

                debug!(
                    cids = %self.cids.tag(),
                    ty = ?packet.ty,
                    pn = packet.packet_number,
                    size = packet.size(),
                    "[TX] packet"
                );

                lock(&self.loss_detectors[level.pn_space().index()]).on_packet_sent(packet);
                packet_count += 1;
            }

            if udp_payload.is_empty() {
                break;
            }
            self.congestion_controller.on_packet_sent(udp_payload.len());
            self.udp.send_packet(udp_payload.freeze());
        }

        if packet_count > 0 {
            self.net_handler.net_activity(self.handle);
        }

        Ok(())
    }

    /// Build one packet for `level`, polling every frame producer in the
    /// fixed interoperability order.
    fn packetize_frames(&mut self, level: EncryptionLevel, max_packet_size: usize) -> Result<Option<Packet>> {
        if max_packet_size <= MAX_PACKET_OVERHEAD {
            return Ok(None);
        }
        let mut max_frame_size =
            (max_packet_size - MAX_PACKET_OVERHEAD).min(self.maximum_stream_frame_data_size() as usize);

        let _ptx = lock(&self.packet_transmitter_mutex);
        let _ftx = lock(&self.frame_transmitter_mutex);

        let mut payload = BytesMut::new();
        let mut frame_count = 0usize;
        let mut probing = false;

        // CRYPTO
        while let Some(frame) = self.handshake.generate_frame(level, u64::MAX, max_frame_size) {
            store_frame(&mut payload, &mut max_frame_size, &mut frame_count, &mut probing, frame);
        }

        // PATH_CHALLENGE, PATH_RESPONSE
        if let Some(frame) = self.path_validator.generate_frame(level, u64::MAX, max_frame_size) {
            store_frame(&mut payload, &mut max_frame_size, &mut frame_count, &mut probing, frame);
        }

        // NEW_CONNECTION_ID
        if let Some(manager) = &mut self.alt_cid_manager {
            while let Some(frame) = manager.generate_frame(level, u64::MAX, max_frame_size) {
                store_frame(&mut payload, &mut max_frame_size, &mut frame_count, &mut probing, frame);
            }
        }

        // Lost frames
        while let Some(frame) = self.retransmitter.generate_frame(level, u64::MAX, max_frame_size) {
            store_frame(&mut payload, &mut max_frame_size, &mut frame_count, &mut probing, frame);
        }

        // MAX_DATA
        if let Some(frame) = self.local_flow_controller.generate_frame(level, u64::MAX, max_frame_size) {
            store_frame(&mut payload, &mut max_frame_size, &mut frame_count, &mut probing, frame);
        }

        // BLOCKED, only while the stream manager is actually starved
        if self.remote_flow_controller.credit() == 0 && self.stream_manager.will_generate_frame(level) {
            if let Some(frame) =
                self.remote_flow_controller.generate_frame(level, u64::MAX, max_frame_size)
            {
                store_frame(&mut payload, &mut max_frame_size, &mut frame_count, &mut probing, frame);
            }
        }

        // STREAM family; suppressed while a new path is being validated
        if !self.path_validator.is_validating() {
            while let Some(frame) = self.stream_manager.generate_frame(
                level,
                self.remote_flow_controller.credit(),
                max_frame_size,
            ) {
                if frame.frame_type() == FrameType::Stream {
                    let sent = self.stream_manager.total_offset_sent();
                    self.remote_flow_controller.update(sent)?;
                }
                store_frame(&mut payload, &mut max_frame_size, &mut frame_count, &mut probing, frame);

                self.stream_frames_sent += 1;
                if self.stream_frames_sent % MAX_CONSECUTIVE_STREAMS == 0 {
                    break;
                }
            }
        }

        // ACK rides along when anything else is going out; alone, only
        // when an ack-eliciting packet is owed one.
        let ack_frame = if frame_count == 0 {
            if self.ack_creator.will_generate_frame(level) {
                self.ack_creator.generate_frame(level, u64::MAX, max_frame_size)
            } else {
                None
            }
        } else {
            self.ack_creator.generate_frame(level, u64::MAX, max_frame_size)
        };
        let mut ack_only = false;
        if let Some(frame) = ack_frame {
            ack_only = frame_count == 0;
            store_frame(&mut payload, &mut max_frame_size, &mut frame_count, &mut probing, frame);
        }

        if payload.is_empty() {
            return Ok(None);
        }

        // The first client Initial must reach the 1200-byte floor; inbound
        // protected packets get a small random pad against traffic
        // analysis.
        let pad_to = match (level, self.direction) {
            (EncryptionLevel::Initial, Direction::Outbound) => Some(self.minimum_quic_packet_size()),
            (EncryptionLevel::OneRtt, Direction::Inbound) => Some(self.minimum_quic_packet_size()),
            _ => None,
        };
        if let Some(min_size) = pad_to {
            let min_size = (min_size as usize).min(max_packet_size);
            if min_size > payload.len() {
                payload.resize(min_size, 0);
            }
        }

        drop(_ftx);
        drop(_ptx);
        Ok(Some(self.build_packet(level, payload.freeze(), !ack_only, probing)))
    }

    fn build_packet(&mut self, level: EncryptionLevel, payload: Bytes, retransmittable: bool, probing: bool) -> Packet {
        match level {
            EncryptionLevel::Initial => {
                let dcid = match self.direction {
                    Direction::Outbound => self.cids.original(),
                    Direction::Inbound => self.cids.peer(),
                };
                self.packet_factory
                    .create_initial_packet(dcid, self.cids.local(), payload, retransmittable, probing)
            }
            EncryptionLevel::Handshake => self.packet_factory.create_handshake_packet(
                self.cids.peer(),
                self.cids.local(),
                payload,
                retransmittable,
                probing,
            ),
            EncryptionLevel::OneRtt => {
                self.packet_factory
                    .create_protected_packet(self.cids.peer(), payload, retransmittable, probing)
            }
            EncryptionLevel::ZeroRtt => {
                debug_assert!(false, "zero-rtt packets are never built");
                self.packet_factory
                    .create_protected_packet(self.cids.peer(), payload, retransmittable, probing)
            }
        }
    }

    /// Build and cache the one closing datagram. Later calls are no-ops;
    /// the closing state resends the cached bytes verbatim.
    fn packetize_closing_frame(&mut self) {
        let _ptx = lock(&self.packet_transmitter_mutex);
        let _ftx = lock(&self.frame_transmitter_mutex);

        if self.the_final_packet.is_some() {
            return;
        }
        let Some(error) = self.connection_error.clone() else {
            return;
        };

        let reason = error
            .reason
            .map(|reason| Bytes::from_static(reason.as_bytes()))
            .unwrap_or_default();
        let frame = match error.class {
            ErrorClass::Application => Frame::ApplicationClose(ApplicationCloseFrame {
                error_code: error.code,
                reason,
            }),
            ErrorClass::Transport => Frame::ConnectionClose(ConnectionCloseFrame {
                error_code: error.code,
                frame_type: error.frame_type.map(|ty| ty as u64).unwrap_or(0),
                reason,
            }),
        };

        let mut payload = BytesMut::new();
        codec::encode_frame(&frame, &mut payload);

        let mut level = self.handshake.current_encryption_level();
        debug_assert!(level != EncryptionLevel::ZeroRtt, "closing frames are never 0-RTT");
        if level == EncryptionLevel::ZeroRtt {
            level = EncryptionLevel::OneRtt;
        }

        drop(_ftx);
        drop(_ptx);
        let packet = self.build_packet(level, payload.freeze(), false, false);
        let mut datagram = BytesMut::new();
        let pn_offset = packet.store(&mut datagram);
        let mask = self
            .handshake
            .pn_protection_mask(level, packet::pn_sample(&datagram, pn_offset));
        packet::protect_packet_number(&mut datagram, pn_offset, &mask);

        self.the_final_packet = Some(datagram.freeze());
    }

    fn state_closing_send_packet(&mut self) {
        self.packetize_closing_frame();

        // During the closing period an endpoint SHOULD respond to any
        // received packet with another packet carrying the closing frame,
        // and MAY send the exact same packet each time.
        if let Some(datagram) = &self.the_final_packet {
            self.udp.send_packet(datagram.clone());
        }
    }

    // ========================================================================
    // Migration
    // ========================================================================

    fn state_connection_established_migrate_connection(&mut self, packet: &Packet) -> Result<()> {
        debug_assert!(self.handshake.is_completed());

        let dcid = packet.dcid;
        if dcid == self.cids.local() {
            return Ok(());
        }

        if self.direction == Direction::Inbound {
            if !self.cids.has_remote_alts() {
                // The peer tried to migrate before advertising any
                // NEW_CONNECTION_ID; nothing to rotate onto.
                debug!(cids = %self.cids.tag(), "ignore connection migration; no remote alternate cids");
                return Ok(());
            }
            debug!(cids = %self.cids.tag(), "connection migration initiated by remote");
        }

        let accepted = self
            .alt_cid_manager
            .as_mut()
            .map(|manager| manager.migrate_to(&dcid))
            .unwrap_or(false);

        if accepted {
            // The DCID the packet arrived on becomes our local CID.
            self.cids.update_local(dcid);

            if self.direction == Direction::Inbound {
                if let Some(from) = packet.from {
                    self.five_tuple.remote = from;
                }
                if let Some(peer) = self.cids.pop_remote_alt() {
                    self.cids.update_peer(peer);
                }
                self.validate_new_path();
            }
        } else {
            debug!(cids = %self.cids.tag(), cid = %dcid, "connection migration failed");
        }

        Ok(())
    }

    /// Outbound-only migration exercise: rotate once to the next peer CID.
    fn state_connection_established_initiate_connection_migration(&mut self) -> Result<()> {
        debug_assert!(self.handshake.is_completed());
        debug_assert!(self.direction == Direction::Outbound);

        let remote_tp = self.handshake.remote_transport_parameters();
        let alt_frames_outstanding = self
            .alt_cid_manager
            .as_ref()
            .map(|manager| manager.will_generate_frame(EncryptionLevel::OneRtt))
            .unwrap_or(false);

        if !self.config.cm_exercise_enabled
            || self.connection_migration_initiated
            || remote_tp.disable_migration
            || !self.cids.has_remote_alts()
            || alt_frames_outstanding
        {
            return Ok(());
        }

        debug!(cids = %self.cids.tag(), "initiated connection migration");
        self.connection_migration_initiated = true;

        if let Some(peer) = self.cids.pop_remote_alt() {
            self.cids.update_peer(peer);
        }
        self.validate_new_path();

        Ok(())
    }

    fn validate_new_path(&mut self) {
        self.path_validator.validate();
        // How long is "enough time" is not pinned down anywhere; reuse the
        // closing persistence window.
        let rto = self.current_rto_period();
        self.schedule_path_validation_timeout(3 * rto);
    }

    fn handle_path_validation_timeout(&mut self, token: Option<EventToken>) {
        if let Some(token) = token {
            self.path_validation_timeout.close(token);
        }
        if !self.path_validator.is_validated() {
            debug!(cids = %self.cids.tag(), "path validation timed out");
            self.switch_to_close_state();
        }
    }

    // ========================================================================
    // Handshake completion and application start
    // ========================================================================

    fn handshake_ready_to_establish(&self) -> bool {
        self.handshake.is_completed()
            && (self.direction == Direction::Inbound || self.handshake.has_remote_tp())
    }

    /// Returns false while completion is still pending.
    fn complete_handshake_if_possible(&mut self) -> Result<bool> {
        if self.state != ConnState::Handshake {
            return Ok(true);
        }
        if !self.handshake.is_completed() {
            return Ok(false);
        }
        if self.direction == Direction::Outbound && !self.handshake.has_remote_tp() {
            return Ok(false);
        }

        self.init_flow_control_params();
        self.start_application()?;

        Ok(true)
    }

    fn init_flow_control_params(&mut self) {
        let local_tp = self.handshake.local_transport_parameters();
        let remote_tp = self.handshake.remote_transport_parameters();
        self.stream_manager.init_flow_control_params(&local_tp, &remote_tp);

        self.flow_control_buffer_size = local_tp.initial_max_data;
        self.local_flow_controller.set_limit(local_tp.initial_max_data);
        self.remote_flow_controller.set_limit(remote_tp.initial_max_data);
        debug!(
            target: "quic::fc",
            cids = %self.cids.tag(),
            local = local_tp.initial_max_data,
            remote = remote_tp.initial_max_data,
            "flow control limits installed"
        );
    }

    fn start_application(&mut self) -> Result<()> {
        if self.application_started {
            return Ok(());
        }
        self.application_started = true;

        let app_name = self
            .handshake
            .negotiated_application_name()
            .unwrap_or_else(|| DEFAULT_APP_PROTOCOL.to_vec());

        match self.direction {
            Direction::Inbound => {
                let endpoint = self
                    .protocol_set
                    .as_ref()
                    .and_then(|protocols| protocols.find_endpoint(&app_name));
                match endpoint {
                    Some(endpoint) => endpoint.handle_net_event(NetAppEvent::Accept, self.handle),
                    None => {
                        return Err(ConnectionError::transport(TransErrorCode::VersionNegotiationError));
                    }
                }
            }
            Direction::Outbound => {
                if let Some(endpoint) = &self.open_endpoint {
                    endpoint.handle_net_event(NetAppEvent::Open, self.handle);
                }
            }
        }

        Ok(())
    }

    // ========================================================================
    // State switches and close orchestration
    // ========================================================================

    fn switch_to_handshake_state(&mut self) {
        debug!(cids = %self.cids.tag(), "enter state handshake");
        self.state = ConnState::Handshake;
    }

    fn switch_to_established_state(&mut self) -> Result<()> {
        let completed = self.complete_handshake_if_possible()?;
        debug_assert!(completed, "handshake has to be completed");

        debug!(cids = %self.cids.tag(), "enter state established");
        if let Some(cipher) = self.handshake.negotiated_cipher_suite() {
            debug!(cids = %self.cids.tag(), cipher, "negotiated cipher suite");
        }
        self.state = ConnState::Established;

        let remote_tp = self.handshake.remote_transport_parameters();
        let migration_possible = match self.direction {
            Direction::Inbound => true,
            Direction::Outbound => self.config.cm_exercise_enabled && !remote_tp.disable_migration,
        };
        if migration_possible {
            if let Some(table) = &self.connection_table {
                self.alt_cid_manager = Some(AltConnectionIdManager::new(
                    self.handle,
                    table.clone(),
                    &self.config.server_id,
                    self.config.num_alt_connection_ids,
                ));
            }
        }

        Ok(())
    }

    fn switch_to_closing_state(&mut self, error: ConnectionError) {
        if !self.complete_handshake_if_possible().unwrap_or(false) {
            debug!(cids = %self.cids.tag(), "switching state without handshake completion");
        }
        if let Some(reason) = error.reason {
            debug!(cids = %self.cids.tag(), reason, "closing");
        }

        self.connection_error = Some(error);
        self.schedule_packet_write_ready(false);

        self.net_handler.remove_from_active_queue(self.handle);
        self.net_handler.set_inactivity_timeout(self.handle, None);

        let rto = self.current_rto_period();

        debug!(cids = %self.cids.tag(), "enter state closing");
        self.state = ConnState::Closing;

        // The closing state SHOULD persist for three times the current RTO.
        self.schedule_closing_timeout(3 * rto);
    }

    fn switch_to_draining_state(&mut self, error: ConnectionError) {
        if !self.complete_handshake_if_possible().unwrap_or(false) {
            debug!(cids = %self.cids.tag(), "switching state without handshake completion");
        }
        if let Some(reason) = error.reason {
            debug!(cids = %self.cids.tag(), reason, "draining");
        }

        self.connection_error = Some(error);

        self.net_handler.remove_from_active_queue(self.handle);
        self.net_handler.set_inactivity_timeout(self.handle, None);

        let rto = self.current_rto_period();

        debug!(cids = %self.cids.tag(), "enter state draining");
        self.state = ConnState::Draining;

        // Same persistence window as closing; nothing is transmitted.
        self.schedule_closing_timeout(3 * rto);
    }

    fn switch_to_close_state(&mut self) {
        self.unschedule_closing_timeout();
        self.unschedule_path_validation_timeout();

        if !self.complete_handshake_if_possible().unwrap_or(false) {
            debug!(cids = %self.cids.tag(), "switching state without handshake completion");
        }
        debug!(cids = %self.cids.tag(), "enter state closed");
        self.state = ConnState::Closed;
        self.schedule_closed_event();
    }

    fn handle_idle_timeout(&mut self) {
        self.net_handler.remove_from_active_queue(self.handle);
        self.switch_to_draining_state(
            ConnectionError::transport(TransErrorCode::NoError).with_reason("Idle Timeout"),
        );
    }

    fn handle_error(&mut self, err: ConnectionError) {
        match err.class {
            ErrorClass::Application => {
                error!(cids = %self.cids.tag(), code = err.code, "application error");
            }
            ErrorClass::Transport => {
                warn!(cids = %self.cids.tag(), code = err.code, reason = ?err.reason, "transport error");
            }
        }
        self.close(err);
    }

    /// Drop this connection's CIDs from the shared table and invalidate
    /// every advertised alternate. Called once, on the way to reclamation.
    pub fn remove_connection_ids(&mut self) {
        if let Some(table) = &self.connection_table {
            table.erase(&self.cids.original(), self.handle);
            table.erase(&self.cids.local(), self.handle);
        }
        if let Some(manager) = &mut self.alt_cid_manager {
            manager.invalidate_alt_connections();
        }
    }

    fn current_rto_period(&self) -> Duration {
        let level = self.handshake.current_encryption_level();
        lock(&self.loss_detectors[level.pn_space().index()]).current_rto_period()
    }

    // ========================================================================
    // Packet sizing
    // ========================================================================

    /// Outbound: the Initial floor. Inbound: a small random pad length for
    /// protected packets, as traffic-analysis protection.
    fn minimum_quic_packet_size(&self) -> u32 {
        match self.direction {
            Direction::Outbound => MINIMUM_INITIAL_PACKET_SIZE,
            Direction::Inbound => 32 + (rand::random::<u32>() & 0x3f),
        }
    }

    fn maximum_quic_packet_size(&self) -> u32 {
        if self.five_tuple.is_ipv6() {
            self.pmtu - UDP_HEADER_SIZE - IPV6_HEADER_SIZE
        } else {
            self.pmtu - UDP_HEADER_SIZE - IPV4_HEADER_SIZE
        }
    }

    fn maximum_stream_frame_data_size(&self) -> u64 {
        self.maximum_quic_packet_size() as u64 - MAX_STREAM_FRAME_OVERHEAD - MAX_PACKET_OVERHEAD as u64
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn schedule_packet_write_ready(&mut self, delay: bool) {
        let delay = delay.then_some(WRITE_READY_INTERVAL);
        self.packet_write_ready.schedule(self.scheduler.as_mut(), delay);
    }

    fn unschedule_packet_write_ready(&mut self) {
        self.packet_write_ready.unschedule(self.scheduler.as_mut());
    }

    fn close_packet_write_ready(&mut self, token: Option<EventToken>) {
        if let Some(token) = token {
            self.packet_write_ready.close(token);
        }
    }

    fn schedule_closing_timeout(&mut self, interval: Duration) {
        self.closing_timeout.schedule(self.scheduler.as_mut(), Some(interval));
    }

    fn unschedule_closing_timeout(&mut self) {
        self.closing_timeout.unschedule(self.scheduler.as_mut());
    }

    fn close_closing_timeout(&mut self, token: Option<EventToken>) {
        if let Some(token) = token {
            self.closing_timeout.close(token);
        }
    }

    fn schedule_path_validation_timeout(&mut self, interval: Duration) {
        self.path_validation_timeout
            .schedule(self.scheduler.as_mut(), Some(interval));
    }

    fn unschedule_path_validation_timeout(&mut self) {
        self.path_validation_timeout.unschedule(self.scheduler.as_mut());
    }

    fn schedule_closed_event(&mut self) {
        self.closed_event.schedule(self.scheduler.as_mut(), None);
    }
}

/// Serialize one produced frame into the packet buffer and update the
/// packetization counters.
fn store_frame(
    payload: &mut BytesMut,
    max_frame_size: &mut usize,
    frame_count: &mut usize,
    probing: &mut bool,
    frame: Frame,
) {
    let size = codec::encoded_size(&frame);
    debug_assert!(size <= *max_frame_size, "producer exceeded its frame budget");

    debug!(frame = ?frame.frame_type(), size, "[TX] frame");
    *probing |= frame.is_probing();
    *frame_count += 1;
    *max_frame_size -= size;
    codec::encode_frame(&frame, payload);
}
