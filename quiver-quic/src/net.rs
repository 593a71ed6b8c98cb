//! # Network-Side Collaborator Seams
//!
//! The connection core neither owns a socket nor a connection table; both
//! belong to the surrounding endpoint. These traits are the contracts the
//! core consumes: a UDP sender for built datagrams, a connection table for
//! CID routing, a net handler for activity accounting and reclamation, and
//! the next-protocol hand-off that delivers accept/open events.

use crate::types::ConnectionId;
use bytes::Bytes;
use core::time::Duration;
use std::net::SocketAddr;

/// One received UDP datagram, ownership transferred into the core.
#[derive(Debug, Clone)]
pub struct UdpDatagram {
    pub data: Bytes,
    pub from: SocketAddr,
    pub to: SocketAddr,
}

/// Outbound UDP surface. Built datagrams flow out by move.
pub trait UdpSender: Send + Sync {
    fn send_packet(&self, payload: Bytes);
}

/// Identity of a connection inside shared tables.
///
/// Subcomponents refer to the connection by handle rather than by
/// reference, so shared structures never own the connection back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Shared CID-to-connection routing table.
pub trait ConnectionTable: Send + Sync {
    fn insert(&self, cid: ConnectionId, conn: ConnectionHandle);
    fn erase(&self, cid: &ConnectionId, conn: ConnectionHandle);
}

/// Activity accounting and reclamation, provided by the net handler that
/// drives this connection's scheduler thread.
pub trait NetHandler: Send {
    fn add_to_active_queue(&mut self, conn: ConnectionHandle);
    fn remove_from_active_queue(&mut self, conn: ConnectionHandle);
    /// `None` disables the inactivity timeout.
    fn set_inactivity_timeout(&mut self, conn: ConnectionHandle, timeout: Option<Duration>);
    /// Mark the connection as active (packets moved).
    fn net_activity(&mut self, conn: ConnectionHandle);
    /// Hand a closed connection back for reclamation.
    fn reclaim(&mut self, conn: ConnectionHandle);
}

/// Events delivered to the application layer once the handshake resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetAppEvent {
    /// Inbound connection ready; delivered to the ALPN-matched endpoint.
    Accept,
    /// Outbound connection ready; delivered to the initiating continuation.
    Open,
}

/// An application endpoint able to take over an established connection.
pub trait ApplicationEndpoint: Send + Sync {
    fn handle_net_event(&self, event: NetAppEvent, conn: ConnectionHandle);
}

/// Registry of application endpoints keyed by negotiated ALPN value.
pub trait NextProtocolSet: Send + Sync {
    fn find_endpoint(&self, app_name: &[u8]) -> Option<std::sync::Arc<dyn ApplicationEndpoint>>;
}
