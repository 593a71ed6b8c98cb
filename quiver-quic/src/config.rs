//! # Connection Configuration
//!
//! The single configuration bag consumed by the connection core. Loading
//! (files, reloads) lives outside the crate; the core only reads values.

use core::time::Duration;

/// Opaque handle to a TLS context owned by the handshake collaborator.
///
/// The core never inspects it; it exists so the accept/connect paths can
/// thread server and client contexts through one configuration object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SslContextId(pub u64);

/// Configuration for QUIC connections.
#[derive(Debug, Clone)]
pub struct QuicConfig {
    /// TLS context for accepted connections.
    pub server_ssl_ctx: Option<SslContextId>,

    /// TLS context for dialed connections.
    pub client_ssl_ctx: Option<SslContextId>,

    /// Inactivity timeout for inbound connections.
    pub no_activity_timeout_in: Duration,

    /// Inactivity timeout for outbound connections.
    pub no_activity_timeout_out: Duration,

    /// Server identity, mixed into stateless reset tokens.
    pub server_id: Vec<u8>,

    /// Answer new connections with a stateless Retry.
    pub stateless_retry: bool,

    /// Deliberately exercise version negotiation on connect.
    pub vn_exercise_enabled: bool,

    /// Deliberately exercise connection migration after the handshake.
    pub cm_exercise_enabled: bool,

    /// How many alternate connection IDs to advertise.
    pub num_alt_connection_ids: usize,

    /// Path MTU assumed until discovery updates it.
    pub pmtu: u32,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            server_ssl_ctx: None,
            client_ssl_ctx: None,
            no_activity_timeout_in: Duration::from_secs(30),
            no_activity_timeout_out: Duration::from_secs(30),
            server_id: Vec::new(),
            stateless_retry: false,
            vn_exercise_enabled: false,
            cm_exercise_enabled: false,
            num_alt_connection_ids: 3,
            pmtu: 1280,
        }
    }
}
