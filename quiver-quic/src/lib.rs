//! # quiver-quic: Per-Connection QUIC Endpoint Core
//!
//! This crate is the state machine that owns one QUIC connection from the
//! first received datagram to its terminal closed state: packet
//! ingress/egress, TLS handshake progression, connection-level flow
//! control, loss-recovery hooks, connection migration, and close
//! orchestration.
//!
//! ## Architecture Overview
//!
//! ```text
//! quiver-quic/
//! ├── types         - connection IDs, varints, spaces, five-tuple
//! ├── error         - transport/application error taxonomy
//! ├── config        - the configuration bag
//! ├── events        - scheduler events and idempotent timer slots
//! ├── frames        - frame types, wire codec, inbound dispatch
//! ├── packet        - typed packets, factory, PN protection
//! ├── flow_control  - local/remote connection-level windows
//! ├── recovery      - loss-detector and congestion seams, retransmitter
//! ├── ack           - ACK frame recording and creation
//! ├── path          - path validation
//! ├── altcid        - alternate connection-ID management
//! ├── handshake     - the TLS collaborator seam
//! ├── stream        - the stream-manager seam
//! ├── net           - UDP, connection-table, and accept-path seams
//! └── connection    - the state machine itself
//! ```
//!
//! ## Design Principles
//!
//! 1. **Single-threaded cooperative execution**: every state transition,
//!    frame handler, timer, and packet build runs on the connection's
//!    owning scheduler thread. The UDP receiver thread touches only the
//!    receive queue.
//!
//! 2. **Collaborators behind traits**: TLS, stream reassembly, loss
//!    detection, congestion control, the socket, and the connection table
//!    are consumed through seams; the core owns its subcomponents and
//!    subcomponents never own the core back.
//!
//! 3. **One producer capability**: everything that can put a frame into a
//!    packet implements [`frames::FrameSource`]; the packetizer polls the
//!    producers in a fixed, interoperability-relevant order.

#![forbid(unsafe_code)]

pub mod ack;
pub mod altcid;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod flow_control;
pub mod frames;
pub mod handshake;
pub mod net;
pub mod packet;
pub mod path;
pub mod recovery;
pub mod stream;
pub mod types;

pub use config::QuicConfig;
pub use connection::{ConnState, ConnectionContext, PacketCreationResult, QuicConnection, RecvQueue};
pub use error::{ConnectionError, ErrorClass, TransErrorCode};
pub use events::{EventScheduler, EventToken, NetEvent};
pub use net::{ConnectionHandle, UdpDatagram};
pub use types::{ConnectionId, Direction, EncryptionLevel, FiveTuple, PnSpace};
