//! # Alternate Connection IDs (RFC 9000 Section 5.1)
//!
//! Issues local alternate CIDs so the peer can migrate to us without
//! linkable identifiers: each alternate is registered in the shared
//! connection table, advertised in a NEW_CONNECTION_ID frame, and consumed
//! once when a migration lands on it.

use crate::frames::{Frame, FrameSource, NewConnectionIdFrame};
use crate::net::{ConnectionHandle, ConnectionTable};
use crate::types::{ConnectionId, EncryptionLevel};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Stateless reset token bound to an alternate CID.
///
/// Real token derivation (keyed hash of the CID under the server secret)
/// belongs to the integrator; this fold keeps tokens deterministic per
/// (server identity, CID) pair.
pub fn derive_reset_token(server_id: &[u8], cid: &ConnectionId) -> [u8; 16] {
    let mut token = [0u8; 16];
    for (i, byte) in server_id.iter().chain(cid.as_bytes()).enumerate() {
        token[i % 16] = token[i % 16].rotate_left(3) ^ byte;
    }
    token
}

#[derive(Debug, Clone)]
struct AltCid {
    sequence_number: u64,
    cid: ConnectionId,
    used: bool,
}

/// Manages this endpoint's alternate connection IDs.
pub struct AltConnectionIdManager {
    conn: ConnectionHandle,
    table: Arc<dyn ConnectionTable>,
    reset_token_seed: Vec<u8>,
    alternates: Vec<AltCid>,
    /// Indices of alternates not yet advertised to the peer.
    to_advertise: VecDeque<usize>,
}

impl AltConnectionIdManager {
    /// Generate `count` alternates, register each in the table, and queue
    /// their NEW_CONNECTION_ID frames.
    pub fn new(
        conn: ConnectionHandle,
        table: Arc<dyn ConnectionTable>,
        server_id: &[u8],
        count: usize,
    ) -> Self {
        let mut manager = Self {
            conn,
            table,
            reset_token_seed: server_id.to_vec(),
            alternates: Vec::with_capacity(count),
            to_advertise: VecDeque::with_capacity(count),
        };
        for sequence_number in 1..=count as u64 {
            let cid = ConnectionId::random();
            manager.table.insert(cid, conn);
            manager.alternates.push(AltCid {
                sequence_number,
                cid,
                used: false,
            });
            manager.to_advertise.push_back(manager.alternates.len() - 1);
        }
        manager
    }

    /// Accept a migration onto `new_cid`.
    ///
    /// Succeeds only for an alternate we issued and that has not already
    /// been consumed by a previous migration.
    pub fn migrate_to(&mut self, new_cid: &ConnectionId) -> bool {
        for alt in &mut self.alternates {
            if alt.cid == *new_cid && !alt.used {
                alt.used = true;
                debug!(cid = %alt.cid, seq = alt.sequence_number, "migrated to alternate cid");
                return true;
            }
        }
        false
    }

    /// Drop every alternate from the routing table. Called exactly once,
    /// from `remove_connection_ids`.
    pub fn invalidate_alt_connections(&mut self) {
        for alt in &self.alternates {
            self.table.erase(&alt.cid, self.conn);
        }
        self.alternates.clear();
        self.to_advertise.clear();
    }
}

impl FrameSource for AltConnectionIdManager {
    fn will_generate_frame(&self, level: EncryptionLevel) -> bool {
        level == EncryptionLevel::OneRtt && !self.to_advertise.is_empty()
    }

    fn generate_frame(&mut self, level: EncryptionLevel, _credit: u64, max_size: usize) -> Option<Frame> {
        if level != EncryptionLevel::OneRtt {
            return None;
        }
        let index = *self.to_advertise.front()?;
        let alt = &self.alternates[index];
        let frame = Frame::NewConnectionId(NewConnectionIdFrame {
            sequence_number: alt.sequence_number,
            connection_id: alt.cid,
            stateless_reset_token: derive_reset_token(&self.reset_token_seed, &alt.cid),
        });
        if crate::frames::codec::encoded_size(&frame) > max_size {
            return None;
        }
        self.to_advertise.pop_front();
        Some(frame)
    }
}

impl core::fmt::Debug for AltConnectionIdManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AltConnectionIdManager")
            .field("conn", &self.conn)
            .field("alternates", &self.alternates)
            .finish_non_exhaustive()
    }
}
