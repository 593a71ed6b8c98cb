//! # Per-Connection ID Set
//!
//! The identity triple (local, peer, original), the FIFO of peer-advertised
//! alternates consumed on migration, and the debug tag every log line for
//! this connection carries.

use crate::types::ConnectionId;
use std::collections::VecDeque;
use tracing::debug;

/// The connection's IDs and peer alternates.
#[derive(Debug)]
pub struct ConnectionIds {
    local: ConnectionId,
    peer: ConnectionId,
    original: ConnectionId,
    /// Peer-advertised alternates; the head is consumed on migration.
    remote_alts: VecDeque<ConnectionId>,
    /// `"{peer:08x}-{local:08x}"`, high 32 bits of each.
    tag: String,
}

impl ConnectionIds {
    pub fn new(local: ConnectionId, peer: ConnectionId, original: ConnectionId) -> Self {
        let mut ids = Self {
            local,
            peer,
            original,
            remote_alts: VecDeque::new(),
            tag: String::new(),
        };
        ids.update_tag();
        ids
    }

    pub fn local(&self) -> ConnectionId {
        self.local
    }

    pub fn peer(&self) -> ConnectionId {
        self.peer
    }

    pub fn original(&self) -> ConnectionId {
        self.original
    }

    /// The combined dst-src tag for debug logs.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn update_tag(&mut self) {
        self.tag = format!("{:08x}-{:08x}", self.peer.h32(), self.local.h32());
    }

    pub fn update_peer(&mut self, new_cid: ConnectionId) {
        debug!(cids = %self.tag, old = %self.peer, new = %new_cid, "dcid updated");
        self.peer = new_cid;
        self.update_tag();
    }

    pub fn update_local(&mut self, new_cid: ConnectionId) {
        debug!(cids = %self.tag, old = %self.local, new = %new_cid, "scid updated");
        self.local = new_cid;
        self.update_tag();
    }

    /// Replace the original CID with a fresh random one (Retry handling).
    pub fn rerandomize_original(&mut self) {
        let old = self.original;
        self.original = ConnectionId::random();
        debug!(cids = %self.tag, old = %old, new = %self.original, "original cid rerandomized");
    }

    pub fn push_remote_alt(&mut self, cid: ConnectionId) {
        self.remote_alts.push_back(cid);
    }

    pub fn pop_remote_alt(&mut self) -> Option<ConnectionId> {
        self.remote_alts.pop_front()
    }

    pub fn has_remote_alts(&self) -> bool {
        !self.remote_alts.is_empty()
    }
}
