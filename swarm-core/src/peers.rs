//! Known remote peers, split into pending (handshake outstanding) and connected.

use std::collections::BTreeSet;

use tracing::info;

use crate::identity::PeerId;

/// Membership state of one remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Pending,
    Connected,
}

/// Authoritative peer table. An id is in at most one of the two sets and is never
/// the local id or `PeerId::INVALID`.
#[derive(Debug, Default)]
pub struct PeerSet {
    local: PeerId,
    pending: BTreeSet<PeerId>,
    connected: BTreeSet<PeerId>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local(local: PeerId) -> Self {
        let mut set = Self::new();
        set.set_local(local);
        set
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Record our own id once the transport assigns it. Drops it from the sets if
    /// gossip had already put it there.
    pub fn set_local(&mut self, local: PeerId) {
        self.local = local;
        self.pending.remove(&local);
        self.connected.remove(&local);
    }

    /// Add `id` to pending unless it is us, invalid, or already known.
    /// Returns true when the peer was newly added.
    pub fn note_candidate(&mut self, id: PeerId) -> bool {
        if !id.is_valid() || id == self.local || self.contains(id) {
            return false;
        }
        info!(peer = %id, "connecting to peer");
        self.pending.insert(id);
        true
    }

    /// Handshake completed: move `id` from pending to connected. Idempotent.
    /// Returns true the first time the peer becomes connected.
    pub fn mark_connected(&mut self, id: PeerId) -> bool {
        if !id.is_valid() || id == self.local {
            return false;
        }
        self.pending.remove(&id);
        let added = self.connected.insert(id);
        if added {
            info!(peer = %id, "connected to peer");
        }
        added
    }

    /// Forget `id`, whichever set holds it. Idempotent; returns true if it was known.
    pub fn evict(&mut self, id: PeerId) -> bool {
        let was_pending = self.pending.remove(&id);
        let was_connected = self.connected.remove(&id);
        was_pending || was_connected
    }

    /// Everyone we know of, pending and connected, for an outgoing hello.
    pub fn snapshot_for_gossip(&self) -> Vec<PeerId> {
        self.connected
            .iter()
            .chain(self.pending.iter())
            .copied()
            .collect()
    }

    pub fn pending_peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.pending.iter().copied()
    }

    pub fn connected_peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.connected.iter().copied()
    }

    pub fn status(&self, id: PeerId) -> Option<PeerStatus> {
        if self.pending.contains(&id) {
            Some(PeerStatus::Pending)
        } else if self.connected.contains(&id) {
            Some(PeerStatus::Connected)
        } else {
            None
        }
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.status(id).is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn connected_len(&self) -> usize {
        self.connected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.connected.is_empty()
    }
}
