use std::collections::HashSet;

use crate::types::{NetworkId, PeerId};

/// Bookkeeping for one connected replicated object.
///
/// A peer appears in `pending_observers` from the moment a spawn message is
/// sent to it, and moves to `observers` only when its object-success
/// acknowledgment arrives; an id is never in both sets.
pub struct ObjectRecord<E: Copy + Eq + std::hash::Hash> {
    pub entity: E,
    pub network_id: NetworkId,
    pub owner: PeerId,
    pub type_hash: u64,
    pub unique_hash: Option<u64>,
    pub observers: HashSet<PeerId>,
    pub pending_observers: HashSet<PeerId>,
    pub owner_can_unspawn: bool,
    pub destroy_on_unspawn: bool,
    /// Whether the server replays this object to newly-approved peers.
    pub visible_to_new_peers: bool,
}

impl<E: Copy + Eq + std::hash::Hash> ObjectRecord<E> {
    pub fn is_observer(&self, peer: PeerId) -> bool {
        self.observers.contains(&peer)
    }

    pub fn is_pending_observer(&self, peer: PeerId) -> bool {
        self.pending_observers.contains(&peer)
    }

    /// Marks a spawn message as sent to `peer`. No-op if the peer already
    /// observes the object.
    pub fn add_pending_observer(&mut self, peer: PeerId) {
        if !self.observers.contains(&peer) {
            self.pending_observers.insert(peer);
        }
    }

    /// Promotes a pending observer after its acknowledgment. Returns
    /// whether the peer was actually pending.
    pub fn promote_observer(&mut self, peer: PeerId) -> bool {
        if self.pending_observers.remove(&peer) {
            self.observers.insert(peer);
            true
        } else {
            false
        }
    }

    pub fn remove_observer(&mut self, peer: PeerId) {
        self.observers.remove(&peer);
        self.pending_observers.remove(&peer);
    }

    /// Every peer a despawn broadcast must reach.
    pub fn all_observers(&self) -> Vec<PeerId> {
        self.observers
            .iter()
            .chain(self.pending_observers.iter())
            .copied()
            .collect()
    }
}
