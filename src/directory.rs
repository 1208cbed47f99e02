//! Peer key directory for one room.
//!
//! Public keys are stored under the peer's durable [`PeerId`]. The relay
//! addresses connections by [`SessionId`], which changes on every reconnect,
//! so the directory also keeps the session-to-identity mapping that lets a
//! reconnecting peer keep its place.

use std::collections::HashMap;

use x25519_dalek::PublicKey;

use crate::types::{PeerId, SessionId};

/// Mapping of room peers to their public keys and live sessions.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    keys: HashMap<PeerId, PublicKey>,
    sessions: HashMap<SessionId, PeerId>,
}

impl PeerDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a peer's public key, returning the key it replaced.
    pub fn insert(&mut self, peer: PeerId, key: PublicKey) -> Option<PublicKey> {
        self.keys.insert(peer, key)
    }

    /// Retrieve a peer's public key.
    pub fn get(&self, peer: &PeerId) -> Option<&PublicKey> {
        self.keys.get(peer)
    }

    /// Whether a key is known for `peer`.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.keys.contains_key(peer)
    }

    /// Forget a peer's key.
    pub fn remove(&mut self, peer: &PeerId) -> Option<PublicKey> {
        self.keys.remove(peer)
    }

    /// Returns the number of known keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are known.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Copy of the current keys, taken at send time.
    pub fn snapshot(&self) -> Vec<(PeerId, PublicKey)> {
        self.keys
            .iter()
            .map(|(peer, key)| (peer.clone(), *key))
            .collect()
    }

    /// Record that `session` belongs to `peer`.
    pub fn bind_session(&mut self, session: SessionId, peer: PeerId) {
        self.sessions.insert(session, peer);
    }

    /// Identity behind a transport session.
    pub fn peer_for(&self, session: &SessionId) -> Option<&PeerId> {
        self.sessions.get(session)
    }

    /// A live session of `peer`, for addressing directed signals.
    pub fn session_for(&self, peer: &PeerId) -> Option<&SessionId> {
        self.sessions
            .iter()
            .find(|(_, p)| *p == peer)
            .map(|(session, _)| session)
    }

    /// Drop a session. The identity's key goes with it unless another
    /// session of the same identity is still bound.
    ///
    /// Returns the identity whose key was removed, if any.
    pub fn unbind_session(&mut self, session: &SessionId) -> Option<PeerId> {
        let peer = self.sessions.remove(session)?;
        if self.sessions.values().any(|p| *p == peer) {
            return None;
        }
        self.keys.remove(&peer);
        Some(peer)
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.sessions.clear();
    }
}
