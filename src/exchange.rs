//! Offer/answer exchange of public keys between room members.
//!
//! A member that sees someone join sends it an `offer-key`. A member that
//! receives an `offer-key` stores the key and answers with its own unless the
//! exchange with that peer already completed. Two members that offer to each
//! other at the same time both answer once and converge.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::directory::PeerDirectory;
use crate::envelope::{KeySignal, KeySignalType};
use crate::keys::{import_public_key, KeyPair};
use crate::types::{PeerId, SessionId};

/// Progress of the exchange with one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing sent or received.
    Unknown,
    /// Our key was offered, theirs not yet received.
    KeySent,
    /// Their key is stored and ours was sent.
    Exchanged,
}

/// Drives the handshake and feeds the [`PeerDirectory`].
#[derive(Debug)]
pub struct KeyExchange {
    local_identity: PeerId,
    local_public_key: String,
    states: HashMap<PeerId, ExchangeState>,
}

impl KeyExchange {
    /// Creates the exchange for the local participant.
    pub fn new(local_identity: PeerId, keys: &KeyPair) -> Self {
        Self {
            local_identity,
            local_public_key: keys.export_public_key(),
            states: HashMap::new(),
        }
    }

    /// Current state with `peer`.
    pub fn state(&self, peer: &PeerId) -> ExchangeState {
        self.states
            .get(peer)
            .copied()
            .unwrap_or(ExchangeState::Unknown)
    }

    fn signal(&self, target: SessionId, kind: KeySignalType) -> KeySignal {
        KeySignal {
            target_peer: target,
            kind,
            public_key: self.local_public_key.clone(),
            identity: self.local_identity.clone(),
        }
    }

    /// A peer joined the room: offer it our key.
    ///
    /// Returns the directed `offer-key` to send, or `None` for our own join.
    pub fn on_peer_joined(
        &mut self,
        directory: &mut PeerDirectory,
        session: SessionId,
        peer: PeerId,
    ) -> Option<KeySignal> {
        if peer == self.local_identity {
            return None;
        }

        directory.bind_session(session.clone(), peer.clone());
        // A (re)joining peer has a fresh key pair, so start over
        self.states.insert(peer, ExchangeState::KeySent);
        Some(self.signal(session, KeySignalType::OfferKey))
    }

    /// Handle an `offer-key` or `answer-key` from `sender`.
    ///
    /// `sender_id` is the identity the relay vouches for. Signals claiming
    /// another identity, or arriving from a session bound to someone else,
    /// are dropped, as are malformed keys. Returns the `answer-key` to send
    /// back, if one is owed.
    pub fn on_signal(
        &mut self,
        directory: &mut PeerDirectory,
        sender: SessionId,
        sender_id: PeerId,
        signal: KeySignal,
    ) -> Option<KeySignal> {
        let peer = sender_id;
        if peer == self.local_identity {
            return None;
        }
        if signal.identity != peer {
            warn!(%peer, %sender, claimed = %signal.identity, "dropping key signal with forged identity");
            return None;
        }
        if let Some(bound) = directory.peer_for(&sender) {
            if *bound != peer {
                warn!(%peer, %sender, %bound, "dropping key signal from session bound to another peer");
                return None;
            }
        }

        let key = match import_public_key(&signal.public_key) {
            Ok(key) => key,
            Err(e) => {
                warn!(%peer, %sender, "dropping key exchange: {}", e);
                return None;
            }
        };

        directory.bind_session(sender.clone(), peer.clone());
        if directory.insert(peer.clone(), key).is_some() {
            debug!(%peer, "replaced stored public key");
        }

        let previous = self.state(&peer);
        self.states.insert(peer.clone(), ExchangeState::Exchanged);

        match signal.kind {
            KeySignalType::OfferKey if previous != ExchangeState::Exchanged => {
                debug!(%peer, "answering key offer");
                Some(self.signal(sender, KeySignalType::AnswerKey))
            }
            KeySignalType::OfferKey => None,
            KeySignalType::AnswerKey => {
                debug!(%peer, "key exchange complete");
                None
            }
        }
    }

    /// A session left the room. Returns the peer whose key was dropped.
    pub fn on_peer_left(&mut self, directory: &mut PeerDirectory, session: &SessionId) -> Option<PeerId> {
        let peer = directory.unbind_session(session)?;
        self.states.remove(&peer);
        Some(peer)
    }
}
