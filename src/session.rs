//! Protocol state for one participant in one room.
//!
//! A [`Session`] owns the key pair, the peer directory, the key exchange,
//! the conversation and the typing state. Every relay event and local action
//! goes through it one at a time and comes back as the signals to hand to
//! the relay; nothing else holds a reference to this state.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use x25519_dalek::PublicKey;

use crate::directory::PeerDirectory;
use crate::envelope::{AckStatus, JoinRequest, MessageEnvelope};
use crate::exchange::{ExchangeState, KeyExchange};
use crate::keys::KeyPair;
use crate::messaging::{acknowledge, open_envelope, seal_text};
use crate::models::{Conversation, DeliveryState, Message, MessageContent};
use crate::relay::{Outbound, RelayEvent};
use crate::storage::BlobStore;
use crate::transfer::{OutgoingFile, PendingDownload, PendingUpload};
use crate::typing::{TypingDebouncer, TypingTracker};
use crate::types::{
    ChatError, MessageId, PeerId, Result, SessionId, MAX_FILE_SIZE, TYPING_QUIET_PERIOD_MS,
};

/// Configuration for joining a room.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Room to join.
    pub room_id: String,
    /// Display name announced to peers.
    pub nickname: String,
    /// Occupancy limit requested when creating the room.
    pub user_limit: Option<u32>,
    /// Inactivity after which `typing-stop` is sent.
    pub typing_quiet_period: Duration,
    /// Largest file accepted for upload.
    pub max_file_size: usize,
}

impl RoomConfig {
    /// Creates a configuration for the given room with default settings.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            nickname: "Anonymous".to_string(),
            user_limit: None,
            typing_quiet_period: Duration::from_millis(TYPING_QUIET_PERIOD_MS),
            max_file_size: MAX_FILE_SIZE,
        }
    }

    /// Sets the display name.
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }

    /// Sets the occupancy limit.
    pub fn with_user_limit(mut self, limit: u32) -> Self {
        self.user_limit = Some(limit);
        self
    }

    /// Sets the typing quiet period.
    pub fn with_typing_quiet_period(mut self, period: Duration) -> Self {
        self.typing_quiet_period = period;
        self
    }

    /// Sets the upload size cap.
    pub fn with_max_file_size(mut self, max: usize) -> Self {
        self.max_file_size = max;
        self
    }
}

/// A message handed to the relay, with the signals that carry it.
#[derive(Debug, Clone)]
pub struct Outgoing {
    /// Id of the new local message.
    pub message_id: MessageId,
    /// Signals to send, in order.
    pub signals: Vec<Outbound>,
}

/// Protocol state of the local participant.
pub struct Session {
    config: RoomConfig,
    identity: PeerId,
    keys: KeyPair,
    directory: PeerDirectory,
    exchange: KeyExchange,
    conversation: Conversation,
    typing: TypingTracker,
    debouncer: TypingDebouncer,
    participant_count: u32,
}

impl Session {
    /// Starts a session with a freshly generated key pair.
    ///
    /// Fails with [`ChatError::KeyGeneration`] if no key pair can be made.
    pub fn new(config: RoomConfig, identity: PeerId) -> Result<Self> {
        let keys = KeyPair::generate()?;
        Ok(Self::with_keys(config, identity, keys))
    }

    /// Starts a session with an existing key pair.
    pub fn with_keys(config: RoomConfig, identity: PeerId, keys: KeyPair) -> Self {
        let exchange = KeyExchange::new(identity.clone(), &keys);
        let debouncer = TypingDebouncer::new(config.typing_quiet_period);
        Self {
            config,
            identity,
            keys,
            directory: PeerDirectory::new(),
            exchange,
            conversation: Conversation::new(),
            typing: TypingTracker::new(),
            debouncer,
            participant_count: 1,
        }
    }

    /// Returns the room configuration.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Returns the local identity.
    pub fn identity(&self) -> &PeerId {
        &self.identity
    }

    /// Returns the local public key.
    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    /// Returns the peer key directory.
    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// Key exchange progress with `peer`.
    pub fn exchange_state(&self, peer: &PeerId) -> ExchangeState {
        self.exchange.state(peer)
    }

    /// Returns the conversation.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Delivery state of one of our messages.
    pub fn delivery_state(&self, id: &MessageId) -> Option<DeliveryState> {
        self.conversation.get(id).map(|m| m.state)
    }

    /// Returns the remote typing state.
    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    /// "X is typing..." line for the room, if anyone types.
    pub fn typing_indicator(&self) -> Option<String> {
        self.typing.indicator()
    }

    /// Last occupancy reported by the relay.
    pub fn participant_count(&self) -> u32 {
        self.participant_count
    }

    /// The request that opens the session.
    pub fn join_request(&self) -> Outbound {
        Outbound::JoinRoom(JoinRequest {
            room_id: self.config.room_id.clone(),
            nickname: self.config.nickname.clone(),
            user_limit: self.config.user_limit,
        })
    }

    /// Process one relay event.
    ///
    /// Only a join rejection is an error; everything else is contained to
    /// the peer or message it concerns.
    pub fn handle_event(&mut self, event: RelayEvent) -> Result<Vec<Outbound>> {
        let mut out = Vec::new();

        match event {
            RelayEvent::UserJoined {
                session_id,
                user_id,
                nickname,
            } => {
                info!(session = %session_id, peer = %user_id, "peer joined");
                if let Some(name) = nickname {
                    self.typing.set_nickname(session_id.clone(), name);
                }
                if let Some(offer) =
                    self.exchange
                        .on_peer_joined(&mut self.directory, session_id, user_id)
                {
                    out.push(Outbound::Signal(offer));
                }
            }
            RelayEvent::UserLeft {
                session_id,
                user_id,
            } => {
                info!(session = %session_id, peer = %user_id, "peer left");
                self.exchange.on_peer_left(&mut self.directory, &session_id);
                self.typing.on_peer_left(&session_id);
            }
            RelayEvent::Signal {
                sender,
                user_id,
                signal,
            } => {
                if let Some(answer) =
                    self.exchange
                        .on_signal(&mut self.directory, sender, user_id, signal)
                {
                    out.push(Outbound::Signal(answer));
                }
            }
            RelayEvent::ReceiveMessage {
                sender,
                user_id,
                envelope,
            } => {
                self.on_envelope(sender, user_id, envelope, &mut out);
            }
            RelayEvent::MessageStatus(ack) => {
                if ack.sender_id != self.identity {
                    debug!(message = %ack.message_id, "ignoring ack for another sender");
                } else if let Some(state) = self.conversation.apply_ack(&ack.message_id, ack.status) {
                    debug!(message = %ack.message_id, from = %ack.recipient_id, ?state, "delivery state advanced");
                }
            }
            RelayEvent::UserTyping {
                session_id,
                nickname,
            } => {
                self.typing.on_start(session_id, nickname);
            }
            RelayEvent::UserStoppedTyping { session_id } => {
                self.typing.on_stop(&session_id);
            }
            RelayEvent::RoomInfo { count } => {
                self.participant_count = count;
            }
            RelayEvent::Error { message } => {
                warn!(room = %self.config.room_id, "join rejected: {}", message);
                return Err(ChatError::JoinRejected(message));
            }
        }

        Ok(out)
    }

    fn on_envelope(
        &mut self,
        sender: SessionId,
        sender_id: PeerId,
        envelope: MessageEnvelope,
        out: &mut Vec<Outbound>,
    ) {
        if sender_id == self.identity {
            return;
        }
        let bound_elsewhere = self
            .directory
            .peer_for(&sender)
            .is_some_and(|bound| *bound != sender_id);
        if envelope.sender_id != sender_id || bound_elsewhere {
            warn!(
                message = %envelope.message_id,
                %sender,
                claimed = %envelope.sender_id,
                "dropping envelope with forged sender"
            );
            return;
        }

        // Delivery is acknowledged whether or not we can read it
        out.push(Outbound::ack(acknowledge(
            &envelope,
            &self.identity,
            AckStatus::Delivered,
        )));

        match open_envelope(&envelope, &self.identity, &self.keys) {
            Ok(content) => {
                let message = Message::new_incoming(
                    envelope.message_id.clone(),
                    envelope.sender_id.clone(),
                    content,
                );
                self.conversation.append(message);
                out.push(Outbound::ack(acknowledge(
                    &envelope,
                    &self.identity,
                    AckStatus::Read,
                )));
            }
            Err(ChatError::NotARecipient(_)) => {
                debug!(message = %envelope.message_id, %sender, "envelope not addressed to us");
            }
            Err(e) => {
                warn!(message = %envelope.message_id, %sender, "dropping envelope: {}", e);
            }
        }
    }

    /// Encrypt and publish a text message.
    ///
    /// The message enters the conversation as `Sending`; call
    /// [`Session::mark_published`] once the relay took the envelope.
    pub fn send_text(&mut self, text: &str) -> Result<Outgoing> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let mut signals = vec![Outbound::typing(
            &self.config.room_id,
            self.debouncer.message_sent(),
        )];

        let recipients = self.directory.snapshot();
        let envelope = seal_text(&self.config.room_id, &self.identity, text, &recipients)?;
        let message_id = envelope.message_id.clone();
        debug!(message = %message_id, recipients = recipients.len(), "sealed text message");

        self.conversation.append(Message::new_outgoing(
            message_id.clone(),
            self.identity.clone(),
            MessageContent::Text(text.to_string()),
        ));
        signals.push(Outbound::SendMessage(envelope));

        Ok(Outgoing {
            message_id,
            signals,
        })
    }

    /// Encrypt, store and announce a file.
    ///
    /// Runs [`Session::begin_upload`], the upload and
    /// [`Session::finish_upload`] back to back.
    pub async fn send_file(&mut self, store: &dyn BlobStore, file: OutgoingFile) -> Result<Outgoing> {
        let upload = self.begin_upload(file);
        let message_id = upload.message_id().clone();
        let result = upload.run(store).await;
        let envelope = self.finish_upload(&message_id, result)?;
        Ok(Outgoing {
            message_id,
            signals: vec![Outbound::SendMessage(envelope)],
        })
    }

    /// Show a file as an upload in state `Sending` and prepare the transfer.
    ///
    /// The key is wrapped for the peers known now and for ourselves.
    pub fn begin_upload(&mut self, file: OutgoingFile) -> PendingUpload {
        let message_id = MessageId::new();
        self.conversation.append(Message::new_outgoing(
            message_id.clone(),
            self.identity.clone(),
            MessageContent::Uploading {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
                size: file.bytes.len() as u64,
            },
        ));

        PendingUpload {
            message_id,
            room_id: self.config.room_id.clone(),
            sender: self.identity.clone(),
            sender_key: *self.keys.public_key(),
            recipients: self.directory.snapshot(),
            file,
            max_size: self.config.max_file_size,
        }
    }

    /// Settle an upload started with [`Session::begin_upload`].
    ///
    /// On success the placeholder becomes the file message and the envelope
    /// to publish is returned. On failure the placeholder is removed.
    pub fn finish_upload(
        &mut self,
        message_id: &MessageId,
        result: Result<MessageEnvelope>,
    ) -> Result<MessageEnvelope> {
        let opened = result.and_then(|envelope| {
            open_envelope(&envelope, &self.identity, &self.keys).map(|content| (envelope, content))
        });

        match opened {
            Ok((envelope, content)) => {
                if let Some(message) = self.conversation.get_mut(message_id) {
                    message.content = content;
                }
                Ok(envelope)
            }
            Err(e) => {
                warn!(message = %message_id, "file upload failed: {}", e);
                self.conversation.remove(message_id);
                Err(e)
            }
        }
    }

    /// Unwrap the key of the file carried by a message, ready to fetch.
    pub fn prepare_download(&self, id: &MessageId) -> Result<PendingDownload> {
        let file = self
            .conversation
            .get(id)
            .and_then(Message::file)
            .ok_or_else(|| ChatError::MessageNotFound(id.clone()))?;
        PendingDownload::new(file, &self.keys)
    }

    /// Fetch and decrypt the file carried by a message.
    pub async fn download_file(&self, store: &dyn BlobStore, id: &MessageId) -> Result<Vec<u8>> {
        self.prepare_download(id)?.run(store).await
    }

    /// The relay took the envelope of `id`: `Sending` becomes `Sent`.
    pub fn mark_published(&mut self, id: &MessageId) {
        if let Some(message) = self.conversation.get_mut(id) {
            message.state = message.state.advance(DeliveryState::Sent);
        }
    }

    /// Drop a message whose envelope never reached the relay.
    pub fn discard(&mut self, id: &MessageId) -> Option<Message> {
        self.conversation.remove(id)
    }

    /// A keystroke in the compose input.
    pub fn keystroke(&mut self, now: Instant) -> Option<Outbound> {
        self.debouncer
            .keystroke(now)
            .map(|status| Outbound::typing(&self.config.room_id, status))
    }

    /// Emit `typing-stop` if the quiet period has passed.
    pub fn poll_typing(&mut self, now: Instant) -> Option<Outbound> {
        self.debouncer
            .poll(now)
            .map(|status| Outbound::typing(&self.config.room_id, status))
    }

    /// When [`Session::poll_typing`] next needs to run.
    pub fn typing_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Leaving the room: forget peers, keys, typing state and messages.
    pub fn teardown(&mut self) {
        self.directory.clear();
        self.typing.clear();
        self.exchange = KeyExchange::new(self.identity.clone(), &self.keys);
        self.debouncer = TypingDebouncer::new(self.config.typing_quiet_period);
        self.conversation = Conversation::new();
        self.participant_count = 1;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("room_id", &self.config.room_id)
            .field("identity", &self.identity)
            .field("peers", &self.directory.len())
            .field("messages", &self.conversation.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{AckSignal, KeySignal};
    use crate::storage::InMemoryBlobStore;

    fn session(name: &str) -> Session {
        Session::new(
            RoomConfig::new("lobby").with_nickname(name),
            PeerId::from(name),
        )
        .unwrap()
    }

    fn sid(name: &str) -> SessionId {
        SessionId(format!("sock-{}", name))
    }

    fn signals(out: Vec<Outbound>) -> Vec<KeySignal> {
        out.into_iter()
            .filter_map(|o| match o {
                Outbound::Signal(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Runs the join handshake between two sessions.
    fn pair(a: &mut Session, b: &mut Session) {
        let a_name = a.identity().as_str().to_string();
        let b_name = b.identity().as_str().to_string();

        let offers = signals(
            a.handle_event(RelayEvent::UserJoined {
                session_id: sid(&b_name),
                user_id: b.identity().clone(),
                nickname: Some(b_name.clone()),
            })
            .unwrap(),
        );
        for offer in offers {
            let answers = signals(
                b.handle_event(RelayEvent::Signal {
                    sender: sid(&a_name),
                    user_id: PeerId::from(a_name.as_str()),
                    signal: offer,
                })
                .unwrap(),
            );
            for answer in answers {
                a.handle_event(RelayEvent::Signal {
                    sender: sid(&b_name),
                    user_id: PeerId::from(b_name.as_str()),
                    signal: answer,
                })
                .unwrap();
            }
        }
    }

    fn published(outgoing: &Outgoing) -> MessageEnvelope {
        outgoing
            .signals
            .iter()
            .find_map(|o| match o {
                Outbound::SendMessage(e) => Some(e.clone()),
                _ => None,
            })
            .unwrap()
    }

    fn acks(out: &[Outbound]) -> Vec<AckSignal> {
        out.iter()
            .filter_map(|o| match o {
                Outbound::MessageDelivered(a) | Outbound::MessageRead(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_config_defaults() {
        let config = RoomConfig::new("lobby");
        assert_eq!(config.nickname, "Anonymous");
        assert_eq!(config.user_limit, None);
        assert_eq!(config.typing_quiet_period, Duration::from_secs(2));
        assert_eq!(config.max_file_size, MAX_FILE_SIZE);

        let config = config.with_user_limit(4).with_max_file_size(1024);
        assert_eq!(config.user_limit, Some(4));
        assert_eq!(config.max_file_size, 1024);
    }

    #[test]
    fn test_join_request() {
        let s = Session::new(
            RoomConfig::new("lobby").with_nickname("Ann").with_user_limit(5),
            PeerId::from("ann"),
        )
        .unwrap();
        match s.join_request() {
            Outbound::JoinRoom(join) => {
                assert_eq!(join.room_id, "lobby");
                assert_eq!(join.nickname, "Ann");
                assert_eq!(join.user_limit, Some(5));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_text_roundtrip_with_acks() {
        let mut alice = session("alice");
        let mut bob = session("bob");
        pair(&mut alice, &mut bob);

        let outgoing = alice.send_text("hi").unwrap();
        assert_eq!(
            alice.delivery_state(&outgoing.message_id),
            Some(DeliveryState::Sending)
        );
        alice.mark_published(&outgoing.message_id);
        assert_eq!(
            alice.delivery_state(&outgoing.message_id),
            Some(DeliveryState::Sent)
        );

        let out = bob
            .handle_event(RelayEvent::ReceiveMessage {
                sender: sid("alice"),
                user_id: PeerId::from("alice"),
                envelope: published(&outgoing),
            })
            .unwrap();
        assert_eq!(bob.conversation().last_message().unwrap().text(), Some("hi"));

        let acks = acks(&out);
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0].status, AckStatus::Delivered);
        assert_eq!(acks[1].status, AckStatus::Read);

        alice
            .handle_event(RelayEvent::MessageStatus(acks[0].clone()))
            .unwrap();
        assert_eq!(
            alice.delivery_state(&outgoing.message_id),
            Some(DeliveryState::Delivered)
        );
        alice
            .handle_event(RelayEvent::MessageStatus(acks[1].clone()))
            .unwrap();
        assert_eq!(
            alice.delivery_state(&outgoing.message_id),
            Some(DeliveryState::Read)
        );
    }

    #[test]
    fn test_unaddressed_envelope_delivered_not_read() {
        let mut alice = session("alice");
        let mut carol = session("carol");

        // Alice knows nobody; Carol gets the broadcast anyway
        let outgoing = alice.send_text("hi").unwrap();
        let out = carol
            .handle_event(RelayEvent::ReceiveMessage {
                sender: sid("alice"),
                user_id: PeerId::from("alice"),
                envelope: published(&outgoing),
            })
            .unwrap();

        let acks = acks(&out);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].status, AckStatus::Delivered);
        assert!(carol.conversation().is_empty());
    }

    #[test]
    fn test_own_envelope_ignored() {
        let mut alice = session("alice");
        let outgoing = alice.send_text("echo").unwrap();
        let out = alice
            .handle_event(RelayEvent::ReceiveMessage {
                sender: sid("alice"),
                user_id: PeerId::from("alice"),
                envelope: published(&outgoing),
            })
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(alice.conversation().len(), 1);
    }

    #[test]
    fn test_envelope_with_forged_sender_dropped() {
        let mut alice = session("alice");
        let mut bob = session("bob");
        pair(&mut alice, &mut bob);

        // Mallory's envelope claims to come from Alice
        let mut mallory = session("mallory");
        let mut forged = published(&mallory.send_text("trust me").unwrap());
        forged.sender_id = PeerId::from("alice");

        let out = bob
            .handle_event(RelayEvent::ReceiveMessage {
                sender: sid("mallory"),
                user_id: PeerId::from("mallory"),
                envelope: forged,
            })
            .unwrap();
        assert!(out.is_empty());
        assert!(bob.conversation().is_empty());
    }

    #[test]
    fn test_envelope_from_session_bound_elsewhere_dropped() {
        let mut alice = session("alice");
        let mut bob = session("bob");
        pair(&mut alice, &mut bob);

        let mut carol = session("carol");
        let envelope = published(&carol.send_text("hello").unwrap());

        // sock-alice belongs to Alice, not Carol
        let out = bob
            .handle_event(RelayEvent::ReceiveMessage {
                sender: sid("alice"),
                user_id: PeerId::from("carol"),
                envelope,
            })
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_forged_answer_keeps_original_key() {
        let mut carol = session("carol");
        let mut alice = session("alice");
        pair(&mut carol, &mut alice);
        let alice_key = *alice.public_key();

        let mallory = session("mallory");
        let forged = KeySignal {
            target_peer: sid("carol"),
            kind: crate::envelope::KeySignalType::AnswerKey,
            public_key: crate::keys::export_public_key(mallory.public_key()),
            identity: PeerId::from("alice"),
        };
        let out = carol
            .handle_event(RelayEvent::Signal {
                sender: sid("mallory"),
                user_id: PeerId::from("mallory"),
                signal: forged,
            })
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(carol.directory().peer_for(&sid("mallory")), None);
        assert_eq!(
            carol.directory().get(alice.identity()).unwrap().as_bytes(),
            alice_key.as_bytes()
        );

        // Alice can still read what Carol sends
        let outgoing = carol.send_text("secret for alice").unwrap();
        alice
            .handle_event(RelayEvent::ReceiveMessage {
                sender: sid("carol"),
                user_id: PeerId::from("carol"),
                envelope: published(&outgoing),
            })
            .unwrap();
        assert_eq!(
            alice.conversation().last_message().unwrap().text(),
            Some("secret for alice")
        );
    }

    #[test]
    fn test_reconnect_keeps_key() {
        let mut alice = session("alice");
        let mut bob = session("bob");
        pair(&mut alice, &mut bob);

        // Bob's second connection joins before the first one leaves
        let second = SessionId::from("sock-bob-2");
        let out = alice
            .handle_event(RelayEvent::UserJoined {
                session_id: second.clone(),
                user_id: bob.identity().clone(),
                nickname: Some("bob".to_string()),
            })
            .unwrap();
        assert_eq!(signals(out)[0].target_peer, second);

        alice
            .handle_event(RelayEvent::UserLeft {
                session_id: sid("bob"),
                user_id: bob.identity().clone(),
            })
            .unwrap();
        assert!(alice.directory().contains(bob.identity()));
        assert_eq!(alice.directory().peer_for(&second), Some(bob.identity()));

        let outgoing = alice.send_text("still there?").unwrap();
        assert!(published(&outgoing).wrapped_key_for(bob.identity()).is_some());

        // Once the last connection leaves the key goes too
        alice
            .handle_event(RelayEvent::UserLeft {
                session_id: second,
                user_id: bob.identity().clone(),
            })
            .unwrap();
        assert!(!alice.directory().contains(bob.identity()));
    }

    #[test]
    fn test_teardown_forgets_room_state() {
        let mut alice = session("alice");
        let mut bob = session("bob");
        pair(&mut alice, &mut bob);
        alice.send_text("bye").unwrap();
        alice
            .handle_event(RelayEvent::UserTyping {
                session_id: sid("bob"),
                nickname: None,
            })
            .unwrap();
        alice.keystroke(Instant::now());

        alice.teardown();
        assert!(alice.directory().is_empty());
        assert!(alice.conversation().is_empty());
        assert_eq!(alice.typing_indicator(), None);
        assert_eq!(alice.typing().nickname(&sid("bob")), None);
        assert_eq!(alice.typing_deadline(), None);
        assert_eq!(alice.exchange_state(bob.identity()), ExchangeState::Unknown);
    }

    #[test]
    fn test_ack_for_other_sender_ignored() {
        let mut alice = session("alice");
        let outgoing = alice.send_text("hi").unwrap();
        alice.mark_published(&outgoing.message_id);

        alice
            .handle_event(RelayEvent::MessageStatus(AckSignal {
                room_id: "lobby".to_string(),
                message_id: outgoing.message_id.clone(),
                sender_id: PeerId::from("mallory"),
                recipient_id: PeerId::from("bob"),
                status: AckStatus::Read,
            }))
            .unwrap();
        assert_eq!(
            alice.delivery_state(&outgoing.message_id),
            Some(DeliveryState::Sent)
        );
    }

    #[test]
    fn test_send_emits_typing_stop_first() {
        let mut alice = session("alice");
        let outgoing = alice.send_text("hello").unwrap();
        assert!(matches!(outgoing.signals[0], Outbound::TypingStop(_)));
        assert!(matches!(outgoing.signals[1], Outbound::SendMessage(_)));
    }

    #[test]
    fn test_empty_text_rejected() {
        let mut alice = session("alice");
        assert!(matches!(alice.send_text("   "), Err(ChatError::EmptyMessage)));
        assert!(alice.conversation().is_empty());
    }

    #[test]
    fn test_join_error_is_fatal() {
        let mut alice = session("alice");
        let result = alice.handle_event(RelayEvent::Error {
            message: "Room is full".to_string(),
        });
        assert!(matches!(result, Err(ChatError::JoinRejected(_))));
    }

    #[test]
    fn test_leave_removes_key_and_typing() {
        let mut alice = session("alice");
        let mut bob = session("bob");
        pair(&mut alice, &mut bob);
        assert!(alice.directory().contains(bob.identity()));

        alice
            .handle_event(RelayEvent::UserTyping {
                session_id: sid("bob"),
                nickname: None,
            })
            .unwrap();
        assert_eq!(alice.typing_indicator().as_deref(), Some("bob is typing..."));

        alice
            .handle_event(RelayEvent::UserLeft {
                session_id: sid("bob"),
                user_id: bob.identity().clone(),
            })
            .unwrap();
        assert!(!alice.directory().contains(bob.identity()));
        assert_eq!(alice.typing_indicator(), None);

        // Later envelopes leave Bob out
        let outgoing = alice.send_text("bye").unwrap();
        assert!(published(&outgoing).wrapped_keys.is_empty());
    }

    #[test]
    fn test_room_info_updates_count() {
        let mut alice = session("alice");
        assert_eq!(alice.participant_count(), 1);
        alice
            .handle_event(RelayEvent::RoomInfo { count: 3 })
            .unwrap();
        assert_eq!(alice.participant_count(), 3);
    }

    #[test]
    fn test_keystroke_debounce() {
        let mut alice = session("alice");
        let t0 = Instant::now();
        assert!(matches!(alice.keystroke(t0), Some(Outbound::TypingStart(_))));
        assert!(alice.keystroke(t0 + Duration::from_millis(300)).is_none());
        assert_eq!(
            alice.typing_deadline(),
            Some(t0 + Duration::from_millis(2300))
        );
        assert!(alice.poll_typing(t0 + Duration::from_millis(2300)).is_some());
        assert_eq!(alice.typing_deadline(), None);
    }

    #[tokio::test]
    async fn test_file_share_and_download() {
        let store = InMemoryBlobStore::new();
        let mut alice = session("alice");
        let mut bob = session("bob");
        pair(&mut alice, &mut bob);

        let outgoing = alice
            .send_file(
                &store,
                OutgoingFile::new("cat.png", "image/png", vec![0x89, 0x50, 0x4e, 0x47]),
            )
            .await
            .unwrap();
        let envelope = published(&outgoing);
        assert!(envelope.wrapped_key_for(alice.identity()).is_some());
        assert!(envelope.wrapped_key_for(bob.identity()).is_some());

        let out = bob
            .handle_event(RelayEvent::ReceiveMessage {
                sender: sid("alice"),
                user_id: PeerId::from("alice"),
                envelope,
            })
            .unwrap();
        assert_eq!(acks(&out).len(), 2);

        let received = bob.conversation().last_message().unwrap();
        assert_eq!(received.file().unwrap().metadata.name, "cat.png");
        let bytes = bob.download_file(&store, &received.id).await.unwrap();
        assert_eq!(bytes, vec![0x89, 0x50, 0x4e, 0x47]);

        let own = alice
            .download_file(&store, &outgoing.message_id)
            .await
            .unwrap();
        assert_eq!(own, vec![0x89, 0x50, 0x4e, 0x47]);
    }

    #[tokio::test]
    async fn test_upload_placeholder_until_settled() {
        let store = InMemoryBlobStore::new();
        let mut alice = session("alice");

        let upload = alice.begin_upload(OutgoingFile::new("a.txt", "text/plain", b"abc".to_vec()));
        let id = upload.message_id().clone();
        let placeholder = alice.conversation().get(&id).unwrap();
        assert_eq!(placeholder.state, DeliveryState::Sending);
        assert!(matches!(
            placeholder.content,
            MessageContent::Uploading { size: 3, .. }
        ));
        assert!(placeholder.file().is_none());

        let result = upload.run(&store).await;
        let envelope = alice.finish_upload(&id, result).unwrap();
        assert_eq!(envelope.message_id, id);
        assert_eq!(
            alice.conversation().get(&id).unwrap().file().unwrap().metadata.name,
            "a.txt"
        );
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_message() {
        let store = InMemoryBlobStore::new();
        let mut alice = Session::new(
            RoomConfig::new("lobby").with_max_file_size(4),
            PeerId::from("alice"),
        )
        .unwrap();

        let result = alice
            .send_file(&store, OutgoingFile::new("a.bin", "application/octet-stream", vec![0u8; 5]))
            .await;
        assert!(matches!(result, Err(ChatError::FileTooLarge { size: 33, max: 4 })));
        assert!(alice.conversation().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_download_text_message_fails() {
        let store = InMemoryBlobStore::new();
        let mut alice = session("alice");
        let outgoing = alice.send_text("not a file").unwrap();
        assert!(matches!(
            alice.download_file(&store, &outgoing.message_id).await,
            Err(ChatError::MessageNotFound(_))
        ));
    }

    #[test]
    fn test_remote_typing_uses_nickname() {
        let mut alice = session("alice");
        alice
            .handle_event(RelayEvent::UserTyping {
                session_id: sid("zed"),
                nickname: Some("Zed".to_string()),
            })
            .unwrap();
        assert_eq!(alice.typing_indicator().as_deref(), Some("Zed is typing..."));
        alice
            .handle_event(RelayEvent::UserStoppedTyping {
                session_id: sid("zed"),
            })
            .unwrap();
        assert_eq!(alice.typing_indicator(), None);
    }
}
