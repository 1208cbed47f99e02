//! Relay interface.
//!
//! The relay forwards signals and envelopes by room and by session without
//! ever decrypting them. This module defines what it delivers to us
//! ([`RelayEvent`]), what we hand to it ([`Outbound`]), and the trait a
//! transport implements to carry outbound signals.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::envelope::{
    AckSignal, AckStatus, JoinRequest, KeySignal, MessageEnvelope, TypingSignal, TypingStatus,
};
use crate::types::{ChatError, PeerId, Result, SessionId};

/// Everything the relay can deliver to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RelayEvent {
    /// Someone joined the room.
    #[serde(rename_all = "camelCase")]
    UserJoined {
        session_id: SessionId,
        user_id: PeerId,
        #[serde(default)]
        nickname: Option<String>,
    },
    /// Someone's connection left the room.
    #[serde(rename_all = "camelCase")]
    UserLeft {
        session_id: SessionId,
        user_id: PeerId,
    },
    /// Directed key signal from another session.
    ///
    /// `user_id` is the identity the relay authenticated for `sender`.
    #[serde(rename_all = "camelCase")]
    Signal {
        sender: SessionId,
        user_id: PeerId,
        signal: KeySignal,
    },
    /// Envelope published to the room, with the sender's authenticated
    /// identity.
    #[serde(rename_all = "camelCase")]
    ReceiveMessage {
        sender: SessionId,
        user_id: PeerId,
        envelope: MessageEnvelope,
    },
    /// Acknowledgement for one of our messages.
    MessageStatus(AckSignal),
    /// A peer started typing.
    #[serde(rename_all = "camelCase")]
    UserTyping {
        session_id: SessionId,
        #[serde(default)]
        nickname: Option<String>,
    },
    /// A peer stopped typing.
    #[serde(rename_all = "camelCase")]
    UserStoppedTyping { session_id: SessionId },
    /// Current room occupancy.
    RoomInfo { count: u32 },
    /// Join refused; ends the session.
    Error { message: String },
}

impl RelayEvent {
    /// Decode an event from JSON.
    pub fn decode(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Everything a participant hands to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Outbound {
    /// Join the room.
    JoinRoom(JoinRequest),
    /// Directed key signal; the target is inside the signal.
    Signal(KeySignal),
    /// Publish an envelope to the room.
    SendMessage(MessageEnvelope),
    /// Tell a sender its envelope arrived.
    MessageDelivered(AckSignal),
    /// Tell a sender its message was decrypted.
    MessageRead(AckSignal),
    /// Broadcast that we started typing.
    TypingStart(TypingSignal),
    /// Broadcast that we stopped typing.
    TypingStop(TypingSignal),
}

impl Outbound {
    /// Wrap an acknowledgement in the variant matching its status.
    pub fn ack(ack: AckSignal) -> Self {
        match ack.status {
            AckStatus::Delivered => Outbound::MessageDelivered(ack),
            AckStatus::Read => Outbound::MessageRead(ack),
        }
    }

    /// Typing signal for `room_id`.
    pub fn typing(room_id: &str, status: TypingStatus) -> Self {
        let signal = TypingSignal {
            room_id: room_id.to_string(),
            status,
        };
        match status {
            TypingStatus::Start => Outbound::TypingStart(signal),
            TypingStatus::Stop => Outbound::TypingStop(signal),
        }
    }

    /// Encode to JSON.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Trait for handing outbound signals to the relay.
///
/// Delivery is fire-and-forget; the protocol's own acknowledgements are the
/// only confirmation.
#[async_trait::async_trait]
pub trait Relay: Send + Sync {
    /// Send one signal.
    async fn send(&self, signal: Outbound) -> Result<()>;
}

/// Relay that pushes outbound signals into a channel.
///
/// Useful to bridge to a socket task, and in tests to observe traffic.
#[derive(Debug, Clone)]
pub struct ChannelRelay {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelRelay {
    /// Creates the relay and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl Relay for ChannelRelay {
    async fn send(&self, signal: Outbound) -> Result<()> {
        self.tx
            .send(signal)
            .map_err(|_| ChatError::RelayFailed("Outbound channel closed".to_string()))
    }
}
