//! Data models for the local view of a room.
//!
//! This module defines messages, their delivery state machine, and the
//! conversation that holds them for the lifetime of a session.

use std::time::SystemTime;

use crate::crypto::WrappedKey;
use crate::envelope::{AckStatus, FileMetadata};
use crate::types::{MessageId, PeerId};

/// Sender-side delivery state of a message.
///
/// States are ordered; a message only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeliveryState {
    /// Created locally, envelope not yet handed to the relay.
    Sending,
    /// Envelope published.
    Sent,
    /// At least one recipient received the envelope.
    Delivered,
    /// At least one recipient decrypted the message.
    Read,
}

impl DeliveryState {
    /// The state after observing `next`; never moves backwards.
    pub fn advance(self, next: DeliveryState) -> DeliveryState {
        self.max(next)
    }
}

impl From<AckStatus> for DeliveryState {
    fn from(status: AckStatus) -> Self {
        match status {
            AckStatus::Delivered => DeliveryState::Delivered,
            AckStatus::Read => DeliveryState::Read,
        }
    }
}

/// Direction of a message relative to the local participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageDirection {
    /// Message was sent by the local participant.
    Sent,
    /// Message was received from a peer.
    Received,
}

/// A file shared in the room, not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Cleartext metadata from the envelope.
    pub metadata: FileMetadata,
    /// The file key wrapped for the local participant.
    pub wrapped_key: WrappedKey,
}

/// What a message shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    File(FileRef),
    /// Local upload still in flight.
    Uploading {
        name: String,
        mime_type: String,
        size: u64,
    },
}

/// A message in the local conversation view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Globally unique identifier.
    pub id: MessageId,
    /// Identity of the author.
    pub sender: PeerId,
    /// Decrypted text or file reference.
    pub content: MessageContent,
    /// Local time the message entered the view.
    pub timestamp: SystemTime,
    /// Message direction relative to the local participant.
    pub direction: MessageDirection,
    /// Delivery state. Received messages are always `Read`.
    pub state: DeliveryState,
}

impl Message {
    /// Creates a message authored locally, in state `Sending`.
    pub fn new_outgoing(id: MessageId, sender: PeerId, content: MessageContent) -> Self {
        Self {
            id,
            sender,
            content,
            timestamp: SystemTime::now(),
            direction: MessageDirection::Sent,
            state: DeliveryState::Sending,
        }
    }

    /// Creates a message received from a peer.
    pub fn new_incoming(id: MessageId, sender: PeerId, content: MessageContent) -> Self {
        Self {
            id,
            sender,
            content,
            timestamp: SystemTime::now(),
            direction: MessageDirection::Received,
            state: DeliveryState::Read,
        }
    }

    /// The text, for text messages.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The file reference, for file messages.
    pub fn file(&self) -> Option<&FileRef> {
        match &self.content {
            MessageContent::File(file) => Some(file),
            _ => None,
        }
    }

    /// Apply an acknowledgement. Returns true if the state moved.
    pub fn apply_ack(&mut self, status: AckStatus) -> bool {
        let next = self.state.advance(status.into());
        let changed = next != self.state;
        self.state = next;
        changed
    }
}

/// Messages of one room visit, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Creates an empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all messages.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the most recent message.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns all received messages.
    pub fn received_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|m| m.direction == MessageDirection::Received)
    }

    /// Returns all sent messages.
    pub fn sent_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|m| m.direction == MessageDirection::Sent)
    }

    /// Looks up a message by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    /// Returns the number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation has any messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Adds a message; a message id already present is ignored.
    pub fn append(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Removes a message, returning it.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let pos = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(pos))
    }

    /// Applies an acknowledgement to one of our sent messages.
    ///
    /// Returns the new state if it changed. Acks for unknown or received
    /// messages are ignored.
    pub fn apply_ack(&mut self, id: &MessageId, status: AckStatus) -> Option<DeliveryState> {
        let message = self.get_mut(id)?;
        if message.direction != MessageDirection::Sent {
            return None;
        }
        message.apply_ack(status).then_some(message.state)
    }
}
