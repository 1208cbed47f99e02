//! Identifiers, protocol constants and the error type for cipherroom.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of a symmetric key in bytes.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of the nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of a public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a wrapped key: ephemeral public key + nonce + sealed symmetric key.
pub const WRAPPED_KEY_SIZE: usize = PUBLIC_KEY_SIZE + NONCE_SIZE + SYMMETRIC_KEY_SIZE + TAG_SIZE;

/// Largest file the blob store accepts (10 MiB).
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Quiet period after the last keystroke before `typing-stop` is sent.
pub const TYPING_QUIET_PERIOD_MS: u64 = 2000;

/// Key derivation salt for seed-derived key pairs.
pub const KEY_DERIVATION_SALT: &[u8] = b"cipherroom-v1-identity";

/// Key derivation info for seed-derived key pairs.
pub const KEY_DERIVATION_INFO: &[u8] = b"x25519-key";

/// Info prefix for deriving the key that seals a wrapped symmetric key.
pub const WRAP_INFO_PREFIX: &[u8] = b"cipherroom-v1-wrap";

/// Durable identity of a participant, stable for one room visit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Create a new random identity.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transient identifier the relay assigns to one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Globally unique identifier of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a new random message ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors that can occur during cipherroom operations.
#[derive(Error, Debug)]
pub enum ChatError {
    // Session Errors
    /// The relay refused the join (room full, etc.).
    #[error("Join rejected: {0}")]
    JoinRejected(String),

    /// The crypto engine could not produce a key pair.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// The room actor is no longer running.
    #[error("Room closed")]
    RoomClosed,

    // Encryption Errors
    /// Invalid seed length.
    #[error("Invalid seed length: expected 32 bytes, got {0}")]
    InvalidSeedLength(usize),

    /// Invalid public key format.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    /// Decryption failed.
    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    /// No wrapped key addressed to the local participant.
    #[error("No wrapped key for {0}")]
    NotARecipient(PeerId),

    // Envelope Errors
    /// Invalid envelope data.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Message has nothing to send.
    #[error("Message is empty")]
    EmptyMessage,

    /// Message not found in the conversation.
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    // Transfer Errors
    /// File exceeds the blob store cap.
    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    /// Blob store has no blob under this id.
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// Blob store operation failed.
    #[error("Storage failed: {0}")]
    StorageFailed(String),

    // Transport Errors
    /// The relay could not take an outbound signal.
    #[error("Relay failed: {0}")]
    RelayFailed(String),

    /// JSON (de)serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    /// Whether this error must end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChatError::JoinRejected(_) | ChatError::KeyGeneration(_) | ChatError::RoomClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
