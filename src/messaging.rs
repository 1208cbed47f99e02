//! Building and opening fan-out encrypted text envelopes.

use std::collections::BTreeMap;

use x25519_dalek::PublicKey;

use crate::crypto::{SymmetricKey, WrappedKey};
use crate::envelope::{AckSignal, AckStatus, MessageEnvelope, MessageKind};
use crate::keys::KeyPair;
use crate::models::{FileRef, MessageContent};
use crate::types::{ChatError, MessageId, PeerId, Result};

/// Wrap `key` once for every recipient.
pub fn wrap_for_all(
    key: &SymmetricKey,
    recipients: &[(PeerId, PublicKey)],
) -> Result<BTreeMap<PeerId, WrappedKey>> {
    recipients
        .iter()
        .map(|(peer, public_key)| Ok((peer.clone(), key.wrap_for(public_key)?)))
        .collect()
}

/// Encrypt a text message for a snapshot of the directory.
///
/// # Arguments
/// * `room_id` - Room the envelope is published to
/// * `sender` - Local identity
/// * `plaintext` - Message text
/// * `recipients` - Peers known at send time
///
/// # Returns
/// The envelope to publish, under a fresh message id
pub fn seal_text(
    room_id: &str,
    sender: &PeerId,
    plaintext: &str,
    recipients: &[(PeerId, PublicKey)],
) -> Result<MessageEnvelope> {
    let key = SymmetricKey::generate();
    let ciphertext = key.encrypt(plaintext.as_bytes())?;
    let wrapped_keys = wrap_for_all(&key, recipients)?;

    Ok(MessageEnvelope {
        room_id: room_id.to_string(),
        sender_id: sender.clone(),
        message_id: MessageId::new(),
        kind: MessageKind::Text,
        ciphertext: Some(ciphertext),
        wrapped_keys,
        file: None,
    })
}

/// Recover the symmetric key addressed to `local`.
pub fn unwrap_key(envelope: &MessageEnvelope, local: &PeerId, keys: &KeyPair) -> Result<SymmetricKey> {
    envelope
        .wrapped_key_for(local)
        .ok_or_else(|| ChatError::NotARecipient(local.clone()))?
        .unwrap_with(keys)
}

/// Decrypt an envelope addressed to `local`.
///
/// Text bodies are decrypted in full. For files only the key is checked;
/// the wrapped key and metadata are kept for a later download.
pub fn open_envelope(
    envelope: &MessageEnvelope,
    local: &PeerId,
    keys: &KeyPair,
) -> Result<MessageContent> {
    envelope.validate()?;
    let key = unwrap_key(envelope, local, keys)?;

    match envelope.kind {
        MessageKind::Text => {
            let ciphertext = envelope.ciphertext.as_deref().unwrap_or_default();
            let plaintext = key.decrypt(ciphertext)?;
            let text = String::from_utf8(plaintext)
                .map_err(|e| ChatError::DecryptionError(format!("Invalid UTF-8: {}", e)))?;
            Ok(MessageContent::Text(text))
        }
        MessageKind::File => {
            let metadata = envelope
                .file
                .clone()
                .ok_or_else(|| ChatError::InvalidEnvelope("Missing file metadata".to_string()))?;
            let wrapped_key = envelope
                .wrapped_key_for(local)
                .cloned()
                .ok_or_else(|| ChatError::NotARecipient(local.clone()))?;
            Ok(MessageContent::File(FileRef {
                metadata,
                wrapped_key,
            }))
        }
    }
}

/// Acknowledgement of `envelope` from `local` back to its sender.
pub fn acknowledge(envelope: &MessageEnvelope, local: &PeerId, status: AckStatus) -> AckSignal {
    AckSignal {
        room_id: envelope.room_id.clone(),
        message_id: envelope.message_id.clone(),
        sender_id: envelope.sender_id.clone(),
        recipient_id: local.clone(),
        status,
    }
}
