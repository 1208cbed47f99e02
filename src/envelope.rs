//! Wire shapes exchanged through the relay.
//!
//! Every shape is JSON with camelCase field names. Binary fields (message
//! ciphertext, wrapped keys, public keys) travel as standard base64.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::WrappedKey;
use crate::types::{ChatError, MessageId, PeerId, Result, SessionId};

/// Request to join a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub room_id: String,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_limit: Option<u32>,
}

/// Step of the public key handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeySignalType {
    OfferKey,
    AnswerKey,
}

/// Directed signal carrying the sender's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySignal {
    /// Transport session the signal is addressed to.
    pub target_peer: SessionId,
    #[serde(rename = "type")]
    pub kind: KeySignalType,
    /// Base64 X25519 public key of the signer.
    pub public_key: String,
    /// Durable identity of the signer.
    pub identity: PeerId,
}

/// What a message envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
}

/// Cleartext description of an uploaded file.
///
/// Only the file content is confidential; this metadata is visible to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub blob_id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// A fan-out encrypted message as published to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub room_id: String,
    pub sender_id: PeerId,
    pub message_id: MessageId,
    pub kind: MessageKind,
    /// Sealed body; absent for file envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub ciphertext: Option<Vec<u8>>,
    /// One wrapped symmetric key per intended recipient.
    pub wrapped_keys: BTreeMap<PeerId, WrappedKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMetadata>,
}

impl MessageEnvelope {
    /// Encode the envelope to JSON.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode and validate an envelope from JSON.
    pub fn decode(data: &str) -> Result<Self> {
        let envelope: Self = serde_json::from_str(data)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Check that the payload matches the declared kind.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            MessageKind::Text if self.ciphertext.is_none() => Err(ChatError::InvalidEnvelope(
                "Text envelope without ciphertext".to_string(),
            )),
            MessageKind::File if self.file.is_none() => Err(ChatError::InvalidEnvelope(
                "File envelope without file metadata".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// The wrapped key addressed to `peer`, if any.
    pub fn wrapped_key_for(&self, peer: &PeerId) -> Option<&WrappedKey> {
        self.wrapped_keys.get(peer)
    }
}

/// Acknowledgement level reported back to a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Delivered,
    Read,
}

/// Delivery or read acknowledgement for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckSignal {
    pub room_id: String,
    pub message_id: MessageId,
    /// Original sender of the acknowledged message.
    pub sender_id: PeerId,
    /// Participant acknowledging it.
    pub recipient_id: PeerId,
    pub status: AckStatus,
}

/// Typing state broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingStatus {
    Start,
    Stop,
}

/// Typing signal broadcast to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub room_id: String,
    pub status: TypingStatus,
}

mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_envelope() -> MessageEnvelope {
        let mut wrapped_keys = BTreeMap::new();
        wrapped_keys.insert(PeerId::from("bob"), WrappedKey::from_bytes(vec![4u8; 92]));
        MessageEnvelope {
            room_id: "lobby".to_string(),
            sender_id: PeerId::from("alice"),
            message_id: MessageId::from("m-1"),
            kind: MessageKind::Text,
            ciphertext: Some(vec![5u8; 40]),
            wrapped_keys,
            file: None,
        }
    }

    #[test]
    fn test_envelope_json_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&text_envelope().encode().unwrap()).unwrap();
        assert_eq!(json["roomId"], "lobby");
        assert_eq!(json["senderId"], "alice");
        assert_eq!(json["messageId"], "m-1");
        assert_eq!(json["kind"], "text");
        assert!(json["ciphertext"].is_string());
        assert!(json["wrappedKeys"]["bob"].is_string());
        assert!(json.get("file").is_none());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let envelope = text_envelope();
        let decoded = MessageEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_rejects_text_without_ciphertext() {
        let mut envelope = text_envelope();
        envelope.ciphertext = None;
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(matches!(
            MessageEnvelope::decode(&json),
            Err(ChatError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            MessageEnvelope::decode("{not json"),
            Err(ChatError::Serialization(_))
        ));
    }

    #[test]
    fn test_key_signal_shape() {
        let signal = KeySignal {
            target_peer: SessionId::from("sock-2"),
            kind: KeySignalType::OfferKey,
            public_key: "AAAA".to_string(),
            identity: PeerId::from("alice"),
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["type"], "offer-key");
        assert_eq!(json["targetPeer"], "sock-2");
        assert_eq!(json["publicKey"], "AAAA");
    }

    #[test]
    fn test_ack_and_typing_shapes() {
        let ack = AckSignal {
            room_id: "lobby".to_string(),
            message_id: MessageId::from("m-1"),
            sender_id: PeerId::from("alice"),
            recipient_id: PeerId::from("bob"),
            status: AckStatus::Delivered,
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["status"], "delivered");
        assert_eq!(json["recipientId"], "bob");

        let typing = TypingSignal {
            room_id: "lobby".to_string(),
            status: TypingStatus::Stop,
        };
        assert_eq!(serde_json::to_value(&typing).unwrap()["status"], "stop");
    }

    #[test]
    fn test_join_request_omits_missing_limit() {
        let join = JoinRequest {
            room_id: "lobby".to_string(),
            nickname: "Anonymous".to_string(),
            user_limit: None,
        };
        let json = serde_json::to_value(&join).unwrap();
        assert!(json.get("userLimit").is_none());
    }
}
