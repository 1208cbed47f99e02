//! Hybrid encryption: per-message symmetric keys wrapped per recipient.
//!
//! Bodies and file payloads are sealed with ChaCha20-Poly1305 under a fresh
//! [`SymmetricKey`]. That key is wrapped for each recipient with an X25519
//! sealed box: an ephemeral ECDH against the recipient's public key feeds
//! HKDF-SHA256, and the derived key seals the symmetric key bytes.

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use x25519_dalek::PublicKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::{generate_ephemeral_keypair, x25519_ecdh, KeyPair};
use crate::types::{
    ChatError, Result, NONCE_SIZE, PUBLIC_KEY_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE, WRAPPED_KEY_SIZE,
    WRAP_INFO_PREFIX,
};

/// Ephemeral key for exactly one message body or one file.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; SYMMETRIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            ChatError::DecryptionError(format!(
                "Unwrapped key has {} bytes, expected {}",
                bytes.len(),
                SYMMETRIC_KEY_SIZE
            ))
        })?;
        Ok(Self(key))
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| ChatError::EncryptionError(format!("Cipher init failed: {}", e)))?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| ChatError::EncryptionError(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt data produced by [`SymmetricKey::encrypt`].
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ChatError::DecryptionError(format!(
                "Ciphertext too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| ChatError::DecryptionError(format!("Cipher init failed: {}", e)))?;

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| ChatError::DecryptionError(format!("Decryption failed: {}", e)))
    }

    /// Wrap this key for a recipient's public key.
    pub fn wrap_for(&self, recipient: &PublicKey) -> Result<WrappedKey> {
        let (ephemeral_private, ephemeral_public) = generate_ephemeral_keypair();
        let shared_secret = x25519_ecdh(&ephemeral_private, recipient);
        let wrapping_key = derive_wrapping_key(&shared_secret, &ephemeral_public, recipient)
            .map_err(ChatError::EncryptionError)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = ChaCha20Poly1305::new_from_slice(&wrapping_key)
            .map_err(|e| ChatError::EncryptionError(format!("Wrap cipher init failed: {}", e)))?;
        let sealed_key = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), self.0.as_slice())
            .map_err(|e| ChatError::EncryptionError(format!("Key wrap failed: {}", e)))?;

        let mut wrapped = Vec::with_capacity(WRAPPED_KEY_SIZE);
        wrapped.extend_from_slice(ephemeral_public.as_bytes());
        wrapped.extend_from_slice(&nonce_bytes);
        wrapped.extend_from_slice(&sealed_key);
        Ok(WrappedKey(wrapped))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// A symmetric key sealed to one recipient.
///
/// Layout (92 bytes):
/// - [0-31]   ephemeral X25519 public key
/// - [32-43]  nonce
/// - [44-91]  sealed symmetric key (32 bytes + 16-byte tag)
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey(Vec<u8>);

impl WrappedKey {
    /// Wrap raw bytes received off the wire.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Unwrap with the recipient's key pair.
    pub fn unwrap_with(&self, keys: &KeyPair) -> Result<SymmetricKey> {
        if self.0.len() != WRAPPED_KEY_SIZE {
            return Err(ChatError::DecryptionError(format!(
                "Wrapped key has {} bytes, expected {}",
                self.0.len(),
                WRAPPED_KEY_SIZE
            )));
        }

        let mut ephemeral_bytes = [0u8; PUBLIC_KEY_SIZE];
        ephemeral_bytes.copy_from_slice(&self.0[..PUBLIC_KEY_SIZE]);
        let ephemeral_public = PublicKey::from(ephemeral_bytes);
        let nonce = Nonce::from_slice(&self.0[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NONCE_SIZE]);
        let sealed_key = &self.0[PUBLIC_KEY_SIZE + NONCE_SIZE..];

        let shared_secret = x25519_ecdh(keys.private_key(), &ephemeral_public);
        let wrapping_key = derive_wrapping_key(&shared_secret, &ephemeral_public, keys.public_key())
            .map_err(ChatError::DecryptionError)?;

        let cipher = ChaCha20Poly1305::new_from_slice(&wrapping_key)
            .map_err(|e| ChatError::DecryptionError(format!("Unwrap cipher init failed: {}", e)))?;
        let key_bytes = cipher
            .decrypt(nonce, sealed_key)
            .map_err(|e| ChatError::DecryptionError(format!("Key unwrap failed: {}", e)))?;

        SymmetricKey::from_slice(&key_bytes)
    }
}

impl std::fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WrappedKey({})", STANDARD.encode(&self.0))
    }
}

impl Serialize for WrappedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for WrappedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(WrappedKey)
            .map_err(serde::de::Error::custom)
    }
}

fn derive_wrapping_key(
    shared_secret: &[u8; 32],
    ephemeral_public: &PublicKey,
    recipient: &PublicKey,
) -> std::result::Result<[u8; 32], String> {
    // Info binds the wrap to both the ephemeral and the recipient key
    let mut info = Vec::with_capacity(WRAP_INFO_PREFIX.len() + 2 * PUBLIC_KEY_SIZE);
    info.extend_from_slice(WRAP_INFO_PREFIX);
    info.extend_from_slice(ephemeral_public.as_bytes());
    info.extend_from_slice(recipient.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(ephemeral_public.as_bytes()), shared_secret);
    let mut wrapping_key = [0u8; 32];
    hkdf.expand(&info, &mut wrapping_key)
        .map_err(|e| format!("HKDF expand failed: {}", e))?;
    Ok(wrapping_key)
}
