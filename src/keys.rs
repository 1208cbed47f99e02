//! Session key pairs and public key import/export.

use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::types::{ChatError, Result, KEY_DERIVATION_INFO, KEY_DERIVATION_SALT, PUBLIC_KEY_SIZE};

/// A participant's X25519 key pair, held for the lifetime of one session.
///
/// Only the public half ever leaves the process.
pub struct KeyPair {
    private_key: StaticSecret,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS random source.
    ///
    /// A failing random source is reported as [`ChatError::KeyGeneration`];
    /// a session must not start without a key pair.
    pub fn generate() -> Result<Self> {
        let mut secret = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| ChatError::KeyGeneration(e.to_string()))?;

        let private_key = StaticSecret::from(secret);
        let public_key = PublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Derive a key pair from a 32-byte seed using HKDF-SHA256.
    ///
    /// # Arguments
    /// * `seed` - 32-byte seed
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        if seed.len() != 32 {
            return Err(ChatError::InvalidSeedLength(seed.len()));
        }

        let hkdf = Hkdf::<Sha256>::new(Some(KEY_DERIVATION_SALT), seed);
        let mut derived_key = [0u8; 32];
        hkdf.expand(KEY_DERIVATION_INFO, &mut derived_key)
            .map_err(|e| ChatError::KeyGeneration(format!("HKDF expand failed: {}", e)))?;

        let private_key = StaticSecret::from(derived_key);
        let public_key = PublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Returns the public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Returns the private key.
    pub(crate) fn private_key(&self) -> &StaticSecret {
        &self.private_key
    }

    /// Serialize the public key for a `KeySignal`.
    pub fn export_public_key(&self) -> String {
        export_public_key(&self.public_key)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.export_public_key())
            .finish_non_exhaustive()
    }
}

/// Encode a public key as base64.
pub fn export_public_key(public_key: &PublicKey) -> String {
    STANDARD.encode(public_key.as_bytes())
}

/// Decode a base64 public key received from a peer.
pub fn import_public_key(encoded: &str) -> Result<PublicKey> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ChatError::InvalidPublicKey(format!("Invalid base64: {}", e)))?;

    let bytes: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
        ChatError::InvalidPublicKey(format!(
            "Expected {} bytes, got {}",
            PUBLIC_KEY_SIZE,
            b.len()
        ))
    })?;

    Ok(PublicKey::from(bytes))
}

/// Generate a random ephemeral X25519 key pair for one key wrap.
///
/// # Returns
/// Tuple of (private_key, public_key)
pub fn generate_ephemeral_keypair() -> (StaticSecret, PublicKey) {
    let private_key = StaticSecret::random_from_rng(OsRng);
    let public_key = PublicKey::from(&private_key);
    (private_key, public_key)
}

/// Perform X25519 ECDH key exchange.
///
/// # Returns
/// 32-byte shared secret
pub fn x25519_ecdh(private_key: &StaticSecret, public_key: &PublicKey) -> [u8; 32] {
    private_key.diffie_hellman(public_key).to_bytes()
}
