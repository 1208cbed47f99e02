//! CipherRoom - End-to-end encrypted group chat over an untrusted relay
//!
//! Participants exchange X25519 public keys through the relay, then fan out
//! every message as one ChaCha20-Poly1305 ciphertext plus a copy of its key
//! wrapped for each known peer. The relay and the blob store only ever see
//! ciphertext, wrapped keys and routing metadata.

mod types;
mod keys;
mod crypto;
mod envelope;
mod models;
mod directory;
mod exchange;
mod messaging;
mod storage;
mod transfer;
mod typing;
mod relay;
mod session;
mod room;

pub use types::*;
pub use keys::*;
pub use crypto::*;
pub use envelope::*;
pub use models::*;
pub use directory::*;
pub use exchange::*;
pub use messaging::*;
pub use storage::*;
pub use transfer::*;
pub use typing::*;
pub use relay::*;
pub use session::*;
pub use room::*;
