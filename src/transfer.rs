//! Encrypted file transfer through the blob store.
//!
//! Uploads encrypt the file under a key of its own, store the ciphertext,
//! and publish the key wrapped for every peer and for the uploader. Downloads
//! happen only on request and reverse the process.

use x25519_dalek::PublicKey;
use tracing::debug;

use crate::crypto::SymmetricKey;
use crate::envelope::{FileMetadata, MessageEnvelope, MessageKind};
use crate::keys::KeyPair;
use crate::messaging::wrap_for_all;
use crate::models::FileRef;
use crate::storage::BlobStore;
use crate::types::{ChatError, MessageId, PeerId, Result, NONCE_SIZE, TAG_SIZE};

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl OutgoingFile {
    /// Creates a file to upload.
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// An upload prepared by a session, ready to run away from its event loop.
pub struct PendingUpload {
    pub(crate) message_id: MessageId,
    pub(crate) room_id: String,
    pub(crate) sender: PeerId,
    pub(crate) sender_key: PublicKey,
    pub(crate) recipients: Vec<(PeerId, PublicKey)>,
    pub(crate) file: OutgoingFile,
    pub(crate) max_size: usize,
}

impl PendingUpload {
    /// Id of the local message announcing the file.
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Encrypt and store the file.
    pub async fn run(self, store: &dyn BlobStore) -> Result<MessageEnvelope> {
        upload_file(
            store,
            &self.room_id,
            self.message_id,
            (&self.sender, &self.sender_key),
            &self.recipients,
            &self.file,
            self.max_size,
        )
        .await
    }
}

/// A download with its key already unwrapped.
pub struct PendingDownload {
    blob_id: String,
    key: SymmetricKey,
}

impl PendingDownload {
    /// Unwrap the file key of `file` with our key pair.
    pub fn new(file: &FileRef, keys: &KeyPair) -> Result<Self> {
        Ok(Self {
            blob_id: file.metadata.blob_id.clone(),
            key: file.wrapped_key.unwrap_with(keys)?,
        })
    }

    /// Fetch and decrypt the blob.
    pub async fn run(self, store: &dyn BlobStore) -> Result<Vec<u8>> {
        let ciphertext = store.get(&self.blob_id).await?;
        self.key.decrypt(&ciphertext)
    }
}

/// Size of `len` plaintext bytes once encrypted and stored.
pub fn encrypted_size(len: usize) -> usize {
    len + NONCE_SIZE + TAG_SIZE
}

/// Encrypt and store `file`, returning the envelope announcing it.
///
/// `max_size` caps the stored ciphertext, which is the plaintext plus nonce
/// and tag; a file whose ciphertext would exceed it fails with
/// [`ChatError::FileTooLarge`] reporting the encrypted size, before anything
/// is encrypted or stored. Store rejections fail the transfer the same way.
/// Nothing is published in either case.
///
/// # Arguments
/// * `store` - Blob store receiving the ciphertext
/// * `room_id` - Room the envelope is published to
/// * `message_id` - Id of the local message announcing the file
/// * `sender` - Local identity and public key, wrapped for alongside the peers
/// * `recipients` - Peers known at send time
/// * `file` - The file
/// * `max_size` - Largest accepted ciphertext
pub async fn upload_file(
    store: &dyn BlobStore,
    room_id: &str,
    message_id: MessageId,
    sender: (&PeerId, &PublicKey),
    recipients: &[(PeerId, PublicKey)],
    file: &OutgoingFile,
    max_size: usize,
) -> Result<MessageEnvelope> {
    let size = encrypted_size(file.bytes.len());
    if size > max_size {
        return Err(ChatError::FileTooLarge {
            size,
            max: max_size,
        });
    }

    let key = SymmetricKey::generate();
    let ciphertext = key.encrypt(&file.bytes)?;

    let (sender_id, sender_key) = sender;
    let mut audience = recipients.to_vec();
    audience.retain(|(peer, _)| peer != sender_id);
    audience.push((sender_id.clone(), *sender_key));
    let wrapped_keys = wrap_for_all(&key, &audience)?;

    let blob_id = store.put(ciphertext).await?;
    debug!(%blob_id, name = %file.name, size = file.bytes.len(), "uploaded encrypted file");

    Ok(MessageEnvelope {
        room_id: room_id.to_string(),
        sender_id: sender_id.clone(),
        message_id,
        kind: MessageKind::File,
        ciphertext: None,
        wrapped_keys,
        file: Some(FileMetadata {
            blob_id,
            name: file.name.clone(),
            size: file.bytes.len() as u64,
            mime_type: file.mime_type.clone(),
        }),
    })
}

/// Fetch and decrypt a file shared in the room.
pub async fn download_file(store: &dyn BlobStore, file: &FileRef, keys: &KeyPair) -> Result<Vec<u8>> {
    PendingDownload::new(file, keys)?.run(store).await
}
