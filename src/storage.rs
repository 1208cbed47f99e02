//! Blob storage for encrypted file uploads.
//!
//! The store only ever sees ciphertext. It issues an opaque id on upload and
//! rejects payloads above its size cap.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::types::{ChatError, Result, MAX_FILE_SIZE};

/// Trait for storing and fetching encrypted file blobs.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob and return its id.
    ///
    /// Payloads above the cap fail with [`ChatError::FileTooLarge`].
    async fn put(&self, bytes: Vec<u8>) -> Result<String>;

    /// Fetch a blob by id.
    async fn get(&self, id: &str) -> Result<Vec<u8>>;
}

/// In-memory implementation of BlobStore.
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    max_size: usize,
}

impl InMemoryBlobStore {
    /// Creates a store with the default 10 MiB cap.
    pub fn new() -> Self {
        Self::with_max_size(MAX_FILE_SIZE)
    }

    /// Creates a store with a custom cap.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
            max_size,
        }
    }

    /// Returns the number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        if bytes.len() > self.max_size {
            return Err(ChatError::FileTooLarge {
                size: bytes.len(),
                max: self.max_size,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.blobs.write().await.insert(id.clone(), bytes);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::BlobNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = InMemoryBlobStore::new();
        let id = store.put(vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_rejects_oversized_payload() {
        let store = InMemoryBlobStore::with_max_size(8);
        let result = store.put(vec![0u8; 9]).await;
        assert!(matches!(
            result,
            Err(ChatError::FileTooLarge { size: 9, max: 8 })
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = InMemoryBlobStore::new();
        assert!(matches!(
            store.get("nope").await,
            Err(ChatError::BlobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = InMemoryBlobStore::new();
        let a = store.put(vec![1]).await.unwrap();
        let b = store.put(vec![1]).await.unwrap();
        assert_ne!(a, b);
    }
}
