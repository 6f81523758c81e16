use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

/// Failures reported by an [`ObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectStoreError {
    /// The store could not be reached.
    #[error("Object store unavailable: {0}")]
    Unavailable(String),
    /// Nothing is stored under the key.
    #[error("No object at {0}")]
    NotFound(String),
}

/// Blob storage for uploaded media.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Store `bytes` under `key`, replacing any previous object, and return its download URL.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError>;

    /// Remove the object under `key`.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}

/// An object held by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Raw contents.
    pub bytes: Vec<u8>,
    /// MIME type given at upload.
    pub content_type: String,
}

/// An in-process object store. URLs have the form `memory://objects/{key}`.
#[derive(Debug)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    available: AtomicBool,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryObjectStore {
    /// Prefix of every URL returned by [`ObjectStore::put`].
    pub const BASE_URL: &'static str = "memory://objects/";

    /// An empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the store offline (or back online). Offline, every operation fails with
    /// [`ObjectStoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// The object under `key`, if any.
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), ObjectStoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ObjectStoreError::Unavailable(
                "memory object store is offline".to_string(),
            ))
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        self.check_available()?;
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("{}{}", Self::BASE_URL, key))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.check_available()?;
        match self.objects.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(ObjectStoreError::NotFound(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_returns_a_url_and_delete_removes() {
        let store = MemoryObjectStore::new();
        let url = store
            .put("memories/u1/1", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        assert_eq!(url, "memory://objects/memories/u1/1");
        assert_eq!(
            store.get("memories/u1/1").await.map(|o| o.content_type),
            Some("image/jpeg".to_string())
        );

        store.delete("memories/u1/1").await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(
            store.delete("memories/u1/1").await.unwrap_err(),
            ObjectStoreError::NotFound("memories/u1/1".into())
        );
    }
}
