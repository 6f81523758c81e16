use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keepsake_core::StoreError;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A labelled photo owned by one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique id of the memory.
    pub id: String,
    /// Identity (provider subject) of the owner.
    pub owner: String,
    /// Caption given by the user.
    pub label: String,
    /// Download URL returned by the object store.
    pub image_url: String,
    /// Object store key of the photo.
    pub object_key: String,
    /// Capture time.
    pub created_at: DateTime<Utc>,
}

/// Index of memory records, partitioned by owner.
#[async_trait]
pub trait MemoryRepository: Send + Sync + 'static {
    /// Store a new record.
    async fn add(&self, record: MemoryRecord) -> Result<(), StoreError>;

    /// Records of `owner`, in no particular order.
    async fn list(&self, owner: &str) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Remove a record if `owner` owns it.
    async fn remove(&self, owner: &str, id: &str) -> Result<Option<MemoryRecord>, StoreError>;
}

/// A process-local [`MemoryRepository`].
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryRepository for InMemoryRepository {
    async fn add(&self, record: MemoryRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn list(&self, owner: &str) -> Result<Vec<MemoryRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect())
    }

    async fn remove(&self, owner: &str, id: &str) -> Result<Option<MemoryRecord>, StoreError> {
        let mut records = self.records.write().await;
        Ok(records
            .iter()
            .position(|r| r.owner == owner && r.id == id)
            .map(|index| records.remove(index)))
    }
}
