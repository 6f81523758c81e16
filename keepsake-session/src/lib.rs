//! # Keepsake Session
//!
//! Profile store adapters. [`MemoryProfileStore`] keeps records in process; with the `sqlite` or
//! `postgres` feature, [`SqlProfileStore`] persists them through `sqlx`.

use async_trait::async_trait;
use chrono::Utc;
pub use keepsake_core::{ProfileRecord, ProfileStore, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[cfg(feature = "store-sqlx")]
pub mod sql_store;
#[cfg(feature = "store-sqlx")]
pub use sql_store::SqlProfileStore;

/// An in-memory profile store.
///
/// The write lock serializes concurrent upserts, so the last upsert to complete wins per field.
#[derive(Debug)]
pub struct MemoryProfileStore {
    records: RwLock<HashMap<String, ProfileRecord>>,
    available: AtomicBool,
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryProfileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the store offline (or back online). While offline every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delete a record. This is an administrative operation; the session controller never
    /// calls it.
    pub async fn remove(&self, identity: &str) -> Result<Option<ProfileRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.write().await.remove(identity))
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// True when no record is stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory profile store is offline".to_string()))
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, identity: &str) -> Result<Option<ProfileRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.read().await.get(identity).cloned())
    }

    async fn upsert_merge(
        &self,
        identity: &str,
        patch: ProfileRecord,
    ) -> Result<ProfileRecord, StoreError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let merged = ProfileRecord::upserted(records.remove(identity), patch, Utc::now());
        records.insert(identity.to_string(), merged.clone());
        Ok(merged)
    }
}
