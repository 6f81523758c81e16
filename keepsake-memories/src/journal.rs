use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::repository::{MemoryRecord, MemoryRepository};
use chrono::Utc;
use keepsake_core::StoreError;
use keepsake_flow::SessionController;
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`MemoryJournal`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JournalError {
    /// No user is signed in, or the user changed mid-operation.
    #[error("Sign in to use the memory journal")]
    NotSignedIn,
    /// The label was blank.
    #[error("A memory needs a label")]
    EmptyLabel,
    /// The current user owns no memory with this id.
    #[error("No memory with id {0}")]
    NotFound(String),
    /// The photo could not be stored.
    #[error("Upload failed: {0}")]
    Upload(#[from] ObjectStoreError),
    /// The record store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The signed-in user's photo memories.
///
/// Holds no user state of its own: the owner is read from the controller on every call, so
/// after a logout every operation fails with [`JournalError::NotSignedIn`].
#[derive(Clone)]
pub struct MemoryJournal {
    session: SessionController,
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn MemoryRepository>,
}

impl MemoryJournal {
    /// A journal for the user signed in to `session`.
    pub fn new<O, R>(session: SessionController, objects: O, records: R) -> Self
    where
        O: ObjectStore,
        R: MemoryRepository,
    {
        Self {
            session,
            objects: Arc::new(objects),
            records: Arc::new(records),
        }
    }

    /// Like [`MemoryJournal::new`], with stores that are already shared.
    pub fn with_shared(
        session: SessionController,
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn MemoryRepository>,
    ) -> Self {
        Self {
            session,
            objects,
            records,
        }
    }

    fn owner(&self) -> Result<String, JournalError> {
        self.session
            .current_session()
            .identity()
            .map(str::to_string)
            .ok_or(JournalError::NotSignedIn)
    }

    /// Upload a photo and record it under the current user.
    pub async fn capture(
        &self,
        label: &str,
        image: Vec<u8>,
        content_type: &str,
    ) -> Result<MemoryRecord, JournalError> {
        let owner = self.owner()?;
        let label = label.trim();
        if label.is_empty() {
            return Err(JournalError::EmptyLabel);
        }

        let created_at = Utc::now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        let object_key = format!(
            "memories/{owner}/{}-{}",
            created_at.timestamp_millis(),
            &id[..8]
        );
        let image_url = self.objects.put(&object_key, image, content_type).await?;

        // The user may have signed out (or switched) while the upload ran.
        if self.owner().ok().as_deref() != Some(owner.as_str()) {
            self.discard_object(&object_key).await;
            return Err(JournalError::NotSignedIn);
        }

        let record = MemoryRecord {
            id,
            owner,
            label: label.to_string(),
            image_url,
            object_key,
            created_at,
        };
        if let Err(error) = self.records.add(record.clone()).await {
            self.discard_object(&record.object_key).await;
            return Err(error.into());
        }
        info!("memory {} captured for {}", record.id, record.owner);
        Ok(record)
    }

    /// The current user's memories, newest first.
    pub async fn gallery(&self) -> Result<Vec<MemoryRecord>, JournalError> {
        let owner = self.owner()?;
        let mut records = self.records.list(&owner).await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(records)
    }

    /// Delete a memory and its photo.
    ///
    /// The record is authoritative; failing to delete the photo afterwards is only logged.
    pub async fn forget(&self, id: &str) -> Result<MemoryRecord, JournalError> {
        let owner = self.owner()?;
        let record = self
            .records
            .remove(&owner, id)
            .await?
            .ok_or_else(|| JournalError::NotFound(id.to_string()))?;
        self.discard_object(&record.object_key).await;
        Ok(record)
    }

    async fn discard_object(&self, key: &str) {
        if let Err(error) = self.objects.delete(key).await {
            warn!("could not delete object {key}: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use crate::repository::InMemoryRepository;
    use keepsake_flow::{
        CredentialsPrompt, EmailPassword, PasswordDirectory, PasswordProvider,
    };
    use keepsake_core::AuthError;
    use keepsake_session::MemoryProfileStore;
    use async_trait::async_trait;

    struct Alice;

    #[async_trait]
    impl CredentialsPrompt for Alice {
        type Credentials = EmailPassword;

        async fn request_credentials(&self) -> Result<EmailPassword, AuthError> {
            Ok(EmailPassword::new("alice@example.com", "hunter22"))
        }
    }

    struct Fixture {
        session: SessionController,
        objects: Arc<MemoryObjectStore>,
        journal: MemoryJournal,
    }

    async fn signed_in() -> Fixture {
        let directory = PasswordDirectory::new();
        directory
            .register("alice@example.com", "hunter22", Some("Alice"))
            .await
            .unwrap();
        let session = SessionController::new(
            PasswordProvider::new(directory, Alice),
            MemoryProfileStore::new(),
        );
        session.login().await.unwrap();

        let objects = Arc::new(MemoryObjectStore::new());
        let journal = MemoryJournal::with_shared(
            session.clone(),
            objects.clone(),
            Arc::new(InMemoryRepository::new()),
        );
        Fixture {
            session,
            objects,
            journal,
        }
    }

    #[tokio::test]
    async fn capture_uploads_under_the_owner_prefix() {
        let fx = signed_in().await;
        let owner = fx.session.current_session().identity().unwrap().to_string();

        let record = fx
            .journal
            .capture("  Grandma's garden ", vec![0xff, 0xd8], "image/jpeg")
            .await
            .unwrap();

        assert_eq!(record.owner, owner);
        assert_eq!(record.label, "Grandma's garden");
        assert!(record.object_key.starts_with(&format!("memories/{owner}/")));
        assert_eq!(record.image_url, format!("memory://objects/{}", record.object_key));
        assert!(fx.objects.get(&record.object_key).await.is_some());
    }

    #[tokio::test]
    async fn gallery_lists_newest_first() {
        let fx = signed_in().await;
        let first = fx.journal.capture("first", vec![1], "image/png").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = fx.journal.capture("second", vec![2], "image/png").await.unwrap();

        let gallery = fx.journal.gallery().await.unwrap();
        assert_eq!(gallery, vec![second, first]);
    }

    #[tokio::test]
    async fn signed_out_user_cannot_use_the_journal() {
        let fx = signed_in().await;
        fx.journal.capture("kept", vec![1], "image/png").await.unwrap();
        fx.session.logout();

        assert_eq!(
            fx.journal.capture("late", vec![1], "image/png").await.unwrap_err(),
            JournalError::NotSignedIn
        );
        assert_eq!(fx.journal.gallery().await.unwrap_err(), JournalError::NotSignedIn);
        assert_eq!(fx.objects.len().await, 1);
    }

    #[tokio::test]
    async fn blank_label_is_rejected_before_upload() {
        let fx = signed_in().await;
        assert_eq!(
            fx.journal.capture("   ", vec![1], "image/png").await.unwrap_err(),
            JournalError::EmptyLabel
        );
        assert!(fx.objects.is_empty().await);
    }

    #[tokio::test]
    async fn forget_removes_record_and_object() {
        let fx = signed_in().await;
        let record = fx.journal.capture("gone", vec![1], "image/png").await.unwrap();

        fx.journal.forget(&record.id).await.unwrap();
        assert!(fx.journal.gallery().await.unwrap().is_empty());
        assert!(fx.objects.is_empty().await);
        assert_eq!(
            fx.journal.forget(&record.id).await.unwrap_err(),
            JournalError::NotFound(record.id.clone())
        );
    }

    #[tokio::test]
    async fn forget_survives_object_store_outage() {
        let fx = signed_in().await;
        let record = fx.journal.capture("sticky", vec![1], "image/png").await.unwrap();
        fx.objects.set_available(false);

        assert_eq!(fx.journal.forget(&record.id).await.unwrap(), record);
        assert!(fx.journal.gallery().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_is_reported() {
        let fx = signed_in().await;
        fx.objects.set_available(false);
        assert!(matches!(
            fx.journal.capture("photo", vec![1], "image/png").await,
            Err(JournalError::Upload(ObjectStoreError::Unavailable(_)))
        ));
    }
}
