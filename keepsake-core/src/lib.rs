//! # Keepsake Core
//!
//! `keepsake-core` provides the foundational traits and types for the Keepsake session framework.
//! It defines the abstractions for identities, tokens, profile records, identity providers and
//! profile stores that the session controller and its adapters are built on.

#![warn(missing_docs)]

use async_trait::async_trait;
use std::sync::Arc;

/// PKCE (Proof Key for Code Exchange) utilities.
pub mod pkce;

/// Errors that can occur while authenticating or syncing profiles.
pub mod error;
pub use crate::error::{AuthError, StoreError};

/// Identity and token types returned by all providers.
pub mod state;
pub use crate::state::{Identity, OAuthToken};

/// Persisted per-user profile documents.
pub mod profile;
pub use crate::profile::ProfileRecord;

/// Trait for a service that authenticates the current user.
///
/// `authenticate` covers the whole interactive exchange (redirect, challenge, callback or
/// credential entry) and resolves once, with either the user's identity and token or the
/// reason the attempt failed.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Get the provider identifier.
    fn provider_id(&self) -> &str;

    /// Run the full login flow and return the authenticated identity and its token.
    async fn authenticate(&self) -> Result<(Identity, OAuthToken), AuthError>;

    /// Re-pull claims and a fresh token for an existing login.
    async fn refresh(&self, _token: &OAuthToken) -> Result<(Identity, OAuthToken), AuthError> {
        Err(AuthError::Unsupported("Token refresh"))
    }

    /// End the provider-side session. Best-effort.
    async fn sign_out(&self, _token: Option<&OAuthToken>) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Trait for a document store holding profile records keyed by identity.
///
/// `upsert_merge` creates the record when it does not exist and otherwise merges the supplied
/// fields into it. Fields absent from the patch are never erased. Writes to a single key are
/// atomic; no other transactional guarantee is assumed.
#[async_trait]
pub trait ProfileStore: Send + Sync + 'static {
    /// Load the profile stored for `identity`.
    async fn get(&self, identity: &str) -> Result<Option<ProfileRecord>, StoreError>;

    /// Create or merge the profile stored for `identity`, returning the merged record.
    async fn upsert_merge(
        &self,
        identity: &str,
        patch: ProfileRecord,
    ) -> Result<ProfileRecord, StoreError>;
}

/// Trait for a Credentials-based provider (e.g., Email/Password).
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// The type of credentials accepted by this provider.
    type Credentials: Send;

    /// Validate credentials and return an Identity with a freshly issued token.
    async fn authenticate(
        &self,
        creds: Self::Credentials,
    ) -> Result<(Identity, OAuthToken), AuthError>;

    /// Exchange a refresh token for a new token.
    async fn refresh(&self, _refresh_token: &str) -> Result<(Identity, OAuthToken), AuthError> {
        Err(AuthError::Unsupported("Token refresh"))
    }

    /// Revoke a previously issued token.
    async fn revoke(&self, _token: &OAuthToken) -> Result<(), AuthError> {
        Ok(())
    }
}

#[async_trait]
impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    fn provider_id(&self) -> &str {
        (**self).provider_id()
    }

    async fn authenticate(&self) -> Result<(Identity, OAuthToken), AuthError> {
        (**self).authenticate().await
    }

    async fn refresh(&self, token: &OAuthToken) -> Result<(Identity, OAuthToken), AuthError> {
        (**self).refresh(token).await
    }

    async fn sign_out(&self, token: Option<&OAuthToken>) -> Result<(), AuthError> {
        (**self).sign_out(token).await
    }
}

#[async_trait]
impl<T: IdentityProvider + ?Sized> IdentityProvider for Box<T> {
    fn provider_id(&self) -> &str {
        (**self).provider_id()
    }

    async fn authenticate(&self) -> Result<(Identity, OAuthToken), AuthError> {
        (**self).authenticate().await
    }

    async fn refresh(&self, token: &OAuthToken) -> Result<(Identity, OAuthToken), AuthError> {
        (**self).refresh(token).await
    }

    async fn sign_out(&self, token: Option<&OAuthToken>) -> Result<(), AuthError> {
        (**self).sign_out(token).await
    }
}

#[async_trait]
impl<T: ProfileStore + ?Sized> ProfileStore for Arc<T> {
    async fn get(&self, identity: &str) -> Result<Option<ProfileRecord>, StoreError> {
        (**self).get(identity).await
    }

    async fn upsert_merge(
        &self,
        identity: &str,
        patch: ProfileRecord,
    ) -> Result<ProfileRecord, StoreError> {
        (**self).upsert_merge(identity, patch).await
    }
}

#[async_trait]
impl<T: CredentialsProvider + ?Sized> CredentialsProvider for Arc<T> {
    type Credentials = T::Credentials;

    async fn authenticate(
        &self,
        creds: Self::Credentials,
    ) -> Result<(Identity, OAuthToken), AuthError> {
        (**self).authenticate(creds).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<(Identity, OAuthToken), AuthError> {
        (**self).refresh(refresh_token).await
    }

    async fn revoke(&self, token: &OAuthToken) -> Result<(), AuthError> {
        (**self).revoke(token).await
    }
}
