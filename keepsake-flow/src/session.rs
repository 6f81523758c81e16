use keepsake_core::{AuthError, Identity, OAuthToken, ProfileRecord, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The coarse status of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Nobody is signed in.
    SignedOut,
    /// A login is in progress.
    Authenticating,
    /// A user is signed in.
    Authenticated,
    /// The last login failed. Always followed by `SignedOut`.
    Error,
}

/// Everything known about a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// The provider identity. `identity.external_id` never changes for the life of the session.
    pub identity: Identity,
    /// The current access credential.
    pub token: OAuthToken,
    /// Display attributes, from the profile store or from provider claims.
    pub profile: ProfileRecord,
}

/// The state carried by a [`Session`].
///
/// Identity and token only exist inside `Authenticated`, so a session cannot hold a token
/// without being authenticated or be authenticated without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Nobody is signed in.
    SignedOut,
    /// A login is in progress.
    Authenticating,
    /// A user is signed in.
    Authenticated(Box<AuthenticatedUser>),
    /// The last login failed for the given reason.
    Failed(AuthError),
}

/// An immutable snapshot of the controller's current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    revision: u64,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(revision: u64, state: SessionState) -> Self {
        Self { revision, state }
    }

    /// The initial session: signed out, revision zero.
    pub fn signed_out() -> Self {
        Self::new(0, SessionState::SignedOut)
    }

    /// Publication counter. Every published snapshot has a larger revision than the last.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The full state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The coarse status.
    pub fn status(&self) -> SessionStatus {
        match self.state {
            SessionState::SignedOut => SessionStatus::SignedOut,
            SessionState::Authenticating => SessionStatus::Authenticating,
            SessionState::Authenticated(_) => SessionStatus::Authenticated,
            SessionState::Failed(_) => SessionStatus::Error,
        }
    }

    /// The signed-in user, if any.
    pub fn user(&self) -> Option<&AuthenticatedUser> {
        match &self.state {
            SessionState::Authenticated(user) => Some(user.as_ref()),
            _ => None,
        }
    }

    /// The provider subject id of the signed-in user.
    pub fn identity(&self) -> Option<&str> {
        self.user().map(|u| u.identity.external_id.as_str())
    }

    /// The current access credential.
    pub fn token(&self) -> Option<&OAuthToken> {
        self.user().map(|u| &u.token)
    }

    /// The signed-in user's profile.
    pub fn profile(&self) -> Option<&ProfileRecord> {
        self.user().map(|u| &u.profile)
    }

    /// The failure reason when the status is `Error`.
    pub fn error(&self) -> Option<&AuthError> {
        match &self.state {
            SessionState::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Shorthand for `status() == SessionStatus::Authenticated`.
    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::signed_out()
    }
}

/// Non-fatal problems reported on the warning side channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionWarning {
    /// The profile upsert after a successful login failed. The session stays authenticated
    /// with a profile built from provider claims.
    #[error("Profile sync failed for {identity}: {error}")]
    ProfileSync {
        /// Subject whose profile could not be written.
        identity: String,
        /// The store failure.
        error: StoreError,
    },
    /// A token refresh failed. The session keeps its previous token.
    #[error("Refresh failed for {identity}: {error}")]
    RefreshFailed {
        /// Subject whose token could not be refreshed.
        identity: String,
        /// The provider failure.
        error: AuthError,
    },
    /// The provider-side sign out failed after the local session was already cleared.
    #[error("Provider sign-out failed: {error}")]
    SignOutFailed {
        /// The provider failure.
        error: AuthError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_out_session_has_no_credentials() {
        let session = Session::signed_out();
        assert_eq!(session.status(), SessionStatus::SignedOut);
        assert_eq!(session.identity(), None);
        assert_eq!(session.token(), None);
        assert_eq!(session.profile(), None);
    }

    #[test]
    fn authenticated_session_exposes_identity_and_token() {
        let user = AuthenticatedUser {
            identity: Identity::new("password", "u1"),
            token: OAuthToken::bearer("tok"),
            profile: ProfileRecord::default().with_name("Alice"),
        };
        let session = Session::new(3, SessionState::Authenticated(Box::new(user)));
        assert_eq!(session.status(), SessionStatus::Authenticated);
        assert_eq!(session.identity(), Some("u1"));
        assert_eq!(session.token().map(|t| t.access_token.as_str()), Some("tok"));
        assert_eq!(session.revision(), 3);
    }

    #[test]
    fn failed_session_carries_reason() {
        let session = Session::new(1, SessionState::Failed(AuthError::Cancelled));
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.error(), Some(&AuthError::Cancelled));
        assert!(!session.is_authenticated());
    }
}
