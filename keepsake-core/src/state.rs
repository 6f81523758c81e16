use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A unified identity structure returned by all providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The provider that issued this identity (e.g. "auth0", "password").
    pub provider_id: String,
    /// The provider-issued subject id. Profiles are keyed by this value.
    pub external_id: String,
    /// The user's email, if the provider released it.
    pub email: Option<String>,
    /// The user's display name.
    pub username: Option<String>,
    /// URL of the user's avatar.
    pub picture: Option<String>,
    /// Remaining provider claims, stringified.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Identity {
    /// Create an identity with only a provider and subject.
    pub fn new(provider_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            external_id: external_id.into(),
            email: None,
            username: None,
            picture: None,
            attributes: HashMap::new(),
        }
    }
}

/// An access credential issued by a provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// The opaque access token.
    pub access_token: String,
    /// Token type, usually "Bearer".
    pub token_type: String,
    /// When the access token stops being valid, if known.
    pub expires_at: Option<DateTime<Utc>>,
    /// Token used to obtain a new access token.
    pub refresh_token: Option<String>,
    /// Granted scopes, space separated.
    pub scope: Option<String>,
    /// OpenID Connect ID token, if one was issued.
    pub id_token: Option<String>,
}

impl OAuthToken {
    /// A bearer token with no expiry or refresh capability.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            expires_at: None,
            refresh_token: None,
            scope: None,
            id_token: None,
        }
    }

    /// Set the expiry relative to now.
    pub fn expiring_in(mut self, lifetime: Duration) -> Self {
        self.expires_at = Some(Utc::now() + lifetime);
        self
    }

    /// Attach a refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// True when the token has an expiry that falls before `now + margin`.
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at
            .map(|at| at <= Utc::now() + margin)
            .unwrap_or(false)
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
