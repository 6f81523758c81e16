use crate::state::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A user profile document, keyed by identity in a [`crate::ProfileStore`].
///
/// The same type doubles as a partial record for `upsert_merge`: every `None` field and every
/// missing attribute in a patch leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    /// When the record was first written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the user last completed a login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    /// Free-form display attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ProfileRecord {
    /// Build a profile from the claims carried by a provider identity.
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            name: identity.username.clone(),
            email: identity.email.clone(),
            picture_url: identity.picture.clone(),
            created_at: None,
            last_login: None,
            attributes: identity
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the last login time.
    pub fn with_last_login(mut self, at: DateTime<Utc>) -> Self {
        self.last_login = Some(at);
        self
    }

    /// Merge `patch` into this record. Supplied fields win, absent fields are kept.
    pub fn merge(&mut self, patch: ProfileRecord) {
        if patch.name.is_some() {
            self.name = patch.name;
        }
        if patch.email.is_some() {
            self.email = patch.email;
        }
        if patch.picture_url.is_some() {
            self.picture_url = patch.picture_url;
        }
        if patch.created_at.is_some() {
            self.created_at = patch.created_at;
        }
        if patch.last_login.is_some() {
            self.last_login = patch.last_login;
        }
        self.attributes.extend(patch.attributes);
    }

    /// The upsert-merge rule shared by every store: merge `patch` over `existing` and stamp
    /// `created_at` with `now` if the result still has none.
    pub fn upserted(
        existing: Option<ProfileRecord>,
        patch: ProfileRecord,
        now: DateTime<Utc>,
    ) -> ProfileRecord {
        let mut record = existing.unwrap_or_default();
        record.merge(patch);
        if record.created_at.is_none() {
            record.created_at = Some(now);
        }
        record
    }

    /// Name to greet the user with: the display name, falling back to the email.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.email.as_deref())
    }
}
