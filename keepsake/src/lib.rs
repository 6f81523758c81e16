//! # Keepsake
//!
//! A session controller framework. One [`SessionController`](flow::SessionController) owns
//! the current user: it runs logins through an identity provider, syncs the profile into a
//! store and publishes every change to subscribers.
//!
//! Component crates are re-exported as modules; enable `oidc`, `memories`, `sqlite` or
//! `postgres` to pull in the matching adapters.

pub use keepsake_core as auth;
pub use keepsake_flow as flow;
pub use keepsake_session as store;

#[cfg(feature = "oidc")]
pub use keepsake_oidc as oidc;

#[cfg(feature = "memories")]
pub use keepsake_memories as memories;

pub mod config;

pub use config::{AuthBackend, ConfigError, FederatedSettings, KeepsakeConfig};
pub use keepsake_core::{AuthError, Identity, IdentityProvider, OAuthToken, ProfileRecord, ProfileStore};
pub use keepsake_flow::{Session, SessionController, SessionError, SessionStatus, SessionWarning};
