//! # Keepsake OIDC
//!
//! A federated [`IdentityProvider`](keepsake_core::IdentityProvider) speaking the OAuth2
//! authorization code flow with PKCE, plus OpenID Connect discovery and userinfo.
//!
//! The browser leg of the flow is delegated to an [`AuthorizationPrompt`], so the same provider
//! works behind a system browser, an embedded web view or a test double.

#![warn(missing_docs)]

/// Client registration and endpoints.
pub mod config;
/// OpenID Connect discovery.
pub mod discovery;
/// The user-agent leg of the flow.
pub mod prompt;
/// The federated identity provider.
pub mod provider;

pub use config::FederatedConfig;
pub use discovery::ProviderMetadata;
pub use prompt::{AuthorizationPrompt, CallbackParams};
pub use provider::FederatedProvider;
