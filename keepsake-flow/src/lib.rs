//! # Keepsake Flow
//!
//! `keepsake-flow` owns the session state machine. The [`SessionController`] reconciles an
//! [`IdentityProvider`] with a [`ProfileStore`] and publishes one race-free view of the
//! current user to the rest of the application.
//!
//! ## Key Components
//!
//! - **[`SessionController`]**: Runs login, logout and refresh, and publishes [`Session`]
//!   snapshots to subscribers.
//! - **[`SessionControllerBuilder`]**: A builder for configuring and creating a
//!   [`SessionController`].
//! - **[`PasswordProvider`]**: An [`IdentityProvider`] for direct credentials-based
//!   authentication (e.g., email/password).
//! - **[`PasswordDirectory`]**: An in-process email/password account directory.

#![warn(missing_docs)]

pub use keepsake_core::{
    AuthError, CredentialsProvider, Identity, IdentityProvider, OAuthToken, ProfileRecord,
    ProfileStore, StoreError,
};

/// The session controller and its builder.
pub mod controller;
/// Email/password identity provider.
pub mod credentials;
mod dispatch;
/// Errors returned by the controller.
pub mod error;
/// Session snapshots and warnings.
pub mod session;

pub use controller::{SessionController, SessionControllerBuilder, SessionReceiver};
pub use credentials::{CredentialsPrompt, EmailPassword, PasswordDirectory, PasswordProvider};
pub use dispatch::Subscription;
pub use error::SessionError;
pub use session::{AuthenticatedUser, Session, SessionState, SessionStatus, SessionWarning};

pub use chrono;

/// Marker for a missing component in the typestate pattern.
#[derive(Clone, Default)]
pub struct Missing;

/// Marker for a configured component in the typestate pattern.
#[derive(Clone)]
pub struct Configured<T>(pub T);
