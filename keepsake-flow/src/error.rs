use keepsake_core::AuthError;
use thiserror::Error;

/// Errors returned by [`crate::SessionController`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The identity provider rejected the login or the user cancelled it.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
    /// A login was requested while another one is still in flight.
    #[error("A login is already in progress")]
    ConcurrentLogin,
    /// The operation needs a signed-in user.
    #[error("No authenticated session")]
    NotAuthenticated,
}
