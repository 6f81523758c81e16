use thiserror::Error;

/// Reasons an authentication attempt can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The provider rejected the request.
    #[error("Provider error: {0}")]
    Provider(String),
    /// The supplied credentials were not accepted.
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// The user abandoned the login flow.
    #[error("Authentication cancelled")]
    Cancelled,
    /// The CSRF state returned by the provider does not match the one sent.
    #[error("CSRF state mismatch")]
    CsrfMismatch,
    /// The provider could not be reached.
    #[error("Network error: {0}")]
    Network(String),
    /// The provider answered with something that cannot be used.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
    /// The provider does not implement the requested operation.
    #[error("{0} not supported by this provider")]
    Unsupported(&'static str),
}

/// Errors raised by profile and document stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// A stored document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
