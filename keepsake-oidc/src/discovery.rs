use keepsake_core::AuthError;
use serde::{Deserialize, Serialize};

/// The subset of OpenID provider metadata used by [`crate::FederatedProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier URL.
    pub issuer: String,
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL.
    pub token_endpoint: String,
    /// Userinfo endpoint URL, required by [`crate::FederatedConfig::from_metadata`].
    pub userinfo_endpoint: Option<String>,
    /// Token revocation endpoint URL.
    pub revocation_endpoint: Option<String>,
    /// Signing keys URL.
    pub jwks_uri: Option<String>,
    /// Scopes the provider advertises.
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Fetches metadata from the issuer URL (appends /.well-known/openid-configuration)
    pub async fn discover(issuer_url: &str, client: &reqwest::Client) -> Result<Self, AuthError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer_url.trim_end_matches('/')
        );
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Discovery request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AuthError::Provider(format!(
                "Discovery returned {} for {}",
                response.status(),
                url
            )));
        }
        response
            .json::<ProviderMetadata>()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("Discovery document: {}", e)))
    }
}

/// Shorthand for [`ProviderMetadata::discover`].
pub async fn discover(issuer_url: &str, client: &reqwest::Client) -> Result<ProviderMetadata, AuthError> {
    ProviderMetadata::discover(issuer_url, client).await
}
