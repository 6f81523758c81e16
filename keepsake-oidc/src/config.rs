use crate::discovery::ProviderMetadata;
use keepsake_core::AuthError;

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email"];

/// Client registration and endpoints of a federated identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedConfig {
    /// Identifier stamped on every [`keepsake_core::Identity`] this provider returns.
    pub provider_id: String,
    /// OAuth2 client id.
    pub client_id: String,
    /// Set only for confidential clients; public clients rely on PKCE alone.
    pub client_secret: Option<String>,
    /// Where the provider sends the user agent back with the code.
    pub redirect_uri: String,
    /// Scopes sent with the authorization request.
    pub scopes: Vec<String>,
    /// Optional API audience, sent with the authorization request.
    pub audience: Option<String>,
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL, used for code exchange and refresh.
    pub token_endpoint: String,
    /// Userinfo endpoint URL.
    pub userinfo_endpoint: String,
    /// RFC 7009 revocation endpoint. Without one, sign-out is local only.
    pub revocation_endpoint: Option<String>,
}

impl FederatedConfig {
    /// Endpoints of a hosted tenant, e.g. `example.eu.auth0.com`.
    ///
    /// A bare domain is served over https. A domain that already carries a scheme is used as is.
    pub fn for_domain(
        domain: &str,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        let domain = domain.trim_end_matches('/');
        let base = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        };
        let provider_id = base
            .split_once("://")
            .map(|(_, host)| host.to_string())
            .unwrap_or_else(|| base.clone());
        Self {
            provider_id,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            audience: None,
            authorization_endpoint: format!("{base}/authorize"),
            token_endpoint: format!("{base}/oauth/token"),
            userinfo_endpoint: format!("{base}/userinfo"),
            revocation_endpoint: Some(format!("{base}/oauth/revoke")),
        }
    }

    /// Endpoints taken from a discovery document. Fails if it has no userinfo endpoint.
    pub fn from_metadata(
        metadata: &ProviderMetadata,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let userinfo_endpoint = metadata.userinfo_endpoint.clone().ok_or_else(|| {
            AuthError::InvalidResponse(format!(
                "{} does not advertise a userinfo endpoint",
                metadata.issuer
            ))
        })?;
        let provider_id = url::Url::parse(&metadata.issuer)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| metadata.issuer.clone());
        Ok(Self {
            provider_id,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            audience: None,
            authorization_endpoint: metadata.authorization_endpoint.clone(),
            token_endpoint: metadata.token_endpoint.clone(),
            userinfo_endpoint,
            revocation_endpoint: metadata.revocation_endpoint.clone(),
        })
    }

    /// Override the identifier derived from the tenant host.
    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = provider_id.into();
        self
    }

    /// Authenticate to the token endpoint with a client secret.
    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Request tokens for this API audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Replace the requested scopes. An empty list keeps the defaults.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scopes: Vec<String> = scopes.into_iter().map(Into::into).collect();
        if !scopes.is_empty() {
            self.scopes = scopes;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_domain_derives_https_endpoints() {
        let config = FederatedConfig::for_domain("tenant.example.com", "cid", "app://callback");
        assert_eq!(config.provider_id, "tenant.example.com");
        assert_eq!(config.authorization_endpoint, "https://tenant.example.com/authorize");
        assert_eq!(config.token_endpoint, "https://tenant.example.com/oauth/token");
        assert_eq!(config.userinfo_endpoint, "https://tenant.example.com/userinfo");
        assert_eq!(
            config.revocation_endpoint.as_deref(),
            Some("https://tenant.example.com/oauth/revoke")
        );
        assert_eq!(config.scopes, vec!["openid", "profile", "email"]);
    }

    #[test]
    fn explicit_scheme_is_kept() {
        let config = FederatedConfig::for_domain("http://127.0.0.1:8080/", "cid", "app://cb");
        assert_eq!(config.token_endpoint, "http://127.0.0.1:8080/oauth/token");
    }

    #[test]
    fn metadata_without_userinfo_is_rejected() {
        let metadata = ProviderMetadata {
            issuer: "https://issuer.test".into(),
            authorization_endpoint: "https://issuer.test/auth".into(),
            token_endpoint: "https://issuer.test/token".into(),
            userinfo_endpoint: None,
            revocation_endpoint: None,
            jwks_uri: None,
            scopes_supported: vec![],
        };
        assert!(FederatedConfig::from_metadata(&metadata, "cid", "app://cb").is_err());
    }

    #[test]
    fn empty_scope_list_keeps_defaults() {
        let config = FederatedConfig::for_domain("t.example.com", "cid", "app://cb")
            .with_scopes(Vec::<String>::new());
        assert_eq!(config.scopes.len(), 3);
        let config = config.with_scopes(["openid"]);
        assert_eq!(config.scopes, vec!["openid"]);
    }
}
