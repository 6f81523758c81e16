use crate::config::FederatedConfig;
use crate::prompt::AuthorizationPrompt;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use keepsake_core::pkce::{random_token, Pkce};
use keepsake_core::{AuthError, Identity, IdentityProvider, OAuthToken};
use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    id_token: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            refresh_token: self.refresh_token,
            scope: self.scope,
            id_token: self.id_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// An OAuth2 / OpenID Connect identity provider.
///
/// `authenticate` runs the whole authorization code flow: PKCE and CSRF state generation, the
/// user-agent leg through the [`AuthorizationPrompt`], code exchange and the userinfo lookup.
pub struct FederatedProvider<A> {
    config: FederatedConfig,
    prompt: A,
    http_client: reqwest::Client,
}

impl<A: AuthorizationPrompt> FederatedProvider<A> {
    /// A provider with a default HTTP client.
    pub fn new(config: FederatedConfig, prompt: A) -> Self {
        Self::with_client(config, prompt, reqwest::Client::new())
    }

    /// Use an existing HTTP client, e.g. one with custom timeouts.
    pub fn with_client(config: FederatedConfig, prompt: A, http_client: reqwest::Client) -> Self {
        Self {
            config,
            prompt,
            http_client,
        }
    }

    /// The client registration in use.
    pub fn config(&self) -> &FederatedConfig {
        &self.config
    }

    /// Build the authorization request URL.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String, AuthError> {
        let scope = self.config.scopes.join(" ");
        let mut params = vec![
            ("response_type", "code"),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", scope.as_str()),
            ("state", state),
            ("code_challenge", code_challenge),
            ("code_challenge_method", Pkce::METHOD),
        ];
        if let Some(audience) = &self.config.audience {
            params.push(("audience", audience.as_str()));
        }
        let url = url::Url::parse_with_params(&self.config.authorization_endpoint, &params)
            .map_err(|e| {
                AuthError::Provider(format!("Invalid authorization endpoint: {}", e))
            })?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<OAuthToken, AuthError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        self.post_token(&params).await
    }

    async fn post_token(&self, params: &[(&str, &str)]) -> Result<OAuthToken, AuthError> {
        let response = self
            .http_client
            .post(&self.config.token_endpoint)
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(token_error(status, &body));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("Token response: {}", e)))?;
        Ok(token.into_token())
    }

    /// Look up the user behind an access token.
    pub async fn fetch_identity(&self, access_token: &str) -> Result<Identity, AuthError> {
        let response = self
            .http_client
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Userinfo request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(AuthError::Provider(format!("Userinfo returned {}", status)));
        }

        let claims = response
            .json::<Map<String, Value>>()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("Userinfo response: {}", e)))?;
        identity_from_claims(&self.config.provider_id, claims)
    }
}

#[async_trait]
impl<A: AuthorizationPrompt> IdentityProvider for FederatedProvider<A> {
    fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    async fn authenticate(&self) -> Result<(Identity, OAuthToken), AuthError> {
        let pkce = Pkce::new();
        let state = random_token();
        let url = self.authorization_url(&state, &pkce.code_challenge)?;

        let callback = self.prompt.authorize(&url).await?;
        if callback.state != state {
            return Err(AuthError::CsrfMismatch);
        }

        let token = self.exchange_code(&callback.code, &pkce.code_verifier).await?;
        let identity = self.fetch_identity(&token.access_token).await?;
        debug!("{} authenticated {}", self.config.provider_id, identity.external_id);
        Ok((identity, token))
    }

    async fn refresh(&self, token: &OAuthToken) -> Result<(Identity, OAuthToken), AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(AuthError::Unsupported("Refresh without a refresh token"))?;
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let mut fresh = self.post_token(&params).await?;
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = Some(refresh_token.to_string());
        }
        let identity = self.fetch_identity(&fresh.access_token).await?;
        Ok((identity, fresh))
    }

    async fn sign_out(&self, token: Option<&OAuthToken>) -> Result<(), AuthError> {
        let (Some(endpoint), Some(token)) = (&self.config.revocation_endpoint, token) else {
            return Ok(());
        };
        let revoked = token.refresh_token.as_deref().unwrap_or(&token.access_token);
        let mut params = vec![
            ("token", revoked),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http_client
            .post(endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Revocation request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AuthError::Provider(format!(
                "Revocation returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn token_error(status: reqwest::StatusCode, body: &str) -> AuthError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) if err.error == "invalid_grant" || err.error == "access_denied" => {
            AuthError::InvalidCredentials
        }
        Ok(err) => AuthError::Provider(match err.error_description {
            Some(description) => format!("{}: {}", err.error, description),
            None => err.error,
        }),
        Err(_) => AuthError::Provider(format!("Token endpoint returned {}", status)),
    }
}

fn identity_from_claims(
    provider_id: &str,
    mut claims: Map<String, Value>,
) -> Result<Identity, AuthError> {
    let subject = match claims.remove("sub") {
        Some(Value::String(sub)) if !sub.is_empty() => sub,
        _ => {
            return Err(AuthError::InvalidResponse(
                "Userinfo has no subject".to_string(),
            ))
        }
    };

    let mut identity = Identity::new(provider_id, subject);
    identity.email = take_string(&mut claims, "email");
    identity.username =
        take_string(&mut claims, "name").or_else(|| take_string(&mut claims, "nickname"));
    identity.picture = take_string(&mut claims, "picture");
    identity.attributes = claims
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect();
    Ok(identity)
}

fn take_string(claims: &mut Map<String, Value>, key: &str) -> Option<String> {
    match claims.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::CallbackParams;
    use axum::extract::Form;
    use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Plays the user agent: approves the request and echoes back the state it was given.
    struct ApprovingPrompt {
        tamper_state: bool,
    }

    #[async_trait]
    impl AuthorizationPrompt for ApprovingPrompt {
        async fn authorize(&self, authorization_url: &str) -> Result<CallbackParams, AuthError> {
            let url = url::Url::parse(authorization_url).unwrap();
            let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
            assert_eq!(query.get("code_challenge_method").map(String::as_str), Some("S256"));
            assert_eq!(query.get("audience").map(String::as_str), Some("https://api.test"));
            let sent = &query["state"];
            assert_eq!(sent.len(), 43);
            assert!(sent.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
            let state = if self.tamper_state {
                "forged".to_string()
            } else {
                sent.clone()
            };
            CallbackParams::from_redirect(&format!("app://callback?code=good-code&state={state}"))
        }
    }

    async fn token(Form(form): Form<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
        let grant = form.get("grant_type").map(String::as_str);
        let code = form.get("code").map(String::as_str);
        match grant {
            Some("authorization_code") if code == Some("good-code") && form.contains_key("code_verifier") => (
                StatusCode::OK,
                Json(json!({
                    "access_token": "at-1",
                    "token_type": "Bearer",
                    "expires_in": 3600,
                    "refresh_token": "rt-1"
                })),
            ),
            Some("refresh_token") if form.get("refresh_token").map(String::as_str) == Some("rt-1") => (
                StatusCode::OK,
                Json(json!({ "access_token": "at-2", "expires_in": 3600 })),
            ),
            _ => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_grant", "error_description": "unknown grant" })),
            ),
        }
    }

    async fn userinfo(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
        match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some("Bearer at-1") | Some("Bearer at-2") => Ok(Json(json!({
                "sub": "auth0|42",
                "name": "Ada",
                "email": "ada@example.com",
                "picture": "https://img.test/ada.png",
                "email_verified": true,
                "locale": "en"
            }))),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }

    /// Start a fake tenant and return its base URL and revocation counter.
    async fn spawn_tenant() -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let revocations = Arc::new(AtomicUsize::new(0));
        let counter = revocations.clone();
        let issuer = base.clone();

        let app = Router::new()
            .route("/oauth/token", post(token))
            .route("/userinfo", get(userinfo))
            .route(
                "/oauth/revoke",
                post(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { StatusCode::OK }
                }),
            )
            .route(
                "/.well-known/openid-configuration",
                get(move || {
                    let issuer = issuer.clone();
                    async move {
                        Json(json!({
                            "issuer": issuer,
                            "authorization_endpoint": format!("{issuer}/authorize"),
                            "token_endpoint": format!("{issuer}/oauth/token"),
                            "userinfo_endpoint": format!("{issuer}/userinfo"),
                            "revocation_endpoint": format!("{issuer}/oauth/revoke")
                        }))
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, revocations)
    }

    fn provider(base: &str, tamper_state: bool) -> FederatedProvider<ApprovingPrompt> {
        let config = FederatedConfig::for_domain(base, "client-1", "app://callback")
            .with_audience("https://api.test");
        FederatedProvider::new(config, ApprovingPrompt { tamper_state })
    }

    #[tokio::test]
    async fn authorization_code_flow_yields_identity_and_token() {
        let (base, _) = spawn_tenant().await;
        let (identity, token) = provider(&base, false).authenticate().await.unwrap();

        assert_eq!(identity.external_id, "auth0|42");
        assert_eq!(identity.username.as_deref(), Some("Ada"));
        assert_eq!(identity.email.as_deref(), Some("ada@example.com"));
        assert_eq!(identity.attributes.get("locale").map(String::as_str), Some("en"));
        assert_eq!(identity.attributes.get("email_verified").map(String::as_str), Some("true"));
        assert_eq!(token.access_token, "at-1");
        assert_eq!(token.refresh_token.as_deref(), Some("rt-1"));
        assert!(token.expires_at.is_some());
    }

    #[tokio::test]
    async fn forged_state_is_rejected() {
        let (base, _) = spawn_tenant().await;
        let err = provider(&base, true).authenticate().await.unwrap_err();
        assert_eq!(err, AuthError::CsrfMismatch);
    }

    #[tokio::test]
    async fn refresh_keeps_unrotated_refresh_token() {
        let (base, _) = spawn_tenant().await;
        let provider = provider(&base, false);
        let (_, token) = provider.authenticate().await.unwrap();

        let (identity, fresh) = provider.refresh(&token).await.unwrap();
        assert_eq!(identity.external_id, "auth0|42");
        assert_eq!(fresh.access_token, "at-2");
        assert_eq!(fresh.refresh_token.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn rejected_refresh_token_is_invalid_credentials() {
        let (base, _) = spawn_tenant().await;
        let stale = OAuthToken::bearer("at-1").with_refresh_token("rt-old");
        let err = provider(&base, false).refresh(&stale).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn sign_out_revokes_the_token() {
        let (base, revocations) = spawn_tenant().await;
        let provider = provider(&base, false);
        provider
            .sign_out(Some(&OAuthToken::bearer("at-1")))
            .await
            .unwrap();
        provider.sign_out(None).await.unwrap();
        assert_eq!(revocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn discovery_reads_provider_metadata() {
        let (base, _) = spawn_tenant().await;
        let metadata = crate::discovery::discover(&base, &reqwest::Client::new())
            .await
            .unwrap();
        let config = FederatedConfig::from_metadata(&metadata, "client-1", "app://callback").unwrap();
        assert_eq!(config.token_endpoint, format!("{base}/oauth/token"));
        assert_eq!(config.provider_id, "127.0.0.1");
    }

    #[tokio::test]
    async fn unreachable_tenant_is_a_network_error() {
        let err = provider("http://127.0.0.1:9", false)
            .fetch_identity("at-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Network(_)));
    }

    #[test]
    fn userinfo_without_subject_is_invalid() {
        let claims = json!({ "name": "nobody" }).as_object().cloned().unwrap();
        assert!(matches!(
            identity_from_claims("p", claims),
            Err(AuthError::InvalidResponse(_))
        ));
    }
}
