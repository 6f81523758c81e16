use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::Duration;
use keepsake_core::pkce::random_token;
use keepsake_core::{AuthError, CredentialsProvider, Identity, IdentityProvider, OAuthToken};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

/// Passwords shorter than this are refused at registration.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Email and password, as typed by the user.
#[derive(Clone)]
pub struct EmailPassword {
    /// The account email.
    pub email: String,
    /// The plain-text password.
    pub password: String,
}

impl EmailPassword {
    /// Bundle an email and a password.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for EmailPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailPassword")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Asks the user for credentials, e.g. by showing a login form.
#[async_trait]
pub trait CredentialsPrompt: Send + Sync {
    /// The type of credentials collected.
    type Credentials: Send;

    /// Collect credentials. Returns [`AuthError::Cancelled`] if the user backs out.
    async fn request_credentials(&self) -> Result<Self::Credentials, AuthError>;
}

/// An [`IdentityProvider`] that prompts for credentials and checks them with a
/// [`CredentialsProvider`].
pub struct PasswordProvider<P, Q> {
    provider_id: String,
    verifier: P,
    prompt: Q,
}

impl<P, Q> PasswordProvider<P, Q>
where
    P: CredentialsProvider,
    Q: CredentialsPrompt<Credentials = P::Credentials>,
{
    /// Create a provider with the id `"password"`.
    pub fn new(verifier: P, prompt: Q) -> Self {
        Self::with_id("password", verifier, prompt)
    }

    /// Create a provider with a custom id.
    pub fn with_id(provider_id: impl Into<String>, verifier: P, prompt: Q) -> Self {
        Self {
            provider_id: provider_id.into(),
            verifier,
            prompt,
        }
    }
}

#[async_trait]
impl<P, Q> IdentityProvider for PasswordProvider<P, Q>
where
    P: CredentialsProvider,
    Q: CredentialsPrompt<Credentials = P::Credentials>,
{
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn authenticate(&self) -> Result<(Identity, OAuthToken), AuthError> {
        let creds = self.prompt.request_credentials().await?;
        self.verifier.authenticate(creds).await
    }

    async fn refresh(&self, token: &OAuthToken) -> Result<(Identity, OAuthToken), AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(AuthError::Unsupported("Refresh without a refresh token"))?;
        self.verifier.refresh(refresh_token).await
    }

    async fn sign_out(&self, token: Option<&OAuthToken>) -> Result<(), AuthError> {
        match token {
            Some(token) => self.verifier.revoke(token).await,
            None => Ok(()),
        }
    }
}

struct Account {
    subject: String,
    email: String,
    name: Option<String>,
    password_hash: String,
}

impl Account {
    fn identity(&self, provider_id: &str) -> Identity {
        let mut identity = Identity::new(provider_id, self.subject.clone());
        identity.email = Some(self.email.clone());
        identity.username = self.name.clone();
        identity
    }
}

/// An in-process account directory with Argon2 password hashes.
///
/// Issues opaque access tokens with a fixed lifetime and rotating refresh tokens.
pub struct PasswordDirectory {
    provider_id: String,
    token_lifetime: Duration,
    accounts: RwLock<HashMap<String, Account>>,
    // refresh token -> normalized email
    refresh_tokens: RwLock<HashMap<String, String>>,
}

impl Default for PasswordDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordDirectory {
    /// An empty directory issuing one-hour tokens.
    pub fn new() -> Self {
        Self {
            provider_id: "password".to_string(),
            token_lifetime: Duration::hours(1),
            accounts: RwLock::new(HashMap::new()),
            refresh_tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Override the access token lifetime.
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    /// Create an account.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Identity, AuthError> {
        let key = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Provider(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if self.accounts.read().await.contains_key(&key) {
            return Err(AuthError::Provider(format!(
                "an account already exists for {key}"
            )));
        }

        let password_hash = hash_password(password)?;
        let account = Account {
            subject: uuid::Uuid::new_v4().to_string(),
            email: key.clone(),
            name: name.map(str::to_string),
            password_hash,
        };

        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&key) {
            return Err(AuthError::Provider(format!(
                "an account already exists for {key}"
            )));
        }
        let identity = account.identity(&self.provider_id);
        accounts.insert(key, account);
        Ok(identity)
    }

    async fn issue(&self, email: &str) -> OAuthToken {
        let refresh_token = random_token();
        self.refresh_tokens
            .write()
            .await
            .insert(refresh_token.clone(), email.to_string());
        OAuthToken::bearer(random_token())
            .expiring_in(self.token_lifetime)
            .with_refresh_token(refresh_token)
    }
}

#[async_trait]
impl CredentialsProvider for PasswordDirectory {
    type Credentials = EmailPassword;

    async fn authenticate(
        &self,
        creds: EmailPassword,
    ) -> Result<(Identity, OAuthToken), AuthError> {
        let key = normalize_email(&creds.email).map_err(|_| AuthError::InvalidCredentials)?;
        let identity = {
            let accounts = self.accounts.read().await;
            let account = accounts.get(&key).ok_or(AuthError::InvalidCredentials)?;
            if !verify_password(&account.password_hash, &creds.password) {
                return Err(AuthError::InvalidCredentials);
            }
            account.identity(&self.provider_id)
        };
        let token = self.issue(&key).await;
        Ok((identity, token))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<(Identity, OAuthToken), AuthError> {
        let email = self
            .refresh_tokens
            .write()
            .await
            .remove(refresh_token)
            .ok_or(AuthError::InvalidCredentials)?;
        let identity = self
            .accounts
            .read()
            .await
            .get(&email)
            .map(|account| account.identity(&self.provider_id))
            .ok_or(AuthError::InvalidCredentials)?;
        let token = self.issue(&email).await;
        Ok((identity, token))
    }

    async fn revoke(&self, token: &OAuthToken) -> Result<(), AuthError> {
        if let Some(refresh_token) = &token.refresh_token {
            self.refresh_tokens.write().await.remove(refresh_token);
        }
        Ok(())
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AuthError::Provider(format!("invalid email address: {email}"))),
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AuthError::Provider(format!("salt encoding failed: {e}")))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Provider(format!("password hashing failed: {e}")))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedPrompt(Mutex<Option<EmailPassword>>);

    #[async_trait]
    impl CredentialsPrompt for FixedPrompt {
        type Credentials = EmailPassword;

        async fn request_credentials(&self) -> Result<EmailPassword, AuthError> {
            self.0.lock().unwrap().take().ok_or(AuthError::Cancelled)
        }
    }

    #[tokio::test]
    async fn register_then_authenticate() {
        let directory = PasswordDirectory::new();
        let registered = directory
            .register("Alice@Example.com", "hunter22", Some("Alice"))
            .await
            .unwrap();
        assert_eq!(registered.email.as_deref(), Some("alice@example.com"));

        let (identity, token) = directory
            .authenticate(EmailPassword::new("alice@example.com", "hunter22"))
            .await
            .unwrap();
        assert_eq!(identity.external_id, registered.external_id);
        assert_eq!(identity.username.as_deref(), Some("Alice"));
        assert!(!token.access_token.is_empty());
        assert!(token.refresh_token.is_some());
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let directory = PasswordDirectory::new();
        directory.register("bo@example.com", "secret1", None).await.unwrap();
        let err = directory
            .authenticate(EmailPassword::new("bo@example.com", "secret2"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);

        let err = directory
            .authenticate(EmailPassword::new("nobody@example.com", "secret1"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn registration_rules() {
        let directory = PasswordDirectory::new();
        assert!(directory.register("not-an-email", "secret1", None).await.is_err());
        assert!(directory.register("c@example.com", "short", None).await.is_err());
        directory.register("c@example.com", "secret1", None).await.unwrap();
        assert!(directory.register("C@example.com", "secret1", None).await.is_err());
    }

    #[tokio::test]
    async fn refresh_rotates_and_revoke_invalidates() {
        let directory = PasswordDirectory::new();
        directory.register("d@example.com", "secret1", None).await.unwrap();
        let (_, first) = directory
            .authenticate(EmailPassword::new("d@example.com", "secret1"))
            .await
            .unwrap();
        let old_refresh = first.refresh_token.clone().unwrap();

        let (_, second) = directory.refresh(&old_refresh).await.unwrap();
        assert_ne!(second.access_token, first.access_token);
        assert_eq!(
            directory.refresh(&old_refresh).await.unwrap_err(),
            AuthError::InvalidCredentials
        );

        directory.revoke(&second).await.unwrap();
        let second_refresh = second.refresh_token.unwrap();
        assert!(directory.refresh(&second_refresh).await.is_err());
    }

    #[tokio::test]
    async fn password_provider_prompts_then_verifies() {
        let directory = PasswordDirectory::new();
        directory.register("e@example.com", "secret1", None).await.unwrap();
        let provider = PasswordProvider::new(
            directory,
            FixedPrompt(Mutex::new(Some(EmailPassword::new("e@example.com", "secret1")))),
        );

        let (identity, token) = provider.authenticate().await.unwrap();
        assert_eq!(identity.provider_id, "password");
        let (refreshed, _) = provider.refresh(&token).await.unwrap();
        assert_eq!(refreshed.external_id, identity.external_id);

        // The prompt has been used up: a second login is a cancellation.
        assert_eq!(provider.authenticate().await.unwrap_err(), AuthError::Cancelled);
    }

    #[test]
    fn debug_hides_password() {
        let creds = EmailPassword::new("a@x.com", "pw-secret");
        assert!(!format!("{creds:?}").contains("pw-secret"));
    }
}
