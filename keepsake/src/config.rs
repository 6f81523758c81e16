use thiserror::Error;

pub const PROVIDER_VAR: &str = "KEEPSAKE_AUTH_PROVIDER";
pub const DOMAIN_VAR: &str = "KEEPSAKE_AUTH_DOMAIN";
pub const CLIENT_ID_VAR: &str = "KEEPSAKE_AUTH_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "KEEPSAKE_AUTH_CLIENT_SECRET";
pub const REDIRECT_URI_VAR: &str = "KEEPSAKE_AUTH_REDIRECT_URI";
pub const AUDIENCE_VAR: &str = "KEEPSAKE_AUTH_AUDIENCE";
pub const SCOPES_VAR: &str = "KEEPSAKE_AUTH_SCOPES";
pub const CHAT_URL_VAR: &str = "KEEPSAKE_CHAT_URL";

pub const DEFAULT_CHAT_URL: &str = "http://localhost:5001";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("{name} is not a valid URL: {value}")]
    InvalidUrl { name: &'static str, value: String },
    #[error("Unsupported value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Client registration for a federated tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedSettings {
    pub domain: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub audience: Option<String>,
    /// Empty means the provider defaults.
    pub scopes: Vec<String>,
}

#[cfg(feature = "oidc")]
impl FederatedSettings {
    pub fn to_federated_config(&self) -> keepsake_oidc::FederatedConfig {
        let mut config = keepsake_oidc::FederatedConfig::for_domain(
            &self.domain,
            self.client_id.clone(),
            self.redirect_uri.clone(),
        )
        .with_scopes(self.scopes.clone());
        if let Some(secret) = &self.client_secret {
            config = config.with_client_secret(secret.clone());
        }
        if let Some(audience) = &self.audience {
            config = config.with_audience(audience.clone());
        }
        config
    }
}

/// Which identity source the application signs users in with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthBackend {
    /// The in-process email/password directory.
    Password,
    Federated(FederatedSettings),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepsakeConfig {
    pub auth: AuthBackend,
    /// Base URL of the chat relay.
    pub chat_url: String,
}

impl KeepsakeConfig {
    /// Read the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let auth = match get(PROVIDER_VAR).as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("password") => AuthBackend::Password,
            Some("federated") => {
                let redirect_uri = require(REDIRECT_URI_VAR)?;
                check_url(REDIRECT_URI_VAR, &redirect_uri)?;
                AuthBackend::Federated(FederatedSettings {
                    domain: require(DOMAIN_VAR)?,
                    client_id: require(CLIENT_ID_VAR)?,
                    client_secret: get(CLIENT_SECRET_VAR),
                    redirect_uri,
                    audience: get(AUDIENCE_VAR),
                    scopes: get(SCOPES_VAR)
                        .map(|s| {
                            s.split(|c: char| c == ',' || c.is_whitespace())
                                .filter(|s| !s.is_empty())
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                })
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: PROVIDER_VAR,
                    value: other.to_string(),
                })
            }
        };

        let chat_url = get(CHAT_URL_VAR).unwrap_or_else(|| DEFAULT_CHAT_URL.to_string());
        check_url(CHAT_URL_VAR, &chat_url)?;

        Ok(Self { auth, chat_url })
    }
}

fn check_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value).map(|_| ()).map_err(|_| ConfigError::InvalidUrl {
        name,
        value: value.to_string(),
    })
}
