use async_trait::async_trait;
use keepsake_core::AuthError;

/// Drives the user agent through the authorization endpoint.
///
/// Implementations open `authorization_url` (system browser, web view, ...) and resolve with
/// the parameters the provider appended to the redirect URI.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// Returns [`AuthError::Cancelled`] if the user closes the window.
    async fn authorize(&self, authorization_url: &str) -> Result<CallbackParams, AuthError>;
}

/// The authorization code and CSRF state returned on the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code to exchange at the token endpoint.
    pub code: String,
    /// Must equal the state sent with the authorization request.
    pub state: String,
}

impl CallbackParams {
    /// Parse the redirect URL the provider sent the user agent to.
    pub fn from_redirect(redirect: &str) -> Result<Self, AuthError> {
        let url = url::Url::parse(redirect)
            .map_err(|e| AuthError::InvalidResponse(format!("Invalid redirect URL: {}", e)))?;

        let (mut code, mut state, mut error, mut description) = (None, None, None, None);
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            if error == "access_denied" {
                return Err(AuthError::Cancelled);
            }
            return Err(AuthError::Provider(match description {
                Some(description) => format!("{error}: {description}"),
                None => error,
            }));
        }

        match (code, state) {
            (Some(code), Some(state)) => Ok(Self { code, state }),
            _ => Err(AuthError::InvalidResponse(
                "Redirect is missing code or state".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_and_state() {
        let params =
            CallbackParams::from_redirect("app://callback?code=abc&state=xyz%3D").unwrap();
        assert_eq!(params.code, "abc");
        assert_eq!(params.state, "xyz=");
    }

    #[test]
    fn access_denied_is_a_cancellation() {
        let err = CallbackParams::from_redirect("app://callback?error=access_denied&state=s")
            .unwrap_err();
        assert_eq!(err, AuthError::Cancelled);
    }

    #[test]
    fn other_errors_carry_the_description() {
        let err = CallbackParams::from_redirect(
            "app://callback?error=login_required&error_description=no+session",
        )
        .unwrap_err();
        assert_eq!(err, AuthError::Provider("login_required: no session".into()));
    }

    #[test]
    fn missing_code_is_invalid() {
        assert!(matches!(
            CallbackParams::from_redirect("app://callback?state=s"),
            Err(AuthError::InvalidResponse(_))
        ));
    }
}
