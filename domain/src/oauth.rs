//! Completing an OAuth login from the provider's redirect.

use chrono::{Duration, Utc};
use log::*;
use session::{Session, Token};
use url::Url;

use crate::error::{DomainErrorKind, Error, ExternalErrorKind, InternalErrorKind};

/// Query parameters the backend's OAuth callback redirects with.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackParams {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: Option<i64>,
}

impl CallbackParams {
    /// Read the credential out of a redirect URL.
    ///
    /// Parameters may sit in the query string or the fragment. An `error`
    /// parameter, or a missing `access_token`, means the login did not happen.
    pub fn from_redirect(redirect: &str) -> Result<Self, Error> {
        let url = Url::parse(redirect).map_err(|err| Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Config),
        })?;

        let fragment_pairs = url
            .fragment()
            .map(|fragment| url::form_urlencoded::parse(fragment.as_bytes()).into_owned())
            .into_iter()
            .flatten();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().chain(fragment_pairs).collect();
        let param = |name: &str| {
            pairs
                .iter()
                .find(|(key, value)| key == name && !value.trim().is_empty())
                .map(|(_, value)| value.clone())
        };

        if let Some(error) = param("error") {
            warn!("OAuth provider returned an error: {error}");
            return Err(Error::external(ExternalErrorKind::InvalidCredentials, &error));
        }

        let access_token = param("access_token").ok_or_else(|| {
            Error::external(
                ExternalErrorKind::InvalidCredentials,
                "OAuth callback did not carry an access token",
            )
        })?;

        Ok(Self {
            access_token,
            refresh_token: param("refresh_token"),
            expires_in: param("expires_in").and_then(|value| value.parse().ok()),
        })
    }

    pub fn into_session(self) -> Result<Session, Error> {
        let refresh_token = self.refresh_token.map(Token::new).transpose()?;
        let expires_at = self
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));

        Ok(Session::new(Token::new(self.access_token)?)
            .with_refresh_token(refresh_token)
            .with_expires_at(expires_at))
    }
}
