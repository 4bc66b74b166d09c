//! Bearer credential types.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::error::{session_error, Error, SessionErrorKind};

/// Opaque bearer credential. Never empty, never printed.
#[derive(Clone)]
pub struct Token(SecretString);

impl Token {
    /// Wraps a raw credential, rejecting empty or whitespace-only values so a
    /// half-present token can never be stored.
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(session_error(
                SessionErrorKind::EmptyToken,
                "Token must not be empty",
            ));
        }
        Ok(Self(SecretString::new(value)))
    }

    /// The raw credential, for request headers and persistence only.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Token {}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Token([REDACTED])")
    }
}

/// An authenticated session as held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Access token sent with every authenticated request.
    pub token: Token,
    /// Accepted and persisted, but never exchanged for a new access token.
    pub refresh_token: Option<Token>,
    /// When the backend said the access token stops being valid, if it said.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: Option<Token>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    pub fn with_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// True once the known expiry has passed. An unknown expiry never expires
    /// locally; the backend reports it instead.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expires| expires <= now).unwrap_or(false)
    }
}
