//! Error types for the `domain` layer.
use session::{Error as SessionError, SessionErrorKind};
use sse::{Error as TransportError, TransportErrorKind};
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree structure
/// with `domain::error::Error` as the root type holding a tree of `error_kind`
/// enums that represent the kinds of errors that can occur in the domain layer or
/// in lower layers. The `source` field is used to hold the original error that caused
/// the domain error. `session` and `sse` errors are translated here so callers of the
/// domain layer only ever match on `DomainErrorKind`.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainErrorKind {
    Internal(InternalErrorKind),
    External(ExternalErrorKind),
}

/// Failures that originate inside the client.
#[derive(Debug, Clone, PartialEq)]
pub enum InternalErrorKind {
    Config,
    Storage,
    /// A call needed a session but none is active.
    Unauthenticated,
    /// A notification operation ran before `open` or after `close`.
    ChannelNotOpen,
    /// A response arrived for a session that is no longer current. Never
    /// applied, never surfaced to the user.
    StaleResponse,
    Other(String),
}

/// Failures reported by, or on the way to, the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalErrorKind {
    /// The backend rejected the bearer credential. Ends the session, not retried.
    AuthExpired,
    /// The login endpoint rejected the supplied credentials.
    InvalidCredentials,
    /// Transient failure or timeout reaching the backend.
    NetworkUnavailable,
    /// The push connection dropped and could not be re-established.
    ChannelDisconnected,
    /// The backend answered with a body this client cannot use.
    InvalidResponse,
    Other(String),
}

impl Error {
    pub fn new(error_kind: DomainErrorKind, message: &str) -> Self {
        Error {
            source: Some(message.to_string().into()),
            error_kind,
        }
    }

    pub fn internal(kind: InternalErrorKind, message: &str) -> Self {
        Self::new(DomainErrorKind::Internal(kind), message)
    }

    pub fn external(kind: ExternalErrorKind, message: &str) -> Self {
        Self::new(DomainErrorKind::External(kind), message)
    }

    pub fn stale() -> Self {
        Self::internal(
            InternalErrorKind::StaleResponse,
            "Response belongs to a superseded session",
        )
    }

    pub fn is_auth_expired(&self) -> bool {
        self.error_kind == DomainErrorKind::External(ExternalErrorKind::AuthExpired)
    }

    pub fn is_stale(&self) -> bool {
        self.error_kind == DomainErrorKind::Internal(InternalErrorKind::StaleResponse)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Domain Error: {:?}: {}", self.error_kind, source),
            None => write!(f, "Domain Error: {:?}", self.error_kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// This is where we translate errors from the `session` layer to the `domain` layer.
impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        let error_kind = match err.error_kind {
            SessionErrorKind::EmptyToken => {
                DomainErrorKind::External(ExternalErrorKind::InvalidResponse)
            }
            SessionErrorKind::Unauthenticated => {
                DomainErrorKind::Internal(InternalErrorKind::Unauthenticated)
            }
            SessionErrorKind::Expired => DomainErrorKind::External(ExternalErrorKind::AuthExpired),
            SessionErrorKind::Storage => DomainErrorKind::Internal(InternalErrorKind::Storage),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        let error_kind = match err.error_kind {
            TransportErrorKind::Unauthorized => {
                DomainErrorKind::External(ExternalErrorKind::AuthExpired)
            }
            TransportErrorKind::InvalidUrl => DomainErrorKind::Internal(InternalErrorKind::Config),
            TransportErrorKind::Connect | TransportErrorKind::Stream => {
                DomainErrorKind::External(ExternalErrorKind::ChannelDisconnected)
            }
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Errors that result from issues building the reqwest::Client instance. This
        // type of error will occur prior to any network calls being made.
        let error_kind = if err.is_builder() {
            DomainErrorKind::Internal(InternalErrorKind::Other(
                "Failed to build reqwest client".to_string(),
            ))
        } else if err.is_decode() {
            DomainErrorKind::External(ExternalErrorKind::InvalidResponse)
        // Errors that result from issues with the network call itself.
        } else {
            DomainErrorKind::External(ExternalErrorKind::NetworkUnavailable)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            reqwest_middleware::Error::Middleware(err) => Error {
                source: Some(err.into()),
                error_kind: DomainErrorKind::External(ExternalErrorKind::NetworkUnavailable),
            },
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::External(ExternalErrorKind::NetworkUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expiry_maps_to_auth_expired() {
        let err: Error = session::error::session_error(SessionErrorKind::Expired, "expired").into();
        assert!(err.is_auth_expired());
    }

    #[test]
    fn test_transport_kinds_translate() {
        let unauthorized: Error = TransportError::new(TransportErrorKind::Unauthorized, "401").into();
        assert!(unauthorized.is_auth_expired());

        let dropped: Error = TransportError::new(TransportErrorKind::Stream, "eof").into();
        assert_eq!(
            dropped.error_kind,
            DomainErrorKind::External(ExternalErrorKind::ChannelDisconnected)
        );
    }

    #[test]
    fn test_stale_helper() {
        assert!(Error::stale().is_stale());
        assert!(!Error::stale().is_auth_expired());
    }
}
