//! Error types for the `sse` crate.

use std::error::Error as StdError;
use std::fmt;

/// Top-level transport error. Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: TransportErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    /// The push URL or a handshake header could not be used.
    InvalidUrl,
    /// The server rejected the handshake credential (401/403).
    Unauthorized,
    /// The connection could not be established or the server answered with
    /// an unexpected status.
    Connect,
    /// An established stream broke or delivered a malformed frame.
    Stream,
}

impl Error {
    pub fn new(kind: TransportErrorKind, message: &str) -> Self {
        Error {
            source: Some(message.to_string().into()),
            error_kind: kind,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.error_kind == TransportErrorKind::Unauthorized
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Transport error: {:?}: {}", self.error_kind, source),
            None => write!(f, "Transport error: {:?}", self.error_kind),
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

impl From<eventsource_client::Error> for Error {
    fn from(err: eventsource_client::Error) -> Self {
        use eventsource_client::Error as EsError;

        let error_kind = match &err {
            EsError::UnexpectedResponse(status) if matches!(status.as_u16(), 401 | 403) => {
                TransportErrorKind::Unauthorized
            }
            EsError::UnexpectedResponse(_) => TransportErrorKind::Connect,
            _ => TransportErrorKind::Stream,
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
