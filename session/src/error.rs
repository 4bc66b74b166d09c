//! Error types for the `session` crate.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the session crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: SessionErrorKind,
}

/// Kinds of failures the session layer reports.
#[derive(Debug, PartialEq)]
pub enum SessionErrorKind {
    /// A token was empty or whitespace only.
    EmptyToken,
    /// An operation needed a session but the manager is anonymous.
    Unauthenticated,
    /// The session's expiry passed before the token could be used.
    Expired,
    /// Reading or writing durable storage failed.
    Storage,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Session error: {:?}: {}", self.error_kind, source),
            None => write!(f, "Session error: {:?}", self.error_kind),
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

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: SessionErrorKind::Storage,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: SessionErrorKind::Storage,
        }
    }
}

/// Helper function to create session errors.
pub fn session_error(kind: SessionErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: kind,
    }
}
