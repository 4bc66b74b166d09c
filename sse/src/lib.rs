//! Server-Sent Events (SSE) client for the dashboard's live notification feed.
//!
//! The backend pushes events over one long-lived connection per user,
//! authenticated with the bearer token at handshake time. This crate turns
//! that connection into a typed stream and knows how long to wait between
//! reconnection attempts; deciding *whether* to reconnect (is the session
//! still alive, with which token) belongs to the caller.
//!
//! # Modules
//!
//! - `message`: decoding of raw frames into `PushEvent`
//! - `backoff`: capped exponential reconnection delays
//! - `transport`: the `Transport` seam and its `eventsource-client` backed
//!   implementation
//! - `error`: transport error kinds

pub mod backoff;
pub mod error;
pub mod message;
pub mod transport;

pub use backoff::Backoff;
pub use error::{Error, TransportErrorKind};
pub use message::PushEvent;
pub use transport::{EventSourceTransport, PushStream, Transport};
